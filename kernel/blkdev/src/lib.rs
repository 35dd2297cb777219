//! # blkdev — 块设备契约与注册表
//!
//! 对应内核中块设备层暴露给驱动的那部分：操作表（open/close/read/write/
//! geometry/ioctl）与按设备名登记的注册表。文件系统与挂载逻辑在上层，
//! 本 crate 只负责「名字 → 驱动」这一层，供驱动动态注册/注销分区设备。
//!
//! 注册表为进程级单例（`spin::Mutex` 保护），注销后名字立即不可查得，
//! 已被上层持有的 `Arc` 句柄自然延续到释放为止。

#![no_std]

extern crate alloc;

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{LinuxError, LinuxResult};
use spin::Mutex;

/// 块设备几何信息（`BlockDriverOps::geometry` 返回）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Geometry {
    /// 介质可用
    pub available: bool,
    /// 自上次查询以来介质发生过更换（读取即清除）
    pub mediachanged: bool,
    /// 可写（未写保护、未上锁）
    pub writeenabled: bool,
    /// 扇区总数
    pub nsectors: u64,
    /// 扇区字节数
    pub sectorsize: u16,
}

/// 通用块设备 ioctl 命令码
pub mod ioc {
    /// 探测槽内介质（重新识别并注册分区设备）
    pub const BIOC_PROBE: u32 = 0x0b01;
    /// 介质已移除（注销分区设备并重新武装插入回调）
    pub const BIOC_EJECT: u32 = 0x0b02;
}

/// 块设备操作表
///
/// `read`/`write` 返回实际传输的扇区数；`ioctl` 的 `arg` 为指针语义的
/// 原始参数，具体解释由驱动定义的命令码决定。
pub trait BlockDriverOps: Send + Sync {
    fn open(&self) -> LinuxResult<()> {
        Ok(())
    }

    fn close(&self) -> LinuxResult<()> {
        Ok(())
    }

    fn read(&self, buf: &mut [u8], start_sector: u64, nsectors: u32) -> LinuxResult<u32>;

    fn write(&self, buf: &[u8], start_sector: u64, nsectors: u32) -> LinuxResult<u32>;

    fn geometry(&self) -> LinuxResult<Geometry>;

    fn ioctl(&self, _cmd: u32, _arg: usize) -> LinuxResult<()> {
        Err(LinuxError::ENOTTY)
    }
}

struct Registered {
    ops: Arc<dyn BlockDriverOps>,
    #[allow(dead_code)]
    mode: u32,
}

/// 进程级「设备名 → 驱动」注册表
static BLOCK_DRIVERS: Mutex<BTreeMap<String, Registered>> = Mutex::new(BTreeMap::new());

/// 登记一个块设备。重名返回 `EEXIST`。
pub fn register_blockdriver(
    name: &str,
    ops: Arc<dyn BlockDriverOps>,
    mode: u32,
) -> LinuxResult<()> {
    let mut table = BLOCK_DRIVERS.lock();
    if table.contains_key(name) {
        return Err(LinuxError::EEXIST);
    }
    log::debug!(target: "storage::blkdev", "register {}", name);
    table.insert(name.to_string(), Registered { ops, mode });
    Ok(())
}

/// 注销块设备。名字不存在返回 `ENOENT`。
pub fn unregister_blockdriver(name: &str) -> LinuxResult<()> {
    let mut table = BLOCK_DRIVERS.lock();
    match table.remove(name) {
        Some(_) => {
            log::debug!(target: "storage::blkdev", "unregister {}", name);
            Ok(())
        }
        None => Err(LinuxError::ENOENT),
    }
}

/// 按名字查找已登记的块设备
pub fn find_blockdriver(name: &str) -> Option<Arc<dyn BlockDriverOps>> {
    BLOCK_DRIVERS.lock().get(name).map(|r| r.ops.clone())
}

/// 当前已登记的设备名（诊断用）
pub fn registered_names() -> Vec<String> {
    BLOCK_DRIVERS.lock().keys().cloned().collect()
}
