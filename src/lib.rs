//! StarryOS storage crate
//!
//! MMC/SD 存储栈的汇总入口：
//! - `sdio`: 主机控制器契约（命令/数据/事件/插拔回调）
//! - `blkdev`: 块设备操作表与名字注册表
//! - `mmcsd`: 卡生命周期与传输状态机（识别、初始化、读写、透传）
//!
//! 平台实现 `sdio::SdioDev` 后，经 `attach_slot` 把卡槽接入块设备层；
//! 分区设备以 `/dev/mmcsd<minor><suffix>` 出现，插拔后自动注销/重建。

#![no_std]

extern crate alloc;

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::AxResult;

pub use blkdev;
pub use mmcsd;
pub use sdio;

use mmcsd::{MmcsdConfig, MmcsdSlot};
use sdio::{DelayOps, SdioDev, SpinDelay};

/// 存储驱动上下文：已注册的卡槽集合。
/// 平台初始化时创建，之后交给上层持有；槽位随插拔自行维护设备名。
pub struct StorageDriver {
    slots: Vec<Arc<MmcsdSlot>>,
}

impl StorageDriver {
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// 注册一个卡槽并纳入上下文。空槽不算失败（插入后自动探测）。
    ///
    /// # 参数
    /// - `minor`: 次设备号，决定 `/dev/mmcsd<minor><suffix>` 名字
    /// - `dev`: 已就绪的主机控制器
    /// - `delay`: 平台延时实现；无定时器的环境可用 `SpinDelay`
    /// - `config`: 槽位设计选项（多块上限、写超时、DSR 等）
    pub fn attach_slot(
        &mut self,
        minor: u8,
        dev: Arc<dyn SdioDev>,
        delay: Box<dyn DelayOps>,
        config: MmcsdConfig,
    ) -> AxResult<Arc<MmcsdSlot>> {
        log::info!(target: "storage", "attach mmcsd slot {}", minor);
        let slot = mmcsd::slot_initialize(minor, dev, delay, config)?;
        self.slots.push(slot.clone());
        Ok(slot)
    }

    /// 默认配置 + 忙等延时的便捷注册
    pub fn attach_slot_default(
        &mut self,
        minor: u8,
        dev: Arc<dyn SdioDev>,
    ) -> AxResult<Arc<MmcsdSlot>> {
        self.attach_slot(minor, dev, Box::new(SpinDelay), MmcsdConfig::default())
    }

    pub fn slots(&self) -> &[Arc<MmcsdSlot>] {
        &self.slots
    }
}

impl Default for StorageDriver {
    fn default() -> Self {
        Self::new()
    }
}
