//! SDIO 主机控制器契约
//!
//! 对应 Linux mmc_host_ops 暴露给核心层的能力面。卡驱动按以下节奏使用：
//!
//! 1. `send_cmd` + `wait_response` 下发命令并等响应就绪；
//! 2. `recv_r1/r2/r3/r6/r7` 按响应类型取回内容；
//! 3. 数据命令前依次 `block_setup` → `wait_enable` → `recv_setup`/
//!    `send_setup`（或 DMA 变体），命令发出后 `event_wait` 阻塞到
//!    完成/超时/出错；
//! 4. 失败路径调用 `cancel` 复位控制器数据状态机。
//!
//! 响应 CRC 校验由控制器完成，读取接口只返回载荷。可选操作给出返回
//! `ENOSYS` 的默认实现，能力以 `capabilities` 位协商。

use alloc::boxed::Box;
use axerrno::{LinuxError, LinuxResult};

use crate::types::{SdioClock, SdioEventSet};

/// 插拔回调。由控制器在线程上下文调用（不得在中断上下文直接回调）。
pub type MediaChangeCb = Box<dyn Fn() + Send + Sync>;

/// SDIO 主机控制器接口
pub trait SdioDev: Send + Sync {
    /// 主机能力位（`types::caps`）
    fn capabilities(&self) -> u8;

    /// 槽内是否有卡。无检测脚的平台恒返回 true，由识别流程试探。
    fn present(&self) -> bool;

    /// 机械写保护开关状态
    fn wrprotected(&self) -> bool {
        false
    }

    /// 配置接口时钟档位
    fn clock(&self, rate: SdioClock);

    /// 切换 1-bit/4-bit 数据线
    fn widebus(&self, wide: bool);

    /// 挂接控制器中断。失败返回 `EBUSY`。
    fn attach(&self) -> LinuxResult<()> {
        Ok(())
    }

    /// 发出一条命令（命令字编码见 `types::cmdflags`）
    fn send_cmd(&self, cmd: u32, arg: u32) -> LinuxResult<()>;

    /// 轮询等待该命令的响应就绪
    fn wait_response(&self, cmd: u32) -> LinuxResult<()>;

    /// 读取 48-bit 短响应载荷（R1/R1b）
    fn recv_r1(&self, cmd: u32) -> LinuxResult<u32>;

    /// 读取 136-bit 长响应（R2：CID/CSD）
    fn recv_r2(&self, cmd: u32) -> LinuxResult<[u32; 4]>;

    /// 读取 R3（OCR）
    fn recv_r3(&self, cmd: u32) -> LinuxResult<u32>;

    /// 读取 R6（RCA 发布）
    fn recv_r6(&self, cmd: u32) -> LinuxResult<u32>;

    /// 读取 R7（接口条件回显）
    fn recv_r7(&self, cmd: u32) -> LinuxResult<u32>;

    /// 配置数据阶段块大小与块数
    fn block_setup(&self, blocksize: u32, nblocks: u32);

    /// PIO 接收目标
    fn recv_setup(&self, buf: &mut [u8]) -> LinuxResult<()>;

    /// PIO 发送源
    fn send_setup(&self, buf: &[u8]) -> LinuxResult<()>;

    /// DMA 对齐预检。返回 Err 表示该缓冲区不满足 DMA 约束，须反弹。
    fn dma_preflight(&self, _buf: &[u8]) -> LinuxResult<()> {
        Ok(())
    }

    /// DMA 接收目标。缓冲区在 `event_wait` 返回前须保持有效。
    fn dma_recv_setup(&self, _buf: &mut [u8]) -> LinuxResult<()> {
        Err(LinuxError::ENOSYS)
    }

    /// DMA 发送源。约束同上。
    fn dma_send_setup(&self, _buf: &[u8]) -> LinuxResult<()> {
        Err(LinuxError::ENOSYS)
    }

    /// 预武装一次事件等待：关心的事件集与超时（毫秒）。
    /// 须在发起会产生事件的操作之前调用。
    fn wait_enable(&self, events: SdioEventSet, timeout_ms: u32);

    /// 阻塞到 `wait_enable` 武装的事件发生，返回实际唤醒事件集
    /// （总是非空，可能同时带成功与失败位）。
    fn event_wait(&self) -> SdioEventSet;

    /// 取消在途数据传输并复位数据状态机（失败路径调用）
    fn cancel(&self);

    /// 注册插拔回调（初始所有回调事件均关闭）
    fn register_callback(&self, cb: MediaChangeCb);

    /// 打开指定插拔事件的回调（`types::media` 位）
    fn callback_enable(&self, events: u8);

    /// EXT_CSD 读取完成后的钩子：部分控制器要在此记录卡的扇区数
    /// 以修正后续 DMA 边界判断。默认为空。
    fn got_extcsd(&self, _extcsd: &[u8]) {}
}
