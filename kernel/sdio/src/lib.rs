//! # sdio — SDIO 主机控制器抽象
//!
//! 对应 Linux 内核 MMC 子系统中 host 一侧（include/linux/mmc/host.h、
//! drivers/mmc/host）暴露给卡驱动的那部分能力：命令下发与响应读取、
//! 数据阶段的 PIO/DMA 准备、事件等待、时钟与总线宽度配置、插拔回调。
//!
//! ## 模块划分
//!
//! | 模块  | 说明 |
//! |-------|------|
//! | types | 能力位、事件集、时钟档位、命令字编码 |
//! | host  | `SdioDev`：卡驱动消费的主机控制器契约 |
//! | delay | `DelayOps` 延时/让出接口与无时钟平台的忙等实现 |
//!
//! 卡驱动（mmcsd crate）只通过 `SdioDev` 访问控制器；控制器寄存器布局、
//! DMA 引擎与中断路由都在实现方内部，契约层不感知。

#![no_std]

extern crate alloc;

pub mod delay;
pub mod host;
pub mod types;

pub use delay::{DelayOps, SpinDelay};
pub use host::{MediaChangeCb, SdioDev};
pub use types::{
    caps, cmdflags, event, media, mkcmd, SdioClock, SdioEventSet,
};
