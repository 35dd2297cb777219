//! # mmcsd — MMC/SD 卡驱动核心
//!
//! 位于 SDIO 主机控制器（`sdio::SdioDev`）之上的卡生命周期与传输状态
//! 机：上电识别、几何解码、总线宽度与时钟协商进入数据传输态；逐请求
//! 在忙状态、DMA 对齐、多块上限与写保护规则约束下搬运数据块。
//!
//! ## 模块
//!
//! | 模块     | 说明 |
//! |----------|------|
//! | proto    | 线上协议常量：命令字、R1/R6、OCR、CMD6 编码、EXT_CSD 偏移 |
//! | slot     | 槽位状态（单锁）、配置与时序参数 |
//! | cmd      | 命令原语：下发轮询、R1/R6 归类、CMD13 状态、CMD6 切换 |
//! | decode   | CSD/SCR/EXT_CSD 解码与几何归一化 |
//! | dma      | DMA 对齐反弹缓冲 |
//! | transfer | 忙就绪跟踪与单块/多块读写 |
//! | ident    | 卡类型识别状态机 |
//! | init     | SD/MMC 初始化与宽总线协商 |
//! | blockdev | 块设备门面、分区注册与插拔生命周期 |
//! | ioc      | 原始命令透传 |
//!
//! 并发模型：每槽一把互斥锁，所有公共入口整段持锁；插拔回调与在途
//! 传输在同一把锁上串行化。

#![no_std]

extern crate alloc;

mod cmd;
mod decode;
mod dma;
mod ident;
mod init;
mod transfer;

pub mod blockdev;
pub mod ioc;
pub mod proto;
pub mod slot;

#[cfg(test)]
pub(crate) mod testutil;

pub use blockdev::{slot_initialize, MmcsdPart, PART_NAMES};
pub use ioc::{
    MmcIocCmd, MmcIocMultiCmd, MMC_IOC_CMD, MMC_IOC_MAX_CMDS, MMC_IOC_MULTI_CMD,
};
pub use proto::CardType;
pub use slot::{capacity_kb, MmcsdConfig, MmcsdSlot};
