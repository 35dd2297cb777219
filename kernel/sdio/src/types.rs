//! SDIO 主机共用类型与常量
//!
//! 对应 Linux mmc_host 的 caps 位与 host 等待/完成事件的抽象。命令字编码
//! 为本仓库约定：卡驱动把「命令索引 + 响应类型 + 数据方向」编进一个 u32，
//! 控制器按响应类型位决定寄存器配置，不必各自维护命令表。

/// 主机能力位（`SdioDev::capabilities` 返回值）
pub mod caps {
    /// 仅支持 1-bit 数据线
    pub const ONEBIT_ONLY: u8 = 0x01;
    /// 数据阶段支持 DMA
    pub const DMASUPPORTED: u8 = 0x02;
    /// 写传输须先配置 DMA 再发写命令（控制器流水线要求）
    pub const DMABEFOREWRITE: u8 = 0x04;
    /// 支持 4-bit 数据线
    pub const FOURBIT: u8 = 0x08;
    /// 仅支持 4-bit（上电即须宽总线）
    pub const FOURBIT_ONLY: u8 = 0x10;
    /// MMC 高速时序可用
    pub const MMC_HS_MODE: u8 = 0x20;
}

/// 等待/唤醒事件集（位或组合）
pub type SdioEventSet = u8;

/// `SdioDev::wait_enable` / `event_wait` 使用的事件位
pub mod event {
    use super::SdioEventSet;

    /// 命令已发出
    pub const CMDDONE: SdioEventSet = 0x01;
    /// 响应已就绪
    pub const RESPONSEDONE: SdioEventSet = 0x02;
    /// 数据传输完成
    pub const TRANSFERDONE: SdioEventSet = 0x04;
    /// 等待超时
    pub const TIMEOUT: SdioEventSet = 0x08;
    /// 传输出错（CRC、FIFO 等，由控制器归并）
    pub const ERROR: SdioEventSet = 0x10;
    /// 写编程完成（D0 忙线释放，硬件看门狗路径）
    pub const WRCOMPLETE: SdioEventSet = 0x20;
}

/// 插拔回调事件位（`SdioDev::callback_enable`）
pub mod media {
    /// 卡已拔出
    pub const EJECTED: u8 = 0x01;
    /// 卡已插入
    pub const INSERTED: u8 = 0x02;
}

/// 接口时钟档位。具体频率由控制器决定，卡驱动只表达协议阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdioClock {
    /// 时钟关断（空槽/移除后）
    Disabled,
    /// 识别阶段时钟（< 400 kHz）
    IdMode,
    /// MMC 数据传输时钟
    MmcTransfer,
    /// SD 1-bit 传输时钟
    SdTransfer1Bit,
    /// SD 4-bit 传输时钟
    SdTransfer4Bit,
}

/// 命令字编码：
///
/// ```text
/// bits 5:0   命令索引 (0..63)
/// bits 8:6   响应类型（RESP_*）
/// bit  9     随后有数据阶段
/// bit  10    数据方向为写（须与 bit 9 同置）
/// ```
pub mod cmdflags {
    pub const CMDIDX_MASK: u32 = 0x3f;

    pub const RESP_SHIFT: u32 = 6;
    pub const RESP_MASK: u32 = 0x7 << RESP_SHIFT;
    pub const RESP_NONE: u32 = 0 << RESP_SHIFT;
    pub const RESP_R1: u32 = 1 << RESP_SHIFT;
    pub const RESP_R1B: u32 = 2 << RESP_SHIFT;
    pub const RESP_R2: u32 = 3 << RESP_SHIFT;
    pub const RESP_R3: u32 = 4 << RESP_SHIFT;
    pub const RESP_R6: u32 = 5 << RESP_SHIFT;
    pub const RESP_R7: u32 = 6 << RESP_SHIFT;

    pub const DATA: u32 = 1 << 9;
    pub const WRITE: u32 = 1 << 10;
}

/// 组装命令字（索引 + 响应类型；数据位由调用方按需位或）
#[inline(always)]
pub const fn mkcmd(idx: u32, resp: u32) -> u32 {
    (idx & cmdflags::CMDIDX_MASK) | resp
}

/// 取出命令索引
#[inline(always)]
pub const fn cmd_index(cmd: u32) -> u8 {
    (cmd & cmdflags::CMDIDX_MASK) as u8
}
