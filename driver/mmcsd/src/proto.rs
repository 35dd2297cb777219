//! MMC/SD 线上协议常量
//!
//! 命令字、R1/R6 状态位、OCR、CMD8 回显、ACMD 参数、CMD6(SWITCH) 参数
//! 编码与 CSD/EXT_CSD 字段偏移。位定义按 JEDEC JESD84 与 SD 物理层规范，
//! 与 Linux include/linux/mmc/{mmc.h,sd.h} 的取值一致。

use sdio::types::cmdflags::{DATA, RESP_NONE, RESP_R1, RESP_R1B, RESP_R2, RESP_R3, RESP_R6, RESP_R7, WRITE};
use sdio::types::mkcmd;

/// 命令字（索引 + 响应类型 + 数据方向）
pub mod cmd {
    use super::*;

    /// CMD0 GO_IDLE_STATE，无响应
    pub const CMD0: u32 = mkcmd(0, RESP_NONE);
    /// CMD1 SEND_OP_COND（仅 MMC），R3
    pub const MMC_CMD1: u32 = mkcmd(1, RESP_R3);
    /// CMD2 ALL_SEND_CID，R2
    pub const CMD2: u32 = mkcmd(2, RESP_R2);
    /// CMD3 SET_RELATIVE_ADDR（MMC：主机指定 RCA），R1
    pub const MMC_CMD3: u32 = mkcmd(3, RESP_R1);
    /// CMD3 SEND_RELATIVE_ADDR（SD：卡发布 RCA），R6
    pub const SD_CMD3: u32 = mkcmd(3, RESP_R6);
    /// CMD4 SET_DSR，广播无响应
    pub const CMD4: u32 = mkcmd(4, RESP_NONE);
    /// CMD6 SWITCH（MMC：写 EXT_CSD 字节），R1b
    pub const CMD6: u32 = mkcmd(6, RESP_R1B);
    /// CMD7 SELECT_CARD，选中时 R1b
    pub const CMD7S: u32 = mkcmd(7, RESP_R1B);
    /// CMD8 SEND_IF_COND（SD v2），R7
    pub const SD_CMD8: u32 = mkcmd(8, RESP_R7);
    /// CMD8 SEND_EXT_CSD（MMC，数据读 512B），R1
    pub const MMC_CMD8: u32 = mkcmd(8, RESP_R1) | DATA;
    /// CMD9 SEND_CSD，R2
    pub const CMD9: u32 = mkcmd(9, RESP_R2);
    /// CMD12 STOP_TRANSMISSION，R1b
    pub const CMD12: u32 = mkcmd(12, RESP_R1B);
    /// CMD13 SEND_STATUS，R1
    pub const CMD13: u32 = mkcmd(13, RESP_R1);
    /// CMD16 SET_BLOCKLEN，R1
    pub const CMD16: u32 = mkcmd(16, RESP_R1);
    /// CMD17 READ_SINGLE_BLOCK，R1 + 数据读
    pub const CMD17: u32 = mkcmd(17, RESP_R1) | DATA;
    /// CMD18 READ_MULTIPLE_BLOCK，R1 + 数据读
    pub const CMD18: u32 = mkcmd(18, RESP_R1) | DATA;
    /// CMD23 SET_BLOCK_COUNT，R1
    pub const CMD23: u32 = mkcmd(23, RESP_R1);
    /// CMD24 WRITE_BLOCK，R1 + 数据写
    pub const CMD24: u32 = mkcmd(24, RESP_R1) | DATA | WRITE;
    /// CMD25 WRITE_MULTIPLE_BLOCK，R1 + 数据写
    pub const CMD25: u32 = mkcmd(25, RESP_R1) | DATA | WRITE;
    /// CMD55 APP_CMD（ACMD 前缀），R1
    pub const SD_CMD55: u32 = mkcmd(55, RESP_R1);
    /// CMD56 GEN_CMD 读方向
    pub const CMD56RD: u32 = mkcmd(56, RESP_R1) | DATA;
    /// CMD56 GEN_CMD 写方向
    pub const CMD56WR: u32 = mkcmd(56, RESP_R1) | DATA | WRITE;

    /// ACMD6 SET_BUS_WIDTH，R1
    pub const SD_ACMD6: u32 = mkcmd(6, RESP_R1);
    /// ACMD23 SET_WR_BLK_ERASE_COUNT，R1
    pub const SD_ACMD23: u32 = mkcmd(23, RESP_R1);
    /// ACMD41 SD_SEND_OP_COND，R3
    pub const SD_ACMD41: u32 = mkcmd(41, RESP_R3);
    /// ACMD42 SET_CLR_CARD_DETECT，R1
    pub const SD_ACMD42: u32 = mkcmd(42, RESP_R1);
    /// ACMD51 SEND_SCR，R1 + 数据读 8B
    pub const SD_ACMD51: u32 = mkcmd(51, RESP_R1) | DATA;
}

/// R1 卡状态寄存器位
pub mod r1 {
    pub const OUTOFRANGE: u32 = 1 << 31;
    pub const ADDRESSERROR: u32 = 1 << 30;
    pub const BLOCKLENERROR: u32 = 1 << 29;
    pub const ERASESEQERROR: u32 = 1 << 28;
    pub const ERASEPARAM: u32 = 1 << 27;
    pub const WPVIOLATION: u32 = 1 << 26;
    pub const CARDISLOCKED: u32 = 1 << 25;
    pub const LOCKUNLOCKFAILED: u32 = 1 << 24;
    pub const COMCRCERROR: u32 = 1 << 23;
    pub const ILLEGALCOMMAND: u32 = 1 << 22;
    pub const CARDECCFAILED: u32 = 1 << 21;
    pub const CCERROR: u32 = 1 << 20;
    pub const ERROR: u32 = 1 << 19;
    pub const CIDCSDOVERWRITE: u32 = 1 << 16;
    pub const WPERASESKIP: u32 = 1 << 15;
    pub const ERASERESET: u32 = 1 << 13;
    pub const READYFORDATA: u32 = 1 << 8;
    pub const APPCMD: u32 = 1 << 5;

    /// 判为 I/O 失败的错误位集合
    pub const ERRORMASK: u32 = 0xfdff_e008;

    /// 当前状态字段（bits 12:9）
    pub const STATE_SHIFT: u32 = 9;
    pub const STATE_MASK: u32 = 0xf << STATE_SHIFT;

    pub const STATE_IDLE: u32 = 0;
    pub const STATE_READY: u32 = 1;
    pub const STATE_IDENT: u32 = 2;
    pub const STATE_STBY: u32 = 3;
    pub const STATE_TRAN: u32 = 4;
    pub const STATE_DATA: u32 = 5;
    pub const STATE_RCV: u32 = 6;
    pub const STATE_PRG: u32 = 7;
    pub const STATE_DIS: u32 = 8;

    /// 取出当前状态字段值
    #[inline(always)]
    pub const fn state(r1: u32) -> u32 {
        (r1 & STATE_MASK) >> STATE_SHIFT
    }
}

/// R6 发布 RCA 响应：[31:16] RCA，[15:0] 状态位子集
pub mod r6 {
    /// 状态子集中的错误位（COM_CRC、ILLEGAL_COMMAND、ERROR）
    pub const ERRORMASK: u32 = 0x0000_e000;
}

/// OCR / R3 相关位
pub mod ocr {
    /// 上电完成（低电平表示仍在初始化，置位才是就绪）
    pub const CARD_BUSY: u32 = 1 << 31;
    /// HCS/CCS：块寻址（高容量）
    pub const HIGHCAPACITY: u32 = 1 << 30;
    /// 标准容量（字节寻址）
    pub const STDCAPACITY: u32 = 0;
    /// VDD 3.2–3.3 V
    pub const VDD_32_33: u32 = 1 << 20;
    /// VDD 3.3–3.4 V
    pub const VDD_33_34: u32 = 1 << 21;
    /// ACMD41 电压窗（3.2–3.4 V）
    pub const ACMD41_VOLTAGEWINDOW_33_32: u32 = VDD_32_33 | VDD_33_34;
}

/// CMD8 参数与 R7 回显
pub mod cmd8 {
    /// 推荐检查图样 0xAA
    pub const CHECKPATTERN: u32 = 0x0000_00aa;
    /// VHS=1（2.7–3.6 V）
    pub const VOLTAGE_27: u32 = 0x0000_0100;
    pub const R7VOLTAGE_MASK: u32 = 0x0000_0f00;
    pub const R7VOLTAGE_27: u32 = 0x0000_0100;
    pub const R7ECHO_MASK: u32 = 0x0000_00ff;
}

/// ACMD 参数与 SCR 位
pub mod acmd {
    /// ACMD6 总线宽度：1-bit
    pub const BUSWIDTH_1: u32 = 0;
    /// ACMD6 总线宽度：4-bit
    pub const BUSWIDTH_4: u32 = 2;
    /// ACMD42 断开 CD/DAT3 上拉
    pub const CD_DISCONNECT: u32 = 0;

    /// SCR SD_BUS_WIDTHS 位：支持 1-bit
    pub const SCR_BUSWIDTH_1BIT: u8 = 1;
    /// SCR SD_BUS_WIDTHS 位：支持 4-bit
    pub const SCR_BUSWIDTH_4BIT: u8 = 4;
}

/// CMD6(SWITCH) 参数编码与 EXT_CSD 配置字节
///
/// ```text
/// [25:24] 访问模式（0b11 = 写字节）  [23:16] EXT_CSD 索引  [15:8] 值
/// ```
pub mod switch {
    /// 访问模式：写字节
    pub const MODE_WRITE_BYTE: u32 = 3;

    /// EXT_CSD[179] PARTITION_CONFIG（分区访问）
    pub const EXT_CSD_PART_CONF: u32 = 179;
    /// EXT_CSD[183] BUS_WIDTH
    pub const EXT_CSD_BUS_WIDTH: u32 = 183;
    /// EXT_CSD[185] HS_TIMING
    pub const EXT_CSD_HS_TIMING: u32 = 185;

    /// BUS_WIDTH 值：4-bit
    pub const EXT_CSD_BUS_WIDTH_4: u32 = 1;

    /// HS_TIMING 取值
    pub const HS_TIMING_BC: u8 = 0;
    pub const HS_TIMING_HS: u8 = 1;
    pub const HS_TIMING_HS200: u8 = 2;
    pub const HS_TIMING_HS400: u8 = 3;

    /// 组装「写字节」型 CMD6 参数
    #[inline(always)]
    pub const fn write_byte(index: u32, value: u32) -> u32 {
        (MODE_WRITE_BYTE << 24) | ((index & 0xff) << 16) | ((value & 0xff) << 8)
    }

    /// CMD6 参数：切换总线宽度
    #[inline(always)]
    pub const fn bus_width(value: u32) -> u32 {
        write_byte(EXT_CSD_BUS_WIDTH, value)
    }

    /// CMD6 参数：切换 HS_TIMING
    #[inline(always)]
    pub const fn hs_timing(value: u32) -> u32 {
        write_byte(EXT_CSD_HS_TIMING, value)
    }
}

/// EXT_CSD（512B）字段偏移
pub mod extcsd {
    /// 分区几何设置已生效
    pub const PARTITION_SETTING_COMPLETED: usize = 155;
    /// 分区支持能力位
    pub const PARTITION_SUPPORT: usize = 160;
    /// PARTITION_SUPPORT 中的分区使能位
    pub const PART_SUPPORT_PART_EN: u8 = 0x01;
    /// RPMB 容量乘数（128 KiB 单位）
    pub const RPMB_SIZE_MULT: usize = 168;
    /// GP 分区乘数起点（每分区 3 字节小端）
    pub const GP_SIZE_MULT: usize = 143;
    /// 用户区扇区数（小端 u32）
    pub const SEC_COUNT: usize = 212;
    /// 高容量写保护组大小
    pub const HC_WP_GRP_SIZE: usize = 221;
    /// 高容量擦除组大小
    pub const HC_ERASE_GRP_SIZE: usize = 224;
    /// BOOT 分区容量乘数（128 KiB 单位）
    pub const BOOT_SIZE_MULT: usize = 226;
}

/// CSD C_SIZE 为该值时表示 >2 GB，真实容量在 EXT_CSD SEC_COUNT
pub const CSD_CSIZE_THRESHOLD: u32 = 0xfff;

/// 卡类型：SD/MMC 判别 + 正交的块寻址标志
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CardType(u8);

impl CardType {
    pub const UNKNOWN: CardType = CardType(0);
    pub const SDV1: CardType = CardType(0x01);
    pub const SDV2: CardType = CardType(0x02);
    pub const MMC: CardType = CardType(0x04);

    const BLOCK: u8 = 0x08;

    #[inline]
    pub fn is_unknown(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn is_sd(self) -> bool {
        self.0 & (Self::SDV1.0 | Self::SDV2.0) != 0
    }

    #[inline]
    pub fn is_mmc(self) -> bool {
        self.0 & Self::MMC.0 != 0
    }

    /// 块寻址（SDHC/SDXC、高容量 eMMC）
    #[inline]
    pub fn is_block(self) -> bool {
        self.0 & Self::BLOCK != 0
    }

    #[inline]
    pub fn mark_block_addressed(&mut self) {
        self.0 |= Self::BLOCK;
    }

    /// 去掉寻址标志后的基础类型（用于按类型分派初始化）
    #[inline]
    pub fn base(self) -> CardType {
        CardType(self.0 & !Self::BLOCK)
    }
}

/// eMMC 硬件分区索引
pub mod part {
    pub const USER: usize = 0;
    pub const BOOT0: usize = 1;
    pub const BOOT1: usize = 2;
    pub const RPMB: usize = 3;
    pub const GENP0: usize = 4;
    /// 分区槽总数（user + boot0/1 + rpmb + gp1..4）
    pub const COUNT: usize = 8;
}
