//! 槽位状态
//!
//! 一槽一把锁：所有公共入口在整个操作期间持有 `MmcsdSlot::state` 的
//! `spin::Mutex`，槽内命令序列因此全序化（包括插拔回调）。状态结构
//! 本体只在锁内可达，主机句柄与延时提供方也放在其中。

use alloc::boxed::Box;
use alloc::sync::Arc;

use sdio::{DelayOps, SdioDev};
use spin::Mutex;

use crate::proto::{part, CardType};

/// 驱动引用计数上限（open 次数）
pub const MAX_CREFS: u8 = u8::MAX;

/// 时序参数（微秒）
pub mod timing {
    /// 上电后总线静默（74 个时钟 @400 kHz ≈ 185 µs，取 250）
    pub const POWERUP_DELAY_US: u32 = 250;
    /// CMD0 后等卡回到 IDLE
    pub const IDLE_DELAY_US: u32 = 100_000;
    /// CMD4 写 DSR 后的稳定时间
    pub const DSR_DELAY_US: u32 = 100_000;
    /// 切换时钟档位后的稳定时间
    pub const CLK_DELAY_US: u32 = 5_000;

    /// 读 SCR 的数据阶段超时（毫秒）
    pub const SCR_DATADELAY_MS: u32 = 100;
    /// 单块读数据阶段超时（毫秒），多块按块数线性放大
    pub const BLOCK_RDATADELAY_MS: u32 = 100;
    /// 忙轮询总预算（毫秒）：对应「一个 tick 秒」
    pub const READY_WAIT_MS: u32 = 1000;
    /// 忙轮询间隔（毫秒）
    pub const READY_POLL_MS: u32 = 1;
    /// 识别阶段 ACMD41/CMD1 重试间隔（毫秒）
    pub const IDENT_POLL_MS: u32 = 10;
}

/// 槽位设计选项。均为普通数据，注册槽位时传入。
#[derive(Debug, Clone)]
pub struct MmcsdConfig {
    /// 单条 CMD18/CMD25 的最大块数；0 = 不限，1 = 关闭多块传输
    pub multiblock_limit: usize,
    /// 单块写数据阶段超时（毫秒），多块按块数线性放大
    pub block_wdatadelay_ms: u32,
    /// CMD4 要写入的 DSR 值；None 则不发 CMD4
    pub dsr: Option<u16>,
    /// 每次写后武装硬件写完成等待，下次 transfer_ready 先消费该事件
    pub wrcomplete_wait: bool,
    /// 忙轮询用让出代替睡眠（tick 较粗的平台避免写速度塌陷）
    pub busy_yield: bool,
}

impl Default for MmcsdConfig {
    fn default() -> Self {
        Self {
            multiblock_limit: 0,
            block_wdatadelay_ms: 260,
            dsr: None,
            wrcomplete_wait: false,
            busy_yield: false,
        }
    }
}

/// 槽位状态（锁内部分）
pub struct MmcsdState {
    /// 主机控制器句柄（主机生命周期长于槽位）
    pub(crate) dev: Arc<dyn SdioDev>,
    /// 延时/让出提供方
    pub(crate) delay: Box<dyn DelayOps>,
    pub(crate) config: MmcsdConfig,
    /// 次设备号，决定 /dev/mmcsd<minor><suffix> 名字
    pub(crate) minor: u8,

    /// 主机能力位（注册时读取）
    pub(crate) caps: u8,
    pub(crate) cardtype: CardType,
    /// 相对卡地址（SD 由卡发布，MMC 由主机指定为 1）
    pub(crate) rca: u16,
    /// 原始 CID/CSD，保留给 ioctl 透传
    pub(crate) cid: [u32; 4],
    pub(crate) csd: [u32; 4],
    /// 归一化后恒为 512 / 9
    pub(crate) blocksize: u32,
    pub(crate) blockshift: u32,
    /// SCR SD_BUS_WIDTHS 位图
    pub(crate) buswidth: u8,
    pub(crate) widebus: bool,
    /// 最近一次 CMD16 参数缓存（0 = 未设置），相同值不再重发
    pub(crate) selblocklen: u32,
    /// CSD 报告卡支持 DSR
    pub(crate) dsrimp: bool,
    /// CSD 永久或临时写保护位
    pub(crate) wrprotect: bool,
    /// 最近一次 R1 报告 CARD_IS_LOCKED
    pub(crate) locked: bool,
    /// 已发出写且尚未确认编程完成；任何传输开始前须先清除
    pub(crate) wrbusy: bool,
    /// SCR CMD_SUPPORT：SD 卡可用 CMD23
    pub(crate) cmd23support: bool,
    /// 当前 PARTITION_ACCESS 值（最近一次 CMD6 写入）
    pub(crate) partnum: u8,
    /// 各分区块数；0 表示该分区不存在、不注册设备
    pub(crate) part_nblocks: [u64; part::COUNT],
    /// open 引用计数
    pub(crate) crefs: u8,
    pub(crate) probed: bool,
    pub(crate) mediachanged: bool,
    /// EXT_CSD HS_TIMING 当前值
    pub(crate) mode: u8,
}

impl MmcsdState {
    pub(crate) fn new(
        dev: Arc<dyn SdioDev>,
        delay: Box<dyn DelayOps>,
        config: MmcsdConfig,
        minor: u8,
    ) -> Self {
        Self {
            dev,
            delay,
            config,
            minor,
            caps: 0,
            cardtype: CardType::UNKNOWN,
            rca: 0,
            cid: [0; 4],
            csd: [0; 4],
            blocksize: 0,
            blockshift: 0,
            buswidth: 0,
            widebus: false,
            selblocklen: 0,
            dsrimp: false,
            wrprotect: false,
            locked: false,
            wrbusy: false,
            cmd23support: false,
            partnum: 0,
            part_nblocks: [0; part::COUNT],
            crefs: 0,
            probed: false,
            mediachanged: false,
            mode: 0,
        }
    }

    /// 槽内无已识别的卡
    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.cardtype.is_unknown()
    }

    /// 卡上锁或写保护（CSD 软保护 / 机械开关 / 卡锁定）
    pub(crate) fn wrprotected(&self) -> bool {
        self.wrprotect || self.locked || self.dev.wrprotected()
    }
}

/// 一个 MMC/SD 卡槽
pub struct MmcsdSlot {
    pub(crate) state: Mutex<MmcsdState>,
}

/// 容量换算（KiB）：`s >= 10 ? nblocks << (s-10) : nblocks >> (10-s)`
#[inline]
pub const fn capacity_kb(nblocks: u64, blockshift: u32) -> u64 {
    if blockshift >= 10 {
        nblocks << (blockshift - 10)
    } else {
        nblocks >> (10 - blockshift)
    }
}
