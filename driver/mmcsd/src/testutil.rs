//! 测试工具：可编排的模拟主机与卡模型
//!
//! `MockSdio` 在 `SdioDev` 契约后面模拟一张卡：R1 状态机、OCR 忙轮询、
//! 写后编程倒计时、分区化块存储，并记录驱动发出的每条命令 (索引, 参数)
//! 与时钟/总线/回调配置，供各模块测试断言命令序列与参数。

use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;

use axerrno::{LinuxError, LinuxResult};
use sdio::types::{caps, cmd_index, event, media, SdioClock, SdioEventSet};
use sdio::{DelayOps, MediaChangeCb, SdioDev};
use spin::Mutex;

use crate::proto::{extcsd, r1};
use crate::slot::{MmcsdConfig, MmcsdSlot, MmcsdState};

/// 测试用空延时：立即返回，让忙轮询只受计数预算约束
pub(crate) struct NopDelay;

impl DelayOps for NopDelay {
    fn delay_us(&mut self, _us: u32) {}
    fn yield_now(&mut self) {}
}

/// 预置卡型号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MockCardKind {
    /// SD v1.x，字节寻址，SCR 仅 1-bit、无 CMD23
    SdV1,
    /// SD v2.x 块寻址（SDHC），SCR 4-bit + CMD23
    SdV2Block,
    /// 高容量 eMMC：CSD C_SIZE=0xFFF，EXT_CSD 提供几何与分区
    MmcBlock,
}

/// 待取响应
#[derive(Debug, Clone, Copy)]
enum Pending {
    None,
    R1(u32),
    R2([u32; 4]),
    R3(u32),
    R6(u32),
    R7(u32),
    /// 卡不响应（如对 SD 卡发 CMD1）
    Fail,
}

struct Card {
    kind: MockCardKind,
    block: bool,
    /// ACMD41/CMD1 返回未就绪（BUSY 位不置）的剩余次数
    ocr_busy_polls: u32,
    rca_pub: u16,
    cid: [u32; 4],
    csd: [u32; 4],
    scr8: [u8; 8],
    extcsd: Vec<u8>,
    /// 当前卡状态（r1::STATE_*）
    state: u32,
    /// 写/CMD6 后 CMD13 报 PRG 的次数
    prg_polls: u32,
    prg_remaining: u32,
    partition: u8,
    bus4: bool,
    hs_timing: u8,
    appcmd: bool,
    blocklen: u32,
    fail_acmd42: bool,
    /// 数据命令（CMD17/18/24/25）的 R1 带错误位
    fail_data_r1: bool,
    /// (分区, 块号) → 块内容
    storage: BTreeMap<(u8, u64), [u8; 512]>,
}

impl Card {
    fn new(kind: MockCardKind) -> Self {
        // SD 块寻址 CSD：READ_BL_LEN=9，C_SIZE 69:48
        fn sd_block_csd(csize: u32) -> [u32; 4] {
            [0, (9 << 16) | ((csize >> 16) & 0x3f), (csize & 0xffff) << 16, 0]
        }
        // 字节寻址/小容量 MMC CSD：C_SIZE 73:62 + C_SIZE_MULT 49:47
        fn byte_csd(readbllen: u32, csize: u32, mult: u32) -> [u32; 4] {
            [
                0,
                (readbllen << 16) | ((csize >> 2) & 0x3ff),
                ((csize & 3) << 30) | (mult << 15),
                0,
            ]
        }

        let (block, csd, scr8) = match kind {
            MockCardKind::SdV1 => (
                false,
                byte_csd(9, 2047, 7),
                [0x01, 0x01, 0x00, 0x00, 0, 0, 0, 0],
            ),
            MockCardKind::SdV2Block => (
                true,
                sd_block_csd(0x781f),
                // byte1 低半字节 = 总线宽度（1+4 bit），byte3 bit1 = CMD23
                [0x02, 0x05, 0x00, 0x02, 0, 0, 0, 0],
            ),
            MockCardKind::MmcBlock => (true, byte_csd(9, 0xfff, 7), [0; 8]),
        };

        let mut ext = alloc::vec![0u8; 512];
        if kind == MockCardKind::MmcBlock {
            ext[extcsd::SEC_COUNT + 2] = 0xec; // 0x00ec0000 = 15466496 块
            ext[extcsd::PARTITION_SUPPORT] = extcsd::PART_SUPPORT_PART_EN;
            ext[extcsd::PARTITION_SETTING_COMPLETED] = 1;
            ext[extcsd::BOOT_SIZE_MULT] = 8;
            ext[extcsd::RPMB_SIZE_MULT] = 2;
            ext[extcsd::HC_ERASE_GRP_SIZE] = 1;
            ext[extcsd::HC_WP_GRP_SIZE] = 1;
            ext[extcsd::GP_SIZE_MULT] = 1;
        }

        Self {
            kind,
            block,
            ocr_busy_polls: 0,
            rca_pub: 0x1234,
            cid: [0x1b534d45, 0x4d4d4331, 0x10001234, 0x5678a500],
            csd,
            scr8,
            extcsd: ext,
            state: r1::STATE_IDLE,
            prg_polls: 1,
            prg_remaining: 0,
            partition: 0,
            bus4: false,
            hs_timing: 0,
            appcmd: false,
            blocklen: 512,
            fail_acmd42: false,
            fail_data_r1: false,
            storage: BTreeMap::new(),
        }
    }

    fn is_sd(&self) -> bool {
        !matches!(self.kind, MockCardKind::MmcBlock)
    }

    /// 生成当前 R1；PRG 倒计时未归零时报告 PRG 态
    fn r1_now(&mut self) -> u32 {
        let state = if self.prg_remaining > 0 {
            self.prg_remaining = self.prg_remaining.saturating_sub(1);
            r1::STATE_PRG
        } else {
            self.state
        };
        (state << r1::STATE_SHIFT) | r1::READYFORDATA
    }

    /// 数据命令的地址参数 → 块号
    fn addr_blocks(&self, arg: u32) -> u64 {
        if self.block {
            u64::from(arg)
        } else {
            u64::from(arg) >> 9
        }
    }
}

struct Inner {
    caps: u8,
    present: bool,
    wp: bool,
    card: Card,
    force_event_error: bool,
    /// DMA 预检的对齐要求；0 = 任意缓冲都通过
    dma_align: usize,

    issued: Vec<(u8, u32)>,
    clocks: Vec<SdioClock>,
    widebus_wide: bool,
    callback_events: u8,
    dma_ptrs: Vec<usize>,
    cancels: usize,
    pending: Pending,
    /// recv_setup/dma_recv_setup 登记的目标缓冲
    recv_target: Option<(usize, usize)>,
    /// send_setup/dma_send_setup 暂存的发送数据
    send_data: Option<Vec<u8>>,
    pending_read: Option<Vec<u8>>,
    pending_write_addr: Option<u64>,
    setup_nblocks: u32,
}

pub(crate) struct MockSdio {
    inner: Mutex<Inner>,
    callback: Mutex<Option<MediaChangeCb>>,
}

impl MockSdio {
    pub(crate) fn with_card(kind: MockCardKind) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                caps: caps::DMASUPPORTED | caps::FOURBIT | caps::MMC_HS_MODE,
                present: true,
                wp: false,
                card: Card::new(kind),
                force_event_error: false,
                dma_align: 0,
                issued: Vec::new(),
                clocks: Vec::new(),
                widebus_wide: false,
                callback_events: 0,
                dma_ptrs: Vec::new(),
                cancels: 0,
                pending: Pending::None,
                recv_target: None,
                send_data: None,
                pending_read: None,
                pending_write_addr: None,
                setup_nblocks: 1,
            }),
            callback: Mutex::new(None),
        })
    }

    // ---- 测试编排 ----

    pub(crate) fn set_caps(&self, c: u8) {
        self.inner.lock().caps = c;
    }

    pub(crate) fn set_present(&self, present: bool) {
        self.inner.lock().present = present;
    }

    pub(crate) fn set_wrprotected(&self, wp: bool) {
        self.inner.lock().wp = wp;
    }

    pub(crate) fn set_dma_align(&self, align: usize) {
        self.inner.lock().dma_align = align;
    }

    pub(crate) fn set_ocr_busy_polls(&self, n: u32) {
        self.inner.lock().card.ocr_busy_polls = n;
    }

    pub(crate) fn set_prg_polls(&self, n: u32) {
        self.inner.lock().card.prg_polls = n;
    }

    /// 让卡进入编程态：接下来 prg_polls 次 CMD13 报 PRG
    pub(crate) fn begin_programming(&self) {
        let mut g = self.inner.lock();
        g.card.prg_remaining = g.card.prg_polls;
    }

    pub(crate) fn set_card_state(&self, state: u32) {
        self.inner.lock().card.state = state;
    }

    pub(crate) fn set_fail_acmd42(&self, fail: bool) {
        self.inner.lock().card.fail_acmd42 = fail;
    }

    pub(crate) fn set_fail_data_r1(&self, fail: bool) {
        self.inner.lock().card.fail_data_r1 = fail;
    }

    pub(crate) fn cancel_count(&self) -> usize {
        self.inner.lock().cancels
    }

    pub(crate) fn set_force_event_error(&self, force: bool) {
        self.inner.lock().force_event_error = force;
    }

    /// 模拟主机投递插拔回调（线程上下文）
    pub(crate) fn trigger_media_change(&self) {
        let cb = self.callback.lock().take();
        if let Some(cb) = cb {
            cb();
            *self.callback.lock() = Some(cb);
        }
    }

    // ---- 观测 ----

    pub(crate) fn issued_indices(&self) -> Vec<u8> {
        self.inner.lock().issued.iter().map(|&(i, _)| i).collect()
    }

    pub(crate) fn args_of(&self, idx: u8) -> Vec<u32> {
        self.inner
            .lock()
            .issued
            .iter()
            .filter(|&&(i, _)| i == idx)
            .map(|&(_, a)| a)
            .collect()
    }

    pub(crate) fn count_cmd(&self, idx: u8) -> usize {
        self.inner.lock().issued.iter().filter(|&&(i, _)| i == idx).count()
    }

    pub(crate) fn clear_issued(&self) {
        self.inner.lock().issued.clear();
    }

    pub(crate) fn last_clock(&self) -> Option<SdioClock> {
        self.inner.lock().clocks.last().copied()
    }

    pub(crate) fn bus_is_wide(&self) -> bool {
        self.inner.lock().widebus_wide
    }

    pub(crate) fn hs_timing(&self) -> u8 {
        self.inner.lock().card.hs_timing
    }

    pub(crate) fn dma_ptrs(&self) -> Vec<usize> {
        self.inner.lock().dma_ptrs.clone()
    }

    pub(crate) fn insert_callback_armed(&self) -> bool {
        self.inner.lock().callback_events & media::INSERTED != 0
    }
}

impl Inner {
    /// 卡侧命令处理：更新卡模型并暂存响应
    fn handle_cmd(&mut self, idx: u8, arg: u32) {
        let acmd = self.card.appcmd;
        if idx != 55 {
            self.card.appcmd = false;
        }

        self.pending = match (idx, acmd) {
            (0, _) => {
                self.card.state = r1::STATE_IDLE;
                self.card.partition = 0;
                self.card.bus4 = false;
                self.card.hs_timing = 0;
                self.card.appcmd = false;
                Pending::None
            }
            (1, _) => {
                if self.card.is_sd() {
                    Pending::Fail
                } else if self.card.ocr_busy_polls > 0 {
                    self.card.ocr_busy_polls -= 1;
                    Pending::R3(crate::proto::ocr::VDD_33_34)
                } else {
                    let mut ocr = crate::proto::ocr::VDD_33_34 | crate::proto::ocr::CARD_BUSY;
                    if self.card.block {
                        ocr |= crate::proto::ocr::HIGHCAPACITY;
                    }
                    self.card.state = r1::STATE_READY;
                    Pending::R3(ocr)
                }
            }
            (2, _) => {
                self.card.state = r1::STATE_IDENT;
                Pending::R2(self.card.cid)
            }
            (3, _) => {
                self.card.state = r1::STATE_STBY;
                if self.card.is_sd() {
                    Pending::R6(u32::from(self.card.rca_pub) << 16)
                } else {
                    Pending::R1(self.card.r1_now())
                }
            }
            (4, _) => Pending::None,
            (6, false) => {
                if self.card.is_sd() {
                    // SD 的 CMD6 功能切换未建模
                    Pending::R1(self.card.r1_now())
                } else {
                    // MMC SWITCH 写字节：经过 PRG 态
                    let index = (arg >> 16) & 0xff;
                    let value = ((arg >> 8) & 0xff) as u8;
                    match index {
                        179 => self.card.partition = value & 0x7,
                        183 => self.card.bus4 = value == 1,
                        185 => self.card.hs_timing = value,
                        _ => {}
                    }
                    self.card.prg_remaining = self.card.prg_polls;
                    Pending::R1(self.card.r1_now())
                }
            }
            (6, true) => {
                // ACMD6 SET_BUS_WIDTH
                self.card.bus4 = arg == 2;
                Pending::R1(self.card.r1_now())
            }
            (7, _) => {
                self.card.state = r1::STATE_TRAN;
                Pending::R1(self.card.r1_now())
            }
            (8, _) => {
                if self.card.is_sd() {
                    if self.card.kind == MockCardKind::SdV2Block {
                        // R7 回显电压域与检查图样
                        Pending::R7(arg & 0xfff)
                    } else {
                        Pending::Fail
                    }
                } else {
                    // MMC SEND_EXT_CSD：512B 数据读
                    self.pending_read = Some(self.card.extcsd.clone());
                    Pending::R1(self.card.r1_now())
                }
            }
            (9, _) => Pending::R2(self.card.csd),
            (12, _) => {
                self.card.state = r1::STATE_TRAN;
                Pending::R1(self.card.r1_now())
            }
            (13, _) => Pending::R1(self.card.r1_now()),
            (16, _) => {
                self.card.blocklen = arg;
                Pending::R1(self.card.r1_now())
            }
            (17, _) | (18, _) if self.card.fail_data_r1 => {
                Pending::R1(self.card.r1_now() | r1::ERROR | r1::CARDISLOCKED)
            }
            (24, _) | (25, _) if self.card.fail_data_r1 => {
                Pending::R1(self.card.r1_now() | r1::ERROR | r1::CARDISLOCKED)
            }
            (17, _) | (18, _) => {
                let addr = self.card.addr_blocks(arg);
                let n = if idx == 17 { 1 } else { self.setup_nblocks };
                let mut data = Vec::with_capacity(n as usize * 512);
                for i in 0..u64::from(n) {
                    let block = self
                        .card
                        .storage
                        .get(&(self.card.partition, addr + i))
                        .copied()
                        .unwrap_or([0u8; 512]);
                    data.extend_from_slice(&block);
                }
                self.pending_read = Some(data);
                Pending::R1(self.card.r1_now())
            }
            (23, false) => Pending::R1(self.card.r1_now()),
            (23, true) => Pending::R1(self.card.r1_now()), // ACMD23 预擦除提示
            (24, _) | (25, _) => {
                self.pending_write_addr = Some(self.card.addr_blocks(arg));
                Pending::R1(self.card.r1_now())
            }
            (41, true) => {
                if !self.card.is_sd() {
                    Pending::Fail
                } else if self.card.ocr_busy_polls > 0 {
                    self.card.ocr_busy_polls -= 1;
                    Pending::R3(crate::proto::ocr::ACMD41_VOLTAGEWINDOW_33_32)
                } else {
                    let mut ocr = crate::proto::ocr::ACMD41_VOLTAGEWINDOW_33_32
                        | crate::proto::ocr::CARD_BUSY;
                    if self.card.block {
                        ocr |= crate::proto::ocr::HIGHCAPACITY;
                    }
                    self.card.state = r1::STATE_READY;
                    Pending::R3(ocr)
                }
            }
            (42, true) => {
                if self.card.fail_acmd42 {
                    Pending::R1(self.card.r1_now() | r1::ILLEGALCOMMAND)
                } else {
                    Pending::R1(self.card.r1_now())
                }
            }
            (51, true) => {
                self.pending_read = Some(self.card.scr8.to_vec());
                Pending::R1(self.card.r1_now())
            }
            (55, _) => {
                self.card.appcmd = true;
                Pending::R1(self.card.r1_now() | r1::APPCMD)
            }
            (56, _) => {
                let addr = u64::from(arg);
                // 读方向先备好数据；写方向等 event 提交
                let block = self
                    .card
                    .storage
                    .get(&(self.card.partition, addr))
                    .copied()
                    .unwrap_or([0u8; 512]);
                self.pending_read = Some(block.to_vec());
                self.pending_write_addr = Some(addr);
                Pending::R1(self.card.r1_now())
            }
            _ => Pending::Fail,
        };
    }
}

impl SdioDev for MockSdio {
    fn capabilities(&self) -> u8 {
        self.inner.lock().caps
    }

    fn present(&self) -> bool {
        self.inner.lock().present
    }

    fn wrprotected(&self) -> bool {
        self.inner.lock().wp
    }

    fn clock(&self, rate: SdioClock) {
        self.inner.lock().clocks.push(rate);
    }

    fn widebus(&self, wide: bool) {
        self.inner.lock().widebus_wide = wide;
    }

    fn send_cmd(&self, cmd: u32, arg: u32) -> LinuxResult<()> {
        let idx = cmd_index(cmd);
        let mut g = self.inner.lock();
        g.issued.push((idx, arg));
        g.handle_cmd(idx, arg);
        Ok(())
    }

    fn wait_response(&self, _cmd: u32) -> LinuxResult<()> {
        match self.inner.lock().pending {
            Pending::Fail => Err(LinuxError::ETIMEDOUT),
            _ => Ok(()),
        }
    }

    fn recv_r1(&self, _cmd: u32) -> LinuxResult<u32> {
        match self.inner.lock().pending {
            Pending::R1(v) => Ok(v),
            Pending::Fail => Err(LinuxError::ETIMEDOUT),
            _ => Err(LinuxError::EINVAL),
        }
    }

    fn recv_r2(&self, _cmd: u32) -> LinuxResult<[u32; 4]> {
        match self.inner.lock().pending {
            Pending::R2(v) => Ok(v),
            Pending::Fail => Err(LinuxError::ETIMEDOUT),
            _ => Err(LinuxError::EINVAL),
        }
    }

    fn recv_r3(&self, _cmd: u32) -> LinuxResult<u32> {
        match self.inner.lock().pending {
            Pending::R3(v) => Ok(v),
            Pending::Fail => Err(LinuxError::ETIMEDOUT),
            _ => Err(LinuxError::EINVAL),
        }
    }

    fn recv_r6(&self, _cmd: u32) -> LinuxResult<u32> {
        match self.inner.lock().pending {
            Pending::R6(v) => Ok(v),
            Pending::Fail => Err(LinuxError::ETIMEDOUT),
            _ => Err(LinuxError::EINVAL),
        }
    }

    fn recv_r7(&self, _cmd: u32) -> LinuxResult<u32> {
        match self.inner.lock().pending {
            Pending::R7(v) => Ok(v),
            Pending::Fail => Err(LinuxError::ETIMEDOUT),
            _ => Err(LinuxError::EINVAL),
        }
    }

    fn block_setup(&self, _blocksize: u32, nblocks: u32) {
        self.inner.lock().setup_nblocks = nblocks;
    }

    fn recv_setup(&self, buf: &mut [u8]) -> LinuxResult<()> {
        let mut g = self.inner.lock();
        g.recv_target = Some((buf.as_mut_ptr() as usize, buf.len()));
        Ok(())
    }

    fn send_setup(&self, buf: &[u8]) -> LinuxResult<()> {
        let mut g = self.inner.lock();
        g.send_data = Some(buf.to_vec());
        Ok(())
    }

    fn dma_preflight(&self, buf: &[u8]) -> LinuxResult<()> {
        let align = self.inner.lock().dma_align;
        if align != 0 && (buf.as_ptr() as usize) % align != 0 {
            return Err(LinuxError::EFAULT);
        }
        Ok(())
    }

    fn dma_recv_setup(&self, buf: &mut [u8]) -> LinuxResult<()> {
        let mut g = self.inner.lock();
        g.dma_ptrs.push(buf.as_mut_ptr() as usize);
        g.recv_target = Some((buf.as_mut_ptr() as usize, buf.len()));
        Ok(())
    }

    fn dma_send_setup(&self, buf: &[u8]) -> LinuxResult<()> {
        let mut g = self.inner.lock();
        g.dma_ptrs.push(buf.as_ptr() as usize);
        g.send_data = Some(buf.to_vec());
        Ok(())
    }

    fn wait_enable(&self, _events: SdioEventSet, _timeout_ms: u32) {}

    fn event_wait(&self) -> SdioEventSet {
        let mut g = self.inner.lock();

        if g.force_event_error {
            g.recv_target = None;
            g.pending_read = None;
            return event::ERROR;
        }

        // 读：把卡侧备好的数据写进驱动登记的接收缓冲。裸指针来自
        // recv_setup 的缓冲，按契约在 event_wait 返回前保持有效。
        if let Some((ptr, len)) = g.recv_target.take() {
            if let Some(data) = g.pending_read.take() {
                let n = len.min(data.len());
                unsafe {
                    core::ptr::copy_nonoverlapping(data.as_ptr(), ptr as *mut u8, n);
                }
            }
            return event::TRANSFERDONE;
        }

        // 写：提交暂存数据并进入编程态
        if let Some(data) = g.send_data.take() {
            if let Some(addr) = g.pending_write_addr.take() {
                let partition = g.card.partition;
                for (i, chunk) in data.chunks(512).enumerate() {
                    let mut block = [0u8; 512];
                    block[..chunk.len()].copy_from_slice(chunk);
                    g.card.storage.insert((partition, addr + i as u64), block);
                }
                g.card.prg_remaining = g.card.prg_polls;
            }
            return event::TRANSFERDONE;
        }

        event::TRANSFERDONE | event::WRCOMPLETE
    }

    fn cancel(&self) {
        let mut g = self.inner.lock();
        g.cancels += 1;
        g.recv_target = None;
        g.send_data = None;
        g.pending_read = None;
        g.pending_write_addr = None;
    }

    fn register_callback(&self, cb: MediaChangeCb) {
        *self.callback.lock() = Some(cb);
    }

    fn callback_enable(&self, events: u8) {
        self.inner.lock().callback_events = events;
    }

    fn attach(&self) -> LinuxResult<()> {
        Ok(())
    }
}

// ---- 状态构造辅助 ----

/// 默认 SDHC 模拟主机上的裸状态（寄存器解码等不走主机的测试用）
pub(crate) fn new_state() -> MmcsdState {
    let mock = MockSdio::with_card(MockCardKind::SdV2Block);
    new_state_with(&mock)
}

/// 指定模拟主机上的裸状态，能力位已同步
pub(crate) fn new_state_with(mock: &Arc<MockSdio>) -> MmcsdState {
    let mut st = MmcsdState::new(
        mock.clone(),
        Box::new(NopDelay),
        MmcsdConfig::default(),
        0,
    );
    st.caps = mock.capabilities();
    st
}

/// 识别已完成的状态（cardtype 已判定，尚未初始化）
pub(crate) fn identified_state(kind: MockCardKind) -> (Arc<MockSdio>, MmcsdState) {
    let mock = MockSdio::with_card(kind);
    let mut st = new_state_with(&mock);
    st.card_identify().unwrap();
    mock.clear_issued();
    (mock, st)
}

/// 识别 + 初始化完成、命令记录已清空的状态
pub(crate) fn ready_sdv2_state(kind: MockCardKind) -> (Arc<MockSdio>, MmcsdState) {
    let (mock, mut st) = identified_state(kind);
    match kind {
        MockCardKind::MmcBlock => st.mmc_initialize().unwrap(),
        _ => st.sd_initialize().unwrap(),
    }
    mock.clear_issued();
    (mock, st)
}

/// 经 `slot_initialize` 完整注册的槽位（分区设备已挂到注册表）
pub(crate) fn probed_slot(
    kind: MockCardKind,
    minor: u8,
    config: MmcsdConfig,
) -> (Arc<MockSdio>, Arc<MmcsdSlot>) {
    let mock = MockSdio::with_card(kind);
    let slot = crate::blockdev::slot_initialize(minor, mock.clone(), Box::new(NopDelay), config)
        .unwrap();
    assert!(!slot.state.lock().cardtype.is_unknown(), "probe failed in fixture");
    mock.clear_issued();
    (mock, slot)
}
