//! 卡初始化
//!
//! 识别完成后按类型走 SD 或 MMC 序列：CMD2/CMD3 进入数据传输模式、
//! CSD/SCR/EXT_CSD 读取与解码、CMD7 选卡、宽总线协商与时钟提档。
//! 只支持单卡：选中后一直保持选中。

use axerrno::{LinuxError, LinuxResult};
use sdio::types::{caps, event, SdioClock};

use crate::proto::{acmd, cmd, r1, switch};
use crate::slot::{timing, MmcsdState};

/// HS_TIMING 值的可读名（诊断输出用）
pub(crate) fn mode_name(mode: u8) -> &'static str {
    match mode {
        switch::HS_TIMING_BC => "backwards compatibility",
        switch::HS_TIMING_HS => "high speed",
        switch::HS_TIMING_HS200 => "HS200",
        switch::HS_TIMING_HS400 => "HS400",
        _ => "unknown",
    }
}

impl MmcsdState {
    /// SD 卡初始化。进入时 CMD0/ACMD41 已完成、卡已就绪。
    pub(crate) fn sd_initialize(&mut self) -> LinuxResult<()> {
        // CMD2 ALL_SEND_CID：单卡实现，读到即可。原始 CID 留给 ioctl。
        self.send_cmd_poll(cmd::CMD2, 0)?;
        self.cid = self.dev.recv_r2(cmd::CMD2).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "CMD2: {:?}", e);
            e
        })?;
        self.log_cid(self.cid);

        // CMD3：SD 卡自行发布 RCA（R6），进入 standby/数据传输模式
        self.send_cmd_poll(cmd::SD_CMD3, 0)?;
        self.recv_r6(cmd::SD_CMD3)?;
        log::info!(target: "storage::mmcsd", "RCA: {:#06x}", self.rca);

        // R1/R6 反映命令接收时的状态；状态迁移须另查
        self.verify_state(r1::STATE_STBY)?;

        // CMD9 SEND_CSD（standby 态）
        self.send_cmd_poll(cmd::CMD9, u32::from(self.rca) << 16)?;
        self.csd = self.dev.recv_r2(cmd::CMD9).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "could not get CSD: {:?}", e);
            e
        })?;
        let csd = self.csd;
        self.decode_csd(csd);

        // CMD7 选卡；此后一直保持选中
        self.send_cmd_poll(cmd::CMD7S, u32::from(self.rca) << 16)?;
        self.recv_r1(cmd::CMD7S)?;

        self.send_cmd4();

        // 先提到 1-bit 传输时钟；4-bit 在 SCR 解码后切换
        self.dev.clock(SdioClock::SdTransfer1Bit);
        self.delay.delay_us(timing::CLK_DELAY_US);

        if self.caps & caps::FOURBIT_ONLY != 0 {
            // 主机只有 4-bit：读 SCR 前就得把卡切过去
            self.buswidth = acmd::SCR_BUSWIDTH_4BIT;
            if let Err(e) = self.widebus() {
                log::warn!(target: "storage::mmcsd",
                    "failed to set wide bus operation: {:?}", e);
            }
        }

        // SCR 里有宽总线与 CMD23 支持信息
        let mut scr = [0u32; 2];
        self.get_scr(&mut scr).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "could not get SCR: {:?}", e);
            e
        })?;
        self.decode_scr(scr);

        if self.caps & caps::FOURBIT != 0 {
            if let Err(e) = self.widebus() {
                log::warn!(target: "storage::mmcsd",
                    "failed to set wide bus operation: {:?}", e);
            }
        }

        Ok(())
    }

    /// MMC/eMMC 初始化。块寻址的卡须读 EXT_CSD 才能得到真实容量，
    /// 而 EXT_CSD 只能在数据传输模式下读，故 CSD 解码分两遍。
    pub(crate) fn mmc_initialize(&mut self) -> LinuxResult<()> {
        log::info!(target: "storage::mmcsd", "initialising MMC card");

        self.send_cmd_poll(cmd::CMD2, 0)?;
        self.cid = self.dev.recv_r2(cmd::CMD2).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "CMD2: {:?}", e);
            e
        })?;
        self.log_cid(self.cid);

        // MMC 由主机指定 RCA；单卡恒为 1
        self.rca = 1;
        self.send_cmd_poll(cmd::MMC_CMD3, u32::from(self.rca) << 16)?;
        self.recv_r1(cmd::MMC_CMD3)?;

        self.verify_state(r1::STATE_STBY)?;

        self.send_cmd_poll(cmd::CMD9, u32::from(self.rca) << 16)?;
        self.csd = self.dev.recv_r2(cmd::CMD9).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "could not get CSD: {:?}", e);
            e
        })?;
        let csd = self.csd;
        self.decode_csd(csd);

        self.send_cmd4();

        self.send_cmd_poll(cmd::CMD7S, u32::from(self.rca) << 16)?;
        self.recv_r1(cmd::CMD7S)?;

        if self.caps & caps::FOURBIT_ONLY != 0 {
            // 主机只有 4-bit：读 EXT_CSD 前先把卡切过去
            self.buswidth = acmd::SCR_BUSWIDTH_4BIT;
            if let Err(e) = self.widebus() {
                log::warn!(target: "storage::mmcsd",
                    "failed to set wide bus operation: {:?}", e);
            }
        }

        if self.cardtype.is_block() {
            log::info!(target: "storage::mmcsd",
                "eMMC spec 4.0+ card, reading EXT_CSD");
            let mut ext = [0u8; 512];
            self.read_extcsd(&mut ext)?;
            self.decode_extcsd(&ext);
        }

        // EXT_CSD 填好用户区块数后再解一遍 CSD（0xFFF 情况不覆盖）
        let csd = self.csd;
        self.decode_csd(csd);

        // 主机 4-bit 可用即协商宽总线（EXT_CSD BUS_WIDTH 经 CMD6 写入）
        if self.caps & caps::ONEBIT_ONLY == 0 && self.caps & caps::FOURBIT != 0 {
            self.buswidth |= acmd::SCR_BUSWIDTH_4BIT;
        }

        // widebus 同时负责 MMC 传输时钟与 HS 切换，恒调用
        if let Err(e) = self.widebus() {
            log::warn!(target: "storage::mmcsd",
                "failed to set wide bus operation: {:?}", e);
        }

        Ok(())
    }

    /// 读 SCR（CMD55+ACMD51，8 字节数据读，PIO）
    pub(crate) fn get_scr(&mut self, scr: &mut [u32; 2]) -> LinuxResult<()> {
        self.set_block_len(8)?;

        let mut raw = [0u8; 8];
        self.dev.block_setup(8, 1);
        self.dev.recv_setup(&mut raw)?;
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            timing::SCR_DATADELAY_MS,
        );

        self.send_cmd_poll(cmd::SD_CMD55, u32::from(self.rca) << 16)?;
        if let Err(e) = self.recv_r1(cmd::SD_CMD55) {
            self.dev.cancel();
            return Err(e);
        }

        self.send_cmd_poll(cmd::SD_ACMD51, 0)?;
        if let Err(e) = self.recv_r1(cmd::SD_ACMD51) {
            self.dev.cancel();
            return Err(e);
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        scr[0] = u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]);
        scr[1] = u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]);
        Ok(())
    }

    /// 读 EXT_CSD（MMC CMD8 数据读 512B）
    pub(crate) fn read_extcsd(&mut self, extcsd: &mut [u8; 512]) -> LinuxResult<()> {
        if self.locked {
            log::warn!(target: "storage::mmcsd", "card is locked");
            return Err(LinuxError::EPERM);
        }

        extcsd.fill(0);

        let mut bounce = if self.caps & caps::DMASUPPORTED != 0
            && self.dev.dma_preflight(&extcsd[..]).is_err()
        {
            Some(crate::dma::BounceBuf::alloc(512)?)
        } else {
            None
        };

        self.transfer_ready()?;

        self.set_block_len(512)?;

        self.dev.block_setup(512, 1);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            timing::BLOCK_RDATADELAY_MS,
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let target = crate::dma::dma_recv_target(&mut bounce, &mut extcsd[..]);
            if let Err(e) = self.dev.dma_recv_setup(target) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.recv_setup(&mut extcsd[..])?;
        }

        self.send_cmd_poll(cmd::MMC_CMD8, 0)?;
        if let Err(e) = self.recv_r1(cmd::MMC_CMD8) {
            log::warn!(target: "storage::mmcsd", "could not get EXT_CSD: {:?}", e);
            self.dev.cancel();
            return Err(e);
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        if let Some(b) = &bounce {
            extcsd.copy_from_slice(b.as_slice());
        }
        self.dev.got_extcsd(&extcsd[..]);
        Ok(())
    }

    /// 宽总线协商与传输时钟选择。
    ///
    /// SD：ACMD42 断开 CD/DAT3 上拉（卡可不支持，失败仅告警）再 ACMD6
    /// 切 4-bit；MMC：CMD6 写 EXT_CSD BUS_WIDTH，HS 能力可用时顺带切
    /// HS_TIMING。type=Unknown 时走移除路径：窄总线并关时钟。
    pub(crate) fn widebus(&mut self) -> LinuxResult<()> {
        if self.cardtype.is_sd()
            && self.buswidth & acmd::SCR_BUSWIDTH_4BIT != 0
            && self.caps & caps::ONEBIT_ONLY == 0
        {
            log::info!(target: "storage::mmcsd", "setting SD bus width to 4-bit");

            self.send_cmd_poll(cmd::SD_CMD55, u32::from(self.rca) << 16)?;
            self.recv_r1(cmd::SD_CMD55)?;

            // ACMD42 是可选命令：不支持的卡在此报错，不影响宽总线切换
            self.send_cmd_poll(cmd::SD_ACMD42, acmd::CD_DISCONNECT)?;
            if let Err(e) = self.recv_r1(cmd::SD_ACMD42) {
                log::warn!(target: "storage::mmcsd",
                    "card does not support ACMD42: {:?}", e);
            }

            self.send_cmd_poll(cmd::SD_CMD55, u32::from(self.rca) << 16)?;
            self.recv_r1(cmd::SD_CMD55)?;

            self.send_cmd_poll(cmd::SD_ACMD6, acmd::BUSWIDTH_4)?;
            self.recv_r1(cmd::SD_ACMD6)?;
        } else if self.cardtype.is_mmc()
            && self.buswidth & acmd::SCR_BUSWIDTH_4BIT != 0
            && self.caps & caps::ONEBIT_ONLY == 0
        {
            self.send_cmd_poll(cmd::CMD6, switch::bus_width(switch::EXT_CSD_BUS_WIDTH_4))?;
            self.recv_r1(cmd::CMD6).map_err(|e| {
                log::warn!(target: "storage::mmcsd",
                    "setting MMC bus width failed: {:?}", e);
                e
            })?;
        } else if !self.cardtype.is_sd() && !self.cardtype.is_mmc() {
            // 尚无卡：退回窄总线并关时钟
            log::warn!(target: "storage::mmcsd", "no card inserted");
            self.dev.widebus(false);
            self.widebus = false;
            self.dev.clock(SdioClock::Disabled);
            self.delay.delay_us(timing::CLK_DELAY_US);
            return Ok(());
        }

        // 卡侧切好后再配主机
        if self.caps & caps::ONEBIT_ONLY == 0
            && (self.cardtype.is_mmc() || self.buswidth & acmd::SCR_BUSWIDTH_4BIT != 0)
        {
            log::info!(target: "storage::mmcsd", "wide bus operation selected");
            self.dev.widebus(true);
            self.widebus = true;
        } else {
            log::info!(target: "storage::mmcsd", "narrow bus operation selected");
            self.dev.widebus(false);
            self.widebus = false;
        }

        if self.cardtype.is_sd() {
            if self.buswidth & acmd::SCR_BUSWIDTH_4BIT != 0 {
                self.dev.clock(SdioClock::SdTransfer4Bit);
            } else {
                self.dev.clock(SdioClock::SdTransfer1Bit);
            }
        } else {
            if self.caps & caps::MMC_HS_MODE != 0 {
                self.send_cmd_poll(cmd::CMD6, switch::hs_timing(u32::from(switch::HS_TIMING_HS)))?;
                self.recv_r1(cmd::CMD6).map_err(|e| {
                    log::warn!(target: "storage::mmcsd",
                        "setting MMC speed mode failed: {:?}", e);
                    e
                })?;
                self.mode = switch::HS_TIMING_HS;
            }
            self.dev.clock(SdioClock::MmcTransfer);
        }

        self.delay.delay_us(timing::CLK_DELAY_US);
        Ok(())
    }
}
