//! 卡类型识别
//!
//! CMD0 → CMD1/CMD8/ACMD41 握手，判别 MMC / SD v1.x / SD v2.x 及容量
//! 寻址方式。进入时假定识别失败（type=Unknown），各分支成功后再改写。
//! OCR 的 BUSY 位语义反直觉：置位才表示初始化完成。

use axerrno::{LinuxError, LinuxResult};
use sdio::types::SdioClock;

use crate::proto::{cmd, cmd8, ocr, CardType};
use crate::slot::{timing, MmcsdState};

impl MmcsdState {
    /// 识别槽内的卡。成功后 `cardtype` 为具体类型；失败保持 Unknown，
    /// 调用方可重新 probe 重试。
    pub(crate) fn card_identify(&mut self) -> LinuxResult<()> {
        log::info!(target: "storage::mmcsd", "identifying card...");

        self.cardtype = CardType::UNKNOWN;

        if !self.dev.present() {
            log::info!(target: "storage::mmcsd", "no card present");
            return Err(LinuxError::ENODEV);
        }

        // 识别阶段时钟（<400 kHz）
        self.dev.clock(SdioClock::IdMode);

        // eMMC 预空闲：CMD0 参数 0xf0f0f0f0（JESD84 v4.41），SD 卡无影响
        self.send_cmd_poll(cmd::CMD0, 0xf0f0_f0f0)?;
        self.delay.delay_us(timing::IDLE_DELAY_US);

        // 上电后至少 74 个时钟周期方可开始总线通信
        self.delay.delay_us(timing::POWERUP_DELAY_US);

        // 标准复位：CMD0 参数 0
        self.send_cmd_poll(cmd::CMD0, 0)?;
        self.delay.delay_us(timing::IDLE_DELAY_US);

        let mut sdcapacity = ocr::STDCAPACITY;
        let mut mmccapacity = ocr::HIGHCAPACITY;

        // CMD1 仅 MMC 响应；有响应即可断定 MMC。SD 卡在此不应答，
        // 命令层的失败不向上传播。
        let _ = self.send_cmd_poll(cmd::MMC_CMD1, ocr::VDD_33_34 | mmccapacity);
        match self.dev.recv_r3(cmd::MMC_CMD1) {
            Err(e) => {
                log::debug!(target: "storage::mmcsd",
                    "CMD1 no response ({:?}), expected for SD cards", e);
                // 回到 IDLE 让总线恢复，再走 SD 判别
                self.send_cmd_poll(cmd::CMD0, 0)?;
                self.delay.delay_us(timing::IDLE_DELAY_US);
            }
            Ok(response) => {
                log::info!(target: "storage::mmcsd", "MMC card detected");
                self.cardtype = CardType::MMC;

                if response & ocr::HIGHCAPACITY != 0 {
                    log::info!(target: "storage::mmcsd", "MMC with block addressing");
                    mmccapacity = ocr::HIGHCAPACITY;
                    self.cardtype.mark_block_addressed();
                } else {
                    mmccapacity = ocr::STDCAPACITY;
                }

                if response & ocr::CARD_BUSY != 0 {
                    log::info!(target: "storage::mmcsd", "MMC card ready");
                    return Ok(());
                }
            }
        }

        if !self.cardtype.is_mmc() {
            // CMD8 验证 SD v2.x 接口条件（v1.0 与 MMC 保留不答）
            let sent = self
                .send_cmd_poll(cmd::SD_CMD8, cmd8::CHECKPATTERN | cmd8::VOLTAGE_27)
                .and_then(|_| self.dev.recv_r7(cmd::SD_CMD8));
            if let Ok(response) = sent {
                if response & cmd8::R7VOLTAGE_MASK == cmd8::R7VOLTAGE_27
                    && response & cmd8::R7ECHO_MASK == cmd8::CHECKPATTERN
                {
                    log::info!(target: "storage::mmcsd", "SD v2.x card");
                    self.cardtype = CardType::SDV2;
                    sdcapacity = ocr::HIGHCAPACITY;
                } else {
                    log::warn!(target: "storage::mmcsd", "bad R7: {:#010x}", response);
                    return Err(LinuxError::EIO);
                }
            }
        }

        // 此时类型为 Unknown、MMC 或 SDv2。循环发 CMD55+ACMD41（或 MMC
        // 的 CMD1）直到卡脱离忙或预算耗尽（约一秒）。
        let mut waited_ms = 0;
        while waited_ms < timing::READY_WAIT_MS {
            if !self.cardtype.is_mmc() {
                self.send_cmd_poll(cmd::SD_CMD55, 0)?;
                if let Err(e) = self.recv_r1(cmd::SD_CMD55) {
                    log::debug!(target: "storage::mmcsd", "CMD55 failed: {:?}", e);
                } else {
                    self.send_cmd_poll(
                        cmd::SD_ACMD41,
                        ocr::ACMD41_VOLTAGEWINDOW_33_32 | sdcapacity,
                    )?;
                    match self.dev.recv_r3(cmd::SD_ACMD41) {
                        Err(e) => {
                            // 超时多半意味着 MMC，交由下面的 CMD1 判别
                            log::debug!(target: "storage::mmcsd", "ACMD41: {:?}", e);
                        }
                        Ok(response) => {
                            // ACMD41 有响应即是 SD；CMD8 没认出 v2 则为 v1.x
                            if self.cardtype.is_unknown() {
                                log::info!(target: "storage::mmcsd", "SD v1.x card");
                                self.cardtype = CardType::SDV1;
                            }

                            if response & ocr::CARD_BUSY != 0 {
                                if response & ocr::HIGHCAPACITY != 0
                                    && self.cardtype == CardType::SDV2
                                {
                                    log::info!(target: "storage::mmcsd",
                                        "SD v2.x with block addressing");
                                    self.cardtype.mark_block_addressed();
                                }
                                break;
                            }
                        }
                    }
                }
            } else {
                // MMC 路径：重发 CMD1 直到 BUSY 置位（就绪）
                let _ = self.send_cmd_poll(cmd::MMC_CMD1, ocr::VDD_33_34 | mmccapacity);
                match self.dev.recv_r3(cmd::MMC_CMD1) {
                    Err(e) => {
                        log::warn!(target: "storage::mmcsd", "CMD1: {:?}", e);
                    }
                    Ok(response) => {
                        self.cardtype = CardType::MMC;
                        if response & ocr::HIGHCAPACITY != 0 {
                            mmccapacity = ocr::HIGHCAPACITY;
                            self.cardtype.mark_block_addressed();
                        } else {
                            mmccapacity = ocr::STDCAPACITY;
                        }

                        if response & ocr::CARD_BUSY != 0 {
                            log::info!(target: "storage::mmcsd", "MMC card ready");
                            break;
                        }
                        log::debug!(target: "storage::mmcsd", "MMC busy, waiting...");
                    }
                }
            }

            self.delay.delay_ms(timing::IDENT_POLL_MS);
            waited_ms += timing::IDENT_POLL_MS;
        }

        if waited_ms >= timing::READY_WAIT_MS || self.cardtype.is_unknown() {
            self.cardtype = CardType::UNKNOWN;
            log::warn!(target: "storage::mmcsd", "failed to identify card");
            return Err(LinuxError::EIO);
        }

        Ok(())
    }
}
