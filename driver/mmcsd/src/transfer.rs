//! 传输引擎
//!
//! 单块/多块读写的完整序列：锁定/写保护检查 → 分区切换 → DMA 预检与
//! 反弹 → 忙等就绪 → CMD16 → 主机数据阶段准备 → 数据命令 → 事件等待。
//! 写完成采用惰性确认：写路径只置 `wrbusy`，由下一次传输入口的
//! `transfer_ready` 轮询 CMD13 直到卡回到 TRAN。

use axerrno::{LinuxError, LinuxResult};
use sdio::types::{caps, event, SdioEventSet};

use crate::dma::{dma_recv_target, dma_send_source, BounceBuf};
use crate::proto::{cmd, part, r1};
use crate::slot::{timing, MmcsdState};

impl MmcsdState {
    /// 阻塞等待主机事件；唤醒事件含 failevents 中任一位则判失败。
    pub(crate) fn eventwait(&mut self, failevents: SdioEventSet) -> LinuxResult<()> {
        let wkup = self.dev.event_wait();
        if wkup & failevents != 0 {
            log::warn!(target: "storage::mmcsd", "awakened with {:#04x}", wkup);
            return if wkup & event::TIMEOUT != 0 {
                Err(LinuxError::ETIMEDOUT)
            } else {
                Err(LinuxError::EIO)
            };
        }
        Ok(())
    }

    /// 卡是否就绪可传输：卡仍在槽内，且上次写的编程阶段已结束。
    ///
    /// 写后卡处于 PRG（或仍在 RCV 排空 FIFO），轮询 CMD13 直到 TRAN；
    /// 其他状态视为协议错，预算耗尽返回超时。
    pub(crate) fn transfer_ready(&mut self) -> LinuxResult<()> {
        if self.is_empty() || !self.dev.present() {
            log::warn!(target: "storage::mmcsd", "card has been removed");
            return Err(LinuxError::ENODEV);
        }

        if !self.wrbusy {
            return Ok(());
        }

        if self.config.wrcomplete_wait {
            // 先消费写完成看门狗事件；失败不致命，仍回落到 CMD13 轮询
            if let Err(e) = self.eventwait(event::TIMEOUT | event::ERROR) {
                log::warn!(target: "storage::mmcsd",
                    "write-complete wait failed: {:?}", e);
            }
        }

        let mut waited_ms = 0;
        while waited_ms < timing::READY_WAIT_MS {
            let status = self.get_r1()?;
            let state = r1::state(status);

            if state == r1::STATE_TRAN {
                self.wrbusy = false;
                return Ok(());
            }

            // PRG/RCV 属正常的写后忙；其余状态多半是卡未选中（STBY/DIS）
            if state != r1::STATE_PRG && state != r1::STATE_RCV {
                log::warn!(target: "storage::mmcsd",
                    "unexpected R1 state: {:#010x}", status);
                return Err(LinuxError::EINVAL);
            }

            if self.config.busy_yield {
                self.delay.yield_now();
            } else {
                self.delay.delay_ms(timing::READY_POLL_MS);
            }
            waited_ms += timing::READY_POLL_MS;
        }

        Err(LinuxError::ETIMEDOUT)
    }

    /// CMD12 STOP_TRANSMISSION
    pub(crate) fn stop_transmission(&mut self) -> LinuxResult<()> {
        self.send_cmd_poll(cmd::CMD12, 0)?;
        self.recv_r1(cmd::CMD12).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "CMD12 failed: {:?}", e);
            e
        })
    }

    /// CMD16 SET_BLOCKLEN。与缓存一致时不重发。
    pub(crate) fn set_block_len(&mut self, blocklen: u32) -> LinuxResult<()> {
        if self.selblocklen == blocklen {
            return Ok(());
        }
        self.send_cmd_poll(cmd::CMD16, blocklen)?;
        self.recv_r1(cmd::CMD16)?;
        self.selblocklen = blocklen;
        Ok(())
    }

    /// CMD23 SET_BLOCK_COUNT
    pub(crate) fn set_block_count(&mut self, nblocks: u32) -> LinuxResult<()> {
        self.send_cmd_poll(cmd::CMD23, nblocks)?;
        self.recv_r1(cmd::CMD23).map_err(|e| {
            log::warn!(target: "storage::mmcsd", "CMD23 failed: {:?}", e);
            e
        })
    }

    /// 数据命令的地址参数：字节寻址卡用字节偏移，块寻址卡用块号
    #[inline]
    fn sector_offset(&self, startblock: u64) -> u32 {
        if self.cardtype.is_block() {
            startblock as u32
        } else {
            (startblock << self.blockshift) as u32
        }
    }

    /// 读方向的 DMA 预检：需要反弹时分配空缓冲
    fn bounce_for_read(&mut self, buf: &[u8]) -> LinuxResult<Option<BounceBuf>> {
        if self.caps & caps::DMASUPPORTED != 0 && self.dev.dma_preflight(buf).is_err() {
            return Ok(Some(BounceBuf::alloc(buf.len())?));
        }
        Ok(None)
    }

    /// 写方向的 DMA 预检：需要反弹时分配并预拷入
    fn bounce_for_write(&mut self, buf: &[u8]) -> LinuxResult<Option<BounceBuf>> {
        if self.caps & caps::DMASUPPORTED != 0 && self.dev.dma_preflight(buf).is_err() {
            return Ok(Some(BounceBuf::alloc_from(buf)?));
        }
        Ok(None)
    }

    /// 读单块（CMD17）。返回读取的块数（1）。
    pub(crate) fn read_single(
        &mut self,
        partnum: usize,
        buf: &mut [u8],
        startblock: u64,
    ) -> LinuxResult<u32> {
        log::debug!(target: "storage::mmcsd", "read single: block {}", startblock);

        if self.locked {
            log::warn!(target: "storage::mmcsd", "card is locked");
            return Err(LinuxError::EPERM);
        }

        self.select_partition(partnum)?;

        let mut bounce = self.bounce_for_read(&buf[..self.blocksize as usize])?;

        self.transfer_ready()?;

        let offset = self.sector_offset(startblock);
        let blocksize = self.blocksize;
        self.set_block_len(blocksize)?;

        self.dev.block_setup(blocksize, 1);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            timing::BLOCK_RDATADELAY_MS,
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let target = dma_recv_target(&mut bounce, buf);
            if let Err(e) = self.dev.dma_recv_setup(&mut target[..blocksize as usize]) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.recv_setup(&mut buf[..blocksize as usize])?;
        }

        self.send_cmd_poll(cmd::CMD17, offset)?;
        if let Err(e) = self.recv_r1(cmd::CMD17) {
            self.dev.cancel();
            return Err(e);
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        if let Some(b) = &bounce {
            buf[..blocksize as usize].copy_from_slice(b.as_slice());
        }
        Ok(1)
    }

    /// 读多块（CMD18）。MMC 与支持 CMD23 的 SD 卡先发 CMD23 预设块数；
    /// 不支持 CMD23 的 SD 卡在数据完成后发 CMD12。返回读取的块数。
    pub(crate) fn read_multiple(
        &mut self,
        partnum: usize,
        buf: &mut [u8],
        startblock: u64,
        nblocks: u32,
    ) -> LinuxResult<u32> {
        let nbytes = (nblocks as usize) << self.blockshift;
        log::debug!(target: "storage::mmcsd",
            "read multiple: block {} count {}", startblock, nblocks);

        if self.locked {
            log::warn!(target: "storage::mmcsd", "card is locked");
            return Err(LinuxError::EPERM);
        }

        self.select_partition(partnum)?;

        let mut bounce = self.bounce_for_read(&buf[..nbytes])?;

        self.transfer_ready()?;

        let offset = self.sector_offset(startblock);
        let blocksize = self.blocksize;
        self.set_block_len(blocksize)?;

        self.dev.block_setup(blocksize, nblocks);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            nblocks.saturating_mul(timing::BLOCK_RDATADELAY_MS),
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let target = dma_recv_target(&mut bounce, buf);
            if let Err(e) = self.dev.dma_recv_setup(&mut target[..nbytes]) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.recv_setup(&mut buf[..nbytes])?;
        }

        if self.cardtype.is_mmc() || (self.cardtype.is_sd() && self.cmd23support) {
            self.set_block_count(nblocks)?;
        }

        self.send_cmd_poll(cmd::CMD18, offset)?;
        if let Err(e) = self.recv_r1(cmd::CMD18) {
            self.dev.cancel();
            return Err(e);
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        if self.cardtype.is_sd() && !self.cmd23support {
            self.stop_transmission()?;
        }

        if let Some(b) = &bounce {
            buf[..nbytes].copy_from_slice(b.as_slice());
        }
        Ok(nblocks)
    }

    /// 写单块（CMD24）。命令与 DMA 准备的先后由 DMABEFOREWRITE 决定。
    /// 成功后置 `wrbusy`，编程完成由下一次传输确认。
    pub(crate) fn write_single(
        &mut self,
        partnum: usize,
        buf: &[u8],
        startblock: u64,
    ) -> LinuxResult<u32> {
        log::debug!(target: "storage::mmcsd", "write single: block {}", startblock);

        if self.wrprotected() {
            log::warn!(target: "storage::mmcsd", "card is locked or write protected");
            return Err(LinuxError::EPERM);
        }

        self.select_partition(partnum)?;

        let bounce = self.bounce_for_write(&buf[..self.blocksize as usize])?;

        self.transfer_ready()?;

        let offset = self.sector_offset(startblock);
        let blocksize = self.blocksize;
        self.set_block_len(blocksize)?;

        // 不要求先配 DMA 的控制器：先发 CMD24
        if self.caps & caps::DMABEFOREWRITE == 0 {
            self.send_cmd_poll(cmd::CMD24, offset)?;
            self.recv_r1(cmd::CMD24)?;
        }

        self.dev.block_setup(blocksize, 1);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            self.config.block_wdatadelay_ms,
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let source = dma_send_source(&bounce, buf);
            if let Err(e) = self.dev.dma_send_setup(&source[..blocksize as usize]) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.send_setup(&buf[..blocksize as usize])?;
        }

        // 要求先配 DMA 的控制器：此时才发 CMD24
        if self.caps & caps::DMABEFOREWRITE != 0 {
            self.send_cmd_poll(cmd::CMD24, offset)?;
            if let Err(e) = self.recv_r1(cmd::CMD24) {
                self.dev.cancel();
                return Err(e);
            }
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        self.wrbusy = true;
        if self.config.wrcomplete_wait {
            self.dev.wait_enable(
                event::WRCOMPLETE | event::TIMEOUT,
                self.config.block_wdatadelay_ms,
            );
        }
        Ok(1)
    }

    /// 写多块（CMD25）。SD 先发 ACMD23 预擦除提示；块数预设经 CMD23
    /// （RPMB 分区置 bit31 表示可靠写）。数据阶段失败但仍需 STOP 时，
    /// 照发 CMD12，返回值以数据阶段错误为准。
    pub(crate) fn write_multiple(
        &mut self,
        partnum: usize,
        buf: &[u8],
        startblock: u64,
        nblocks: u32,
    ) -> LinuxResult<u32> {
        let nbytes = (nblocks as usize) << self.blockshift;
        log::debug!(target: "storage::mmcsd",
            "write multiple: block {} count {}", startblock, nblocks);

        if self.wrprotected() {
            log::warn!(target: "storage::mmcsd", "card is locked or write protected");
            return Err(LinuxError::EPERM);
        }

        self.select_partition(partnum)?;

        let bounce = self.bounce_for_write(&buf[..nbytes])?;

        self.transfer_ready()?;

        let offset = self.sector_offset(startblock);
        let blocksize = self.blocksize;
        self.set_block_len(blocksize)?;

        if self.cardtype.is_sd() {
            // ACMD23 预擦除提示，可加速随后的多块写
            self.send_cmd_poll(cmd::SD_CMD55, u32::from(self.rca) << 16)?;
            self.recv_r1(cmd::SD_CMD55)?;
            self.send_cmd_poll(cmd::SD_ACMD23, nblocks)?;
            self.recv_r1(cmd::SD_ACMD23)?;
        }

        if self.cardtype.is_mmc() {
            // RPMB 的写须经 CMD23 且 bit31 置 1（可靠写）
            let count = if self.partnum as usize == part::RPMB {
                (1 << 31) | nblocks
            } else {
                nblocks
            };
            self.set_block_count(count)?;
        } else if self.cardtype.is_sd() && self.cmd23support {
            self.set_block_count(nblocks)?;
        }

        if self.caps & caps::DMABEFOREWRITE == 0 {
            self.send_cmd_poll(cmd::CMD25, offset)?;
            self.recv_r1(cmd::CMD25)?;
        }

        self.dev.block_setup(blocksize, nblocks);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            nblocks.saturating_mul(self.config.block_wdatadelay_ms),
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let source = dma_send_source(&bounce, buf);
            if let Err(e) = self.dev.dma_send_setup(&source[..nbytes]) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.send_setup(&buf[..nbytes])?;
        }

        if self.caps & caps::DMABEFOREWRITE != 0 {
            self.send_cmd_poll(cmd::CMD25, offset)?;
            if let Err(e) = self.recv_r1(cmd::CMD25) {
                self.dev.cancel();
                return Err(e);
            }
        }

        // 数据阶段失败时卡多半停在 RCV，仍须 STOP 把它拉回 TRAN；
        // 原始错误优先返回，STOP 尽力而为
        let evret = self.eventwait(event::TIMEOUT | event::ERROR);

        if self.cardtype.is_sd() && !self.cmd23support {
            let stop = self.stop_transmission();
            evret?;
            stop?;
        } else {
            evret?;
        }

        self.wrbusy = true;
        if self.config.wrcomplete_wait {
            self.dev.wait_enable(
                event::WRCOMPLETE | event::TIMEOUT,
                nblocks.saturating_mul(self.config.block_wdatadelay_ms),
            );
        }
        Ok(nblocks)
    }

    /// CMD56 通用命令，读方向，一个块
    pub(crate) fn general_cmd_read(&mut self, buf: &mut [u8], arg: u32) -> LinuxResult<()> {
        if self.locked {
            log::warn!(target: "storage::mmcsd", "card is locked");
            return Err(LinuxError::EPERM);
        }

        let mut bounce = self.bounce_for_read(&buf[..self.blocksize as usize])?;

        self.transfer_ready()?;

        let blocksize = self.blocksize;
        self.set_block_len(blocksize)?;

        self.dev.block_setup(blocksize, 1);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            timing::BLOCK_RDATADELAY_MS,
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let target = dma_recv_target(&mut bounce, buf);
            if let Err(e) = self.dev.dma_recv_setup(&mut target[..blocksize as usize]) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.recv_setup(&mut buf[..blocksize as usize])?;
        }

        self.send_cmd_poll(cmd::CMD56RD, arg)?;
        if let Err(e) = self.recv_r1(cmd::CMD56RD) {
            self.dev.cancel();
            return Err(e);
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        if let Some(b) = &bounce {
            buf[..blocksize as usize].copy_from_slice(b.as_slice());
        }
        Ok(())
    }

    /// CMD56 通用命令，写方向，一个块
    pub(crate) fn general_cmd_write(&mut self, buf: &[u8], arg: u32) -> LinuxResult<()> {
        if self.wrprotected() {
            log::warn!(target: "storage::mmcsd", "card is locked or write protected");
            return Err(LinuxError::EPERM);
        }

        let bounce = self.bounce_for_write(&buf[..self.blocksize as usize])?;

        self.transfer_ready()?;

        let blocksize = self.blocksize;
        self.set_block_len(blocksize)?;

        if self.caps & caps::DMABEFOREWRITE == 0 {
            self.send_cmd_poll(cmd::CMD56WR, arg)?;
            self.recv_r1(cmd::CMD56WR)?;
        }

        self.dev.block_setup(blocksize, 1);
        self.dev.wait_enable(
            event::TRANSFERDONE | event::TIMEOUT | event::ERROR,
            self.config.block_wdatadelay_ms,
        );

        if self.caps & caps::DMASUPPORTED != 0 {
            let source = dma_send_source(&bounce, buf);
            if let Err(e) = self.dev.dma_send_setup(&source[..blocksize as usize]) {
                self.dev.cancel();
                return Err(e);
            }
        } else {
            self.dev.send_setup(&buf[..blocksize as usize])?;
        }

        if self.caps & caps::DMABEFOREWRITE != 0 {
            self.send_cmd_poll(cmd::CMD56WR, arg)?;
            if let Err(e) = self.recv_r1(cmd::CMD56WR) {
                self.dev.cancel();
                return Err(e);
            }
        }

        self.eventwait(event::TIMEOUT | event::ERROR)?;

        self.wrbusy = true;
        if self.config.wrcomplete_wait {
            self.dev.wait_enable(
                event::WRCOMPLETE | event::TIMEOUT,
                self.config.block_wdatadelay_ms,
            );
        }
        Ok(())
    }
}
