//! 命令原语
//!
//! 对主机 `send_cmd`/`wait_response`/`recv_*` 的薄封装：下发并轮询响应、
//! 按响应类型归类错误。R1 出错时把 CARD_IS_LOCKED 记入槽位状态后统一
//! 返回 `EIO`；R6 干净时把发布的 RCA 写入 `rca`。

use axerrno::{LinuxError, LinuxResult};
use sdio::types::cmd_index;

use crate::proto::{cmd, r1, r6, switch};
use crate::slot::{timing, MmcsdState};

impl MmcsdState {
    /// 下发一条命令并轮询等响应就绪
    pub(crate) fn send_cmd_poll(&mut self, command: u32, arg: u32) -> LinuxResult<()> {
        self.dev.send_cmd(command, arg)?;
        self.dev.wait_response(command).map_err(|e| {
            log::warn!(target: "storage::mmcsd",
                "CMD{}: wait response failed: {:?}", cmd_index(command), e);
            e
        })
    }

    /// 取回 R1 并检查错误位
    pub(crate) fn recv_r1(&mut self, command: u32) -> LinuxResult<()> {
        let r1 = self.dev.recv_r1(command)?;
        if r1 & r1::ERRORMASK != 0 {
            // 卡锁定视作错误，同时记下锁定状态供读写路径拒绝访问
            self.locked = r1 & r1::CARDISLOCKED != 0;
            log::warn!(target: "storage::mmcsd",
                "CMD{}: R1 error bits: {:#010x}", cmd_index(command), r1);
            return Err(LinuxError::EIO);
        }
        Ok(())
    }

    /// 取回 R6；干净则把发布的 RCA 存入槽位状态
    pub(crate) fn recv_r6(&mut self, command: u32) -> LinuxResult<()> {
        let r6 = self.dev.recv_r6(command)?;
        if r6 & r6::ERRORMASK != 0 {
            log::warn!(target: "storage::mmcsd",
                "CMD{}: R6 error bits: {:#010x}", cmd_index(command), r6);
            return Err(LinuxError::EIO);
        }
        self.rca = (r6 >> 16) as u16;
        Ok(())
    }

    /// CMD13 SEND_STATUS：取当前 R1。锁定捕获与错误语义同 `recv_r1`。
    pub(crate) fn get_r1(&mut self) -> LinuxResult<u32> {
        self.send_cmd_poll(cmd::CMD13, u32::from(self.rca) << 16)?;
        let r1 = self.dev.recv_r1(cmd::CMD13)?;
        if r1 & r1::ERRORMASK != 0 {
            self.locked = r1 & r1::CARDISLOCKED != 0;
            log::warn!(target: "storage::mmcsd", "CMD13: R1 error bits: {:#010x}", r1);
            return Err(LinuxError::EIO);
        }
        Ok(r1)
    }

    /// 断言卡处于期望状态（R1 bits 12:9）。
    /// R1 反映命令被接收时的状态，而非执行完成后的状态。
    pub(crate) fn verify_state(&mut self, expected: u32) -> LinuxResult<()> {
        let r1 = self.get_r1()?;
        if r1::state(r1) == expected {
            self.wrbusy = false;
            return Ok(());
        }
        log::warn!(target: "storage::mmcsd",
            "unexpected card state: R1={:#010x} want state {}", r1, expected);
        Err(LinuxError::EINVAL)
    }

    /// CMD6 SWITCH：写 EXT_CSD 字节（分区访问、总线宽度、HS_TIMING）。
    /// 字节写经过 PRG 状态，置 `wrbusy`，由下一次 `transfer_ready` 确认。
    pub(crate) fn switch(&mut self, arg: u32) -> LinuxResult<()> {
        self.transfer_ready().map_err(|e| {
            log::warn!(target: "storage::mmcsd", "switch: card not ready: {:?}", e);
            e
        })?;
        self.send_cmd_poll(cmd::CMD6, arg)?;
        self.wrbusy = true;
        self.recv_r1(cmd::CMD6)
    }

    /// 切换硬件分区：CMD6 写 PARTITION_CONFIG[179] 的 PARTITION_ACCESS
    pub(crate) fn select_partition(&mut self, partnum: usize) -> LinuxResult<()> {
        if self.partnum as usize == partnum {
            return Ok(());
        }
        self.switch(switch::write_byte(switch::EXT_CSD_PART_CONF, partnum as u32))
            .map_err(|e| {
                log::warn!(target: "storage::mmcsd",
                    "partition switch to {} failed: {:?}", partnum, e);
                e
            })?;
        self.partnum = partnum as u8;
        Ok(())
    }

    /// CMD4 SET_DSR：配置了 DSR 值且 CSD 报告 DSR_IMP 时发送。
    /// 广播命令无响应，无从得知是否生效，按惯例发两次增加置信。
    pub(crate) fn send_cmd4(&mut self) {
        let Some(dsr) = self.config.dsr else {
            return;
        };
        if !self.dsrimp {
            log::debug!(target: "storage::mmcsd", "card does not support DSR");
            return;
        }
        for _ in 0..2 {
            let _ = self.send_cmd_poll(cmd::CMD4, u32::from(dsr) << 16);
            self.delay.delay_us(timing::DSR_DELAY_US);
        }
    }
}
