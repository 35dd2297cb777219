//! 原始命令透传
//!
//! 用户态经 ioctl 直接下发受控子集的 MMC 命令（健康查询、厂商工具、
//! RPMB 访问等）。按命令索引分派；数据缓冲由调用方持有，以指针+长度
//! 传入，仅在本次调用期间解引用。

use axerrno::{LinuxError, LinuxResult};
use sdio::types::cmdflags::CMDIDX_MASK;

use crate::proto::cmd;
use crate::slot::{timing, MmcsdState};

/// 透传单条命令
pub const MMC_IOC_CMD: u32 = 0x4d01;
/// 透传命令批
pub const MMC_IOC_MULTI_CMD: u32 = 0x4d02;
/// 一批透传命令的上限
pub const MMC_IOC_MAX_CMDS: usize = 255;

/// 一条透传命令。`data_ptr` 指向调用方缓冲，读写方向由 `write_flag`
/// 与命令语义决定；响应写回 `response[0]`。
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct MmcIocCmd {
    /// 非零表示数据方向为写
    pub write_flag: u32,
    /// 命令索引（仅低 6 位参与分派）
    pub opcode: u32,
    pub arg: u32,
    pub response: [u32; 4],
    /// 数据块大小（字节）
    pub blksz: u32,
    /// 数据块数
    pub blocks: u32,
    /// 调用方数据缓冲地址；无数据的命令为 0
    pub data_ptr: u64,
}

/// 一批透传命令
#[repr(C)]
#[derive(Debug)]
pub struct MmcIocMultiCmd {
    pub num_of_cmds: u64,
    pub cmds: *mut MmcIocCmd,
}

/// 取出调用方数据缓冲。len 为期望字节数；空指针返回 `EINVAL`。
unsafe fn data_slice<'a>(ic: &MmcIocCmd, len: usize) -> LinuxResult<&'a mut [u8]> {
    if ic.data_ptr == 0 {
        return Err(LinuxError::EINVAL);
    }
    Ok(core::slice::from_raw_parts_mut(ic.data_ptr as *mut u8, len))
}

impl MmcsdState {
    /// 分派一条透传命令。`partindex` 为发起 ioctl 的分区（CMD18/25 在
    /// 该分区上执行；RPMB 时卡会忽略地址参数）。
    pub(crate) fn iocmd(&mut self, partindex: usize, ic: &mut MmcIocCmd) -> LinuxResult<()> {
        match ic.opcode & CMDIDX_MASK {
            0 => {
                // 复位进 IDLE；留出卡回到空闲的时间
                self.send_cmd_poll(cmd::CMD0, ic.arg)?;
                self.delay.delay_us(timing::IDLE_DELAY_US);
                Ok(())
            }
            2 => {
                // CID 在识别期已缓存，直接返还
                let buf = unsafe { data_slice(ic, 16)? };
                for (i, word) in self.cid.iter().enumerate() {
                    buf[i * 4..i * 4 + 4].copy_from_slice(&word.to_ne_bytes());
                }
                Ok(())
            }
            6 => self.switch(ic.arg).map_err(|e| {
                log::warn!(target: "storage::mmcsd", "iocmd switch failed: {:?}", e);
                e
            }),
            8 => {
                // MMC SEND_EXT_CSD：512 字节读进调用方缓冲
                let buf = unsafe { data_slice(ic, 512)? };
                let ext: &mut [u8; 512] =
                    buf.try_into().map_err(|_| LinuxError::EINVAL)?;
                self.read_extcsd(ext)
            }
            13 => {
                ic.response[0] = self.get_r1().map_err(|e| {
                    log::warn!(target: "storage::mmcsd", "iocmd get status failed: {:?}", e);
                    e
                })?;
                Ok(())
            }
            18 => {
                if ic.blocks == 0 {
                    return Ok(());
                }
                let nbytes = (ic.blocks as usize) << self.blockshift;
                let buf = unsafe { data_slice(ic, nbytes)? };
                let n =
                    self.read_multiple(partindex, buf, u64::from(ic.arg), ic.blocks)?;
                if n != ic.blocks {
                    return Err(LinuxError::EIO);
                }
                Ok(())
            }
            23 => self.set_block_count(if ic.blocks != 0 { ic.blocks } else { ic.arg }),
            25 => {
                if ic.blocks == 0 {
                    return Ok(());
                }
                let nbytes = (ic.blocks as usize) << self.blockshift;
                let buf = unsafe { data_slice(ic, nbytes)? };
                let n =
                    self.write_multiple(partindex, buf, u64::from(ic.arg), ic.blocks)?;
                if n != ic.blocks {
                    return Err(LinuxError::EIO);
                }
                Ok(())
            }
            56 => {
                let blocksize = self.blocksize as usize;
                let buf = unsafe { data_slice(ic, blocksize)? };
                if ic.write_flag != 0 {
                    self.general_cmd_write(buf, ic.arg)
                } else {
                    self.general_cmd_read(buf, ic.arg)
                }
            }
            opcode => {
                log::warn!(target: "storage::mmcsd", "iocmd opcode {} unsupported", opcode);
                Err(LinuxError::EINVAL)
            }
        }
    }

    /// 顺序执行一批透传命令，首错中止
    pub(crate) fn multi_iocmd(
        &mut self,
        partindex: usize,
        cmds: &mut [MmcIocCmd],
    ) -> LinuxResult<()> {
        if cmds.len() > MMC_IOC_MAX_CMDS {
            log::warn!(target: "storage::mmcsd", "multi iocmd: too many cmds");
            return Err(LinuxError::EINVAL);
        }
        for (i, ic) in cmds.iter_mut().enumerate() {
            self.iocmd(partindex, ic).map_err(|e| {
                log::warn!(target: "storage::mmcsd", "iocmd {} failed: {:?}", i, e);
                e
            })?;
        }
        Ok(())
    }
}
