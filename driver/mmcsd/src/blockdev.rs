//! 块设备门面与生命周期
//!
//! 每个几何非零的硬件分区注册为一个块设备 `/dev/mmcsd<minor><suffix>`；
//! open/close/read/write/geometry/ioctl 全部在槽位锁内执行。probe 从
//! 已知状态（先 removed）开始识别并初始化，removed 注销全部分区名并
//! 回到 1-bit 总线、关断时钟。插拔回调由主机在线程上下文投递，与
//! 在途传输在同一把锁上串行。

use alloc::boxed::Box;
use alloc::format;
use alloc::sync::Arc;

use axerrno::{AxError, AxResult, LinuxError, LinuxResult};
use blkdev::{BlockDriverOps, Geometry};
use sdio::types::{caps, media, SdioClock};
use sdio::{DelayOps, SdioDev};
use spin::Mutex;

use crate::init::mode_name;
use crate::ioc::{MmcIocCmd, MmcIocMultiCmd, MMC_IOC_CMD, MMC_IOC_MAX_CMDS, MMC_IOC_MULTI_CMD};
use crate::proto::{acmd, part, CardType};
use crate::slot::{capacity_kb, timing, MmcsdConfig, MmcsdSlot, MmcsdState, MAX_CREFS};

/// 分区设备名后缀，与分区索引一一对应
pub const PART_NAMES: [&str; part::COUNT] =
    ["", "boot0", "boot1", "rpmb", "gp1", "gp2", "gp3", "gp4"];

fn part_devname(minor: u8, index: usize) -> alloc::string::String {
    format!("/dev/mmcsd{}{}", minor, PART_NAMES[index])
}

/// 一个已注册分区的块设备入口。持有槽位引用与显式分区索引。
pub struct MmcsdPart {
    slot: Arc<MmcsdSlot>,
    index: usize,
}

impl MmcsdSlot {
    /// 探测槽内介质：注册时、插入回调或 BIOC_PROBE 触发。
    pub fn probe(self: &Arc<Self>) -> LinuxResult<()> {
        let mut st = self.state.lock();
        self.probe_locked(&mut st)
    }

    pub(crate) fn probe_locked(self: &Arc<Self>, st: &mut MmcsdState) -> LinuxResult<()> {
        log::debug!(target: "storage::mmcsd",
            "probe: type {:?} probed {}", st.cardtype, st.probed);

        // 槽里可能换了卡，也可能本来就没卡；先按移除处理，从已知状态开始
        self.removed_locked(st);

        if !st.dev.present() {
            log::info!(target: "storage::mmcsd", "no card");
            st.dev.callback_enable(media::INSERTED);
            return Err(LinuxError::ENODEV);
        }

        log::info!(target: "storage::mmcsd", "card present, probing...");

        let ret = st.card_identify().and_then(|_| match st.cardtype.base() {
            CardType::SDV1 => {
                log::info!(target: "storage::mmcsd", "SD version 1.x");
                st.sd_initialize()
            }
            CardType::SDV2 => {
                log::info!(target: "storage::mmcsd",
                    "SD version 2.x with {} addressing",
                    if st.cardtype.is_block() { "block" } else { "byte" });
                st.sd_initialize()
            }
            CardType::MMC => {
                log::info!(target: "storage::mmcsd",
                    "MMC card with {} addressing",
                    if st.cardtype.is_block() { "block" } else { "byte" });
                st.mmc_initialize()
            }
            _ => {
                log::warn!(target: "storage::mmcsd",
                    "internal confusion: {:?}", st.cardtype);
                Err(LinuxError::EPERM)
            }
        });

        match &ret {
            Ok(()) => {
                log::info!(target: "storage::mmcsd",
                    "capacity: {} KiB, {} bus, {} mode",
                    capacity_kb(st.part_nblocks[part::USER], st.blockshift),
                    if st.widebus { "4-bit" } else { "1-bit" },
                    mode_name(st.mode));
                st.mediachanged = true;

                // 识别成功即算探测过；注册所有几何非零的分区
                st.probed = true;
                for i in 0..part::COUNT {
                    if st.part_nblocks[i] != 0 {
                        let name = part_devname(st.minor, i);
                        let ops: Arc<dyn BlockDriverOps> = Arc::new(MmcsdPart {
                            slot: self.clone(),
                            index: i,
                        });
                        if let Err(e) = blkdev::register_blockdriver(&name, ops, 0o666) {
                            log::warn!(target: "storage::mmcsd",
                                "register {} failed: {:?}", name, e);
                        }
                    }
                }
            }
            Err(e) => {
                // 卡在槽里但没法用，等拔插后再试
                log::warn!(target: "storage::mmcsd", "failed to initialize card: {:?}", e);
            }
        }

        // 不管初始化成败，槽里确实有卡：武装弹出事件
        st.dev.callback_enable(media::EJECTED);
        ret
    }

    /// 介质移除处理：注销全部分区名、清几何、回到 1-bit 并关时钟。
    pub fn removed(self: &Arc<Self>) -> LinuxResult<()> {
        let mut st = self.state.lock();
        self.removed_locked(&mut st);
        Ok(())
    }

    pub(crate) fn removed_locked(&self, st: &mut MmcsdState) {
        log::debug!(target: "storage::mmcsd",
            "removed: type {:?} present {}", st.cardtype, st.dev.present());

        for i in 0..part::COUNT {
            let _ = blkdev::unregister_blockdriver(&part_devname(st.minor, i));
        }

        // 忘掉卡的几何，当作空槽、从未初始化过
        st.part_nblocks = [0; part::COUNT];
        st.blocksize = 0;
        st.blockshift = 0;
        st.probed = false;
        st.mediachanged = false;
        st.wrbusy = false;
        st.cardtype = CardType::UNKNOWN;
        st.rca = 0;
        st.selblocklen = 0;
        st.locked = false;
        st.wrprotect = false;
        st.mode = 0;
        // CMD0 会把卡的 PARTITION_ACCESS 复位，缓存一并归零
        st.partnum = 0;

        // 回到默认 1-bit 总线并关断时钟
        st.buswidth = acmd::SCR_BUSWIDTH_1BIT;
        st.dev.widebus(false);
        st.widebus = false;
        st.dev.clock(SdioClock::Disabled);
        st.delay.delay_us(timing::CLK_DELAY_US);
    }

    /// 插拔回调：主机线程上下文投递。插入走 probe，移除走 removed 并
    /// 重新武装插入事件。
    pub fn media_change(self: &Arc<Self>) {
        let mut st = self.state.lock();
        if st.dev.present() {
            // 若上层还挂着文件系统，这里的重新 probe 会很有破坏性；
            // probe 内部会重新武装相应回调
            let _ = self.probe_locked(&mut st);
        } else {
            self.removed_locked(&mut st);
            st.dev.callback_enable(media::INSERTED);
        }
    }

    /// 一次性硬件准备：读能力位、挂接中断、注册插拔回调，再探测。
    fn hw_initialize(self: &Arc<Self>) -> LinuxResult<()> {
        let mut st = self.state.lock();

        st.caps = st.dev.capabilities();
        log::debug!(target: "storage::mmcsd",
            "DMA supported: {}", st.caps & caps::DMASUPPORTED != 0);

        st.dev.attach().map_err(|e| {
            log::warn!(target: "storage::mmcsd", "unable to attach interrupts: {:?}", e);
            e
        })?;

        let weak = Arc::downgrade(self);
        st.dev.register_callback(Box::new(move || {
            if let Some(slot) = weak.upgrade() {
                slot.media_change();
            }
        }));

        if st.dev.present() {
            self.probe_locked(&mut st).map_err(|e| {
                log::warn!(target: "storage::mmcsd",
                    "slot not empty, but initialization failed: {:?}", e);
                // 之后插拔仍可恢复，对上层统一表现为空槽
                LinuxError::ENODEV
            })
        } else {
            st.dev.callback_enable(media::INSERTED);
            Err(LinuxError::ENODEV)
        }
    }
}

/// 注册一个卡槽。
///
/// `minor` 决定设备名 `/dev/mmcsd<minor><suffix>`；`dev` 为已就绪的主机
/// 控制器。空槽（或卡无法初始化）不算失败：插入回调已武装，插卡后
/// 自动探测。
pub fn slot_initialize(
    minor: u8,
    dev: Arc<dyn SdioDev>,
    delay: Box<dyn DelayOps>,
    config: MmcsdConfig,
) -> AxResult<Arc<MmcsdSlot>> {
    log::info!(target: "storage::mmcsd", "slot initialize: minor {}", minor);

    let slot = Arc::new(MmcsdSlot {
        state: Mutex::new(MmcsdState::new(dev, delay, config, minor)),
    });

    match slot.hw_initialize() {
        Ok(()) => {}
        Err(LinuxError::ENODEV) => {
            log::info!(target: "storage::mmcsd", "MMC/SD slot is empty");
        }
        Err(e) => {
            log::error!(target: "storage::mmcsd",
                "failed to initialize MMC/SD slot: {:?}", e);
            return Err(AxError::BadState);
        }
    }

    {
        let st = slot.state.lock();
        log::info!(target: "storage::mmcsd",
            "MMC: /dev/mmcsd{} {} KiB, {} bus, {} mode",
            minor,
            capacity_kb(st.part_nblocks[part::USER], st.blockshift),
            if st.widebus { "4-bit" } else { "1-bit" },
            mode_name(st.mode));
    }

    Ok(slot)
}

impl BlockDriverOps for MmcsdPart {
    fn open(&self) -> LinuxResult<()> {
        let mut st = self.slot.state.lock();
        if st.crefs >= MAX_CREFS {
            log::warn!(target: "storage::mmcsd", "too many open references");
            return Err(LinuxError::EBUSY);
        }
        st.crefs += 1;
        Ok(())
    }

    fn close(&self) -> LinuxResult<()> {
        let mut st = self.slot.state.lock();
        if st.crefs == 0 {
            return Err(LinuxError::EIO);
        }
        st.crefs -= 1;
        Ok(())
    }

    /// 按 `multiblock_limit` 切块读取；块数 1 的切块走 CMD17 单块路径
    fn read(&self, buf: &mut [u8], start_sector: u64, nsectors: u32) -> LinuxResult<u32> {
        if nsectors == 0 {
            return Ok(0);
        }

        let mut st = self.slot.state.lock();
        log::debug!(target: "storage::mmcsd",
            "read: start {} nsectors {} sectorsize {}",
            start_sector, nsectors, st.blocksize);

        let limit = match st.config.multiblock_limit {
            0 => usize::MAX,
            n => n,
        };

        let blocksize = st.blocksize as usize;
        let mut sector = start_sector;
        let end = start_sector + u64::from(nsectors);
        let mut offset = 0usize;
        while sector < end {
            let chunk = ((end - sector) as usize).min(limit);
            let nread = if chunk == 1 {
                st.read_single(self.index, &mut buf[offset..offset + blocksize], sector)?
            } else {
                st.read_multiple(
                    self.index,
                    &mut buf[offset..offset + chunk * blocksize],
                    sector,
                    chunk as u32,
                )?
            };
            sector += u64::from(nread);
            offset += nread as usize * blocksize;
        }

        Ok(nsectors)
    }

    /// 与 `read` 对称
    fn write(&self, buf: &[u8], start_sector: u64, nsectors: u32) -> LinuxResult<u32> {
        if nsectors == 0 {
            return Ok(0);
        }

        let mut st = self.slot.state.lock();
        log::debug!(target: "storage::mmcsd",
            "write: start {} nsectors {} sectorsize {}",
            start_sector, nsectors, st.blocksize);

        let limit = match st.config.multiblock_limit {
            0 => usize::MAX,
            n => n,
        };

        let blocksize = st.blocksize as usize;
        let mut sector = start_sector;
        let end = start_sector + u64::from(nsectors);
        let mut offset = 0usize;
        while sector < end {
            let chunk = ((end - sector) as usize).min(limit);
            let nwrite = if chunk == 1 {
                st.write_single(self.index, &buf[offset..offset + blocksize], sector)?
            } else {
                st.write_multiple(
                    self.index,
                    &buf[offset..offset + chunk * blocksize],
                    sector,
                    chunk as u32,
                )?
            };
            sector += u64::from(nwrite);
            offset += nwrite as usize * blocksize;
        }

        Ok(nsectors)
    }

    /// 返回分区几何；media-changed 标志读取即清除
    fn geometry(&self) -> LinuxResult<Geometry> {
        let mut st = self.slot.state.lock();

        if st.is_empty() {
            return Err(LinuxError::ENODEV);
        }

        let geo = Geometry {
            available: true,
            mediachanged: st.mediachanged,
            writeenabled: !st.wrprotected(),
            nsectors: st.part_nblocks[self.index],
            sectorsize: st.blocksize as u16,
        };
        st.mediachanged = false;
        Ok(geo)
    }

    fn ioctl(&self, cmdno: u32, arg: usize) -> LinuxResult<()> {
        match cmdno {
            blkdev::ioc::BIOC_PROBE => {
                log::debug!(target: "storage::mmcsd", "BIOC_PROBE");
                self.slot.probe()
            }
            blkdev::ioc::BIOC_EJECT => {
                log::debug!(target: "storage::mmcsd", "BIOC_EJECT");
                let mut st = self.slot.state.lock();
                self.slot.removed_locked(&mut st);
                // 重新武装插入检测
                st.dev.callback_enable(media::INSERTED);
                Ok(())
            }
            MMC_IOC_CMD => {
                if arg == 0 {
                    return Err(LinuxError::EINVAL);
                }
                // arg 为调用方传入的 MmcIocCmd 指针，指向对象在本次调用
                // 期间有效
                let ic = unsafe { &mut *(arg as *mut MmcIocCmd) };
                let mut st = self.slot.state.lock();
                st.iocmd(self.index, ic)
            }
            MMC_IOC_MULTI_CMD => {
                if arg == 0 {
                    return Err(LinuxError::EINVAL);
                }
                let mc = unsafe { &mut *(arg as *mut MmcIocMultiCmd) };
                let num = mc.num_of_cmds as usize;
                if num == 0 {
                    return Ok(());
                }
                if num > MMC_IOC_MAX_CMDS || mc.cmds.is_null() {
                    log::warn!(target: "storage::mmcsd", "multi iocmd: bad batch");
                    return Err(LinuxError::EINVAL);
                }
                let cmds = unsafe { core::slice::from_raw_parts_mut(mc.cmds, num) };
                let mut st = self.slot.state.lock();
                st.multi_iocmd(self.index, cmds)
            }
            _ => Err(LinuxError::ENOTTY),
        }
    }
}
