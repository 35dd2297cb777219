//! 卡寄存器解码
//!
//! CSD/SCR/EXT_CSD 位段按 (卡类型, 寻址方式) 分派解出几何信息；原生块
//! 大于 512 字节的卡在此处换算成 512/9 并放大块数。CID 只做诊断输出，
//! 不进入数据模型。

use crate::proto::{extcsd, part, CSD_CSIZE_THRESHOLD};
use crate::slot::{capacity_kb, MmcsdState};

impl MmcsdState {
    /// 解码 CSD。写入 `dsrimp`、`wrprotect`、`blocksize`/`blockshift` 与
    /// 用户区块数。MMC 块寻址且 C_SIZE=0xFFF（>2 GB）时块数不在 CSD，
    /// 保留 EXT_CSD 解码得到的值。
    pub(crate) fn decode_csd(&mut self, csd: [u32; 4]) {
        // Word 2: READ_BL_LEN 83:80，DSR_IMP 76
        let readbllen = (csd[1] >> 16) & 0x0f;
        self.dsrimp = (csd[1] >> 12) & 1 != 0;

        if self.cardtype.is_block() {
            if self.cardtype.is_mmc() {
                // 块寻址 MMC：C_SIZE 73:62（word2 低 10 位 + word3 高 2 位），
                // 仅对 ≤2 GB 有效；0xFFF 表示真实块数在 EXT_CSD SEC_COUNT
                let csize = ((csd[1] & 0x03ff) << 2) | ((csd[2] >> 30) & 3);
                let csizemult = (csd[2] >> 15) & 7;

                self.blockshift = readbllen;
                self.blocksize = 1 << readbllen;

                if csize != CSD_CSIZE_THRESHOLD {
                    self.part_nblocks[part::USER] =
                        (u64::from(csize) + 1) * (1u64 << (csizemult + 2));
                }

                if self.blocksize > 512 {
                    if csize != CSD_CSIZE_THRESHOLD {
                        self.part_nblocks[part::USER] <<= self.blockshift - 9;
                    }
                    self.blocksize = 512;
                    self.blockshift = 9;
                }
            } else {
                // 块寻址 SD：C_SIZE 69:48，单位 512 KiB
                let csize = ((csd[1] & 0x3f) << 16) | (csd[2] >> 16);

                self.blockshift = 9;
                self.blocksize = 1 << 9;
                self.part_nblocks[part::USER] =
                    (u64::from(csize) + 1) << (19 - self.blockshift);
            }
        } else {
            // 字节寻址 SD/MMC：C_SIZE 73:62 + C_SIZE_MULT 49:47
            let csize = ((csd[1] & 0x03ff) << 2) | ((csd[2] >> 30) & 3);
            let csizemult = (csd[2] >> 15) & 7;

            self.part_nblocks[part::USER] =
                (u64::from(csize) + 1) * (1u64 << (csizemult + 2));
            self.blockshift = readbllen;
            self.blocksize = 1 << readbllen;

            // 有些卡报告 1024/2048 字节块，但访问仍按 512 字节进行
            if self.blocksize > 512 {
                self.part_nblocks[part::USER] <<= self.blockshift - 9;
                self.blocksize = 512;
                self.blockshift = 9;
            }
        }

        // Word 4: PERM_WRITE_PROTECT 13，TMP_WRITE_PROTECT 12
        let permwriteprotect = (csd[3] >> 13) & 1 != 0;
        let tmpwriteprotect = (csd[3] >> 12) & 1 != 0;
        self.wrprotect = permwriteprotect || tmpwriteprotect;

        log::debug!(target: "storage::mmcsd",
            "CSD: capacity {} KiB, blocksize {}, nblocks {}, wrprotect {}",
            capacity_kb(self.part_nblocks[part::USER], self.blockshift),
            self.blocksize, self.part_nblocks[part::USER], self.wrprotect);
    }

    /// 解码 SCR：留用 SD_BUS_WIDTHS 与 CMD_SUPPORT(CMD23)。
    /// SCR 在线上按大端传输，按本机字节序相应提取。
    pub(crate) fn decode_scr(&mut self, scr: [u32; 2]) {
        #[cfg(target_endian = "big")]
        {
            self.buswidth = ((scr[0] >> 16) & 0x0f) as u8;
            self.cmd23support = (scr[0] >> 1) & 1 != 0;
        }
        #[cfg(not(target_endian = "big"))]
        {
            self.buswidth = ((scr[0] >> 8) & 0x0f) as u8;
            self.cmd23support = (scr[0] >> 25) & 1 != 0;
        }

        log::debug!(target: "storage::mmcsd",
            "SCR: bus widths {:#x}, cmd23 {}", self.buswidth, self.cmd23support);
    }

    /// 解码 EXT_CSD：用户区 SEC_COUNT 与各硬件分区的块数
    pub(crate) fn decode_extcsd(&mut self, ext: &[u8]) {
        // >2 GB 的用户区容量 = SEC_COUNT × 512B（小端 u32 @212）
        self.part_nblocks[part::USER] = u64::from(u32::from_le_bytes([
            ext[extcsd::SEC_COUNT],
            ext[extcsd::SEC_COUNT + 1],
            ext[extcsd::SEC_COUNT + 2],
            ext[extcsd::SEC_COUNT + 3],
        ]));
        log::debug!(target: "storage::mmcsd",
            "EXT_CSD: user area {} blocks", self.part_nblocks[part::USER]);

        if ext[extcsd::PARTITION_SUPPORT] & extcsd::PART_SUPPORT_PART_EN == 0 {
            return;
        }

        // BOOT/RPMB 容量 = SIZE_MULT × 128 KiB
        const SZ_128K: u64 = 128 * 1024;
        const SZ_512K: u64 = 512 * 1024;
        const SZ_512: u64 = 512;

        self.part_nblocks[part::BOOT0] =
            u64::from(ext[extcsd::BOOT_SIZE_MULT]) * SZ_128K / SZ_512;
        self.part_nblocks[part::BOOT1] = self.part_nblocks[part::BOOT0];
        self.part_nblocks[part::RPMB] =
            u64::from(ext[extcsd::RPMB_SIZE_MULT]) * SZ_128K / SZ_512;

        let hc_erase_grp_sz = u64::from(ext[extcsd::HC_ERASE_GRP_SIZE]);
        let hc_wp_grp_sz = u64::from(ext[extcsd::HC_WP_GRP_SIZE]);

        for idx in 0..4 {
            let mult = &ext[extcsd::GP_SIZE_MULT + idx * 3..extcsd::GP_SIZE_MULT + idx * 3 + 3];
            if mult[0] == 0 && mult[1] == 0 && mult[2] == 0 {
                continue;
            }

            if ext[extcsd::PARTITION_SETTING_COMPLETED] == 0 {
                log::debug!(target: "storage::mmcsd",
                    "GP partition sized but PARTITION_SETTING_COMPLETED clear");
                break;
            }

            // GP 容量 = 三字节小端乘数 × HC_WP_GRP_SIZE × HC_ERASE_GRP_SIZE × 512 KiB
            let m = (u64::from(mult[2]) << 16) + (u64::from(mult[1]) << 8) + u64::from(mult[0]);
            self.part_nblocks[part::GENP0 + idx] =
                m * hc_erase_grp_sz * hc_wp_grp_sz * SZ_512K / SZ_512;
        }
    }

    /// CID 诊断输出（不进入数据模型）
    pub(crate) fn log_cid(&self, cid: [u32; 4]) {
        let mid = cid[0] >> 24;
        let oid = (cid[0] >> 8) & 0xff;
        let pnm = [
            (cid[0] & 0xff) as u8,
            (cid[1] >> 24) as u8,
            ((cid[1] >> 16) & 0xff) as u8,
            ((cid[1] >> 8) & 0xff) as u8,
            (cid[1] & 0xff) as u8,
            (cid[2] >> 24) as u8,
        ];
        let prv = (cid[2] >> 16) & 0xff;
        let psn = (cid[2] << 16) | (cid[3] >> 16);
        let mdt = (cid[3] >> 8) & 0xff;
        log::debug!(target: "storage::mmcsd",
            "CID: mid {:#04x} oid {:#04x} pnm {:02x?} prv {} psn {:#010x} mdt {:#04x}",
            mid, oid, pnm, prv, psn, mdt);
    }
}

#[cfg(test)]
mod tests {
    use alloc::vec;

    use super::*;
    use crate::proto::CardType;
    use crate::testutil::new_state;

    /// 块寻址 SD 的 CSD：READ_BL_LEN=9，C_SIZE 69:48
    fn sd_block_csd(csize: u32) -> [u32; 4] {
        [
            0,
            (9 << 16) | ((csize >> 16) & 0x3f),
            (csize & 0xffff) << 16,
            0,
        ]
    }

    /// 字节寻址卡的 CSD：C_SIZE 73:62 + C_SIZE_MULT 49:47
    fn byte_csd(readbllen: u32, csize: u32, mult: u32) -> [u32; 4] {
        [
            0,
            (readbllen << 16) | ((csize >> 2) & 0x3ff),
            ((csize & 3) << 30) | (mult << 15),
            0,
        ]
    }

    #[test]
    fn sd_block_addressed_csd() {
        let mut st = new_state();
        st.cardtype = CardType::SDV2;
        st.cardtype.mark_block_addressed();
        st.decode_csd(sd_block_csd(0x781f));
        // (csize+1) << 10 块；15376 MiB
        assert_eq!(st.part_nblocks[part::USER], 31_490_048);
        assert_eq!(st.blocksize, 512);
        assert_eq!(st.blockshift, 9);
        assert_eq!(capacity_kb(st.part_nblocks[part::USER], st.blockshift), 15376 << 10);
    }

    #[test]
    fn sd_byte_addressed_csd() {
        let mut st = new_state();
        st.cardtype = CardType::SDV1;
        st.decode_csd(byte_csd(9, 2047, 7));
        // (2047+1) * 2^9 = 1 Mi 块 × 512B = 512 MiB
        assert_eq!(st.part_nblocks[part::USER], 1 << 20);
        assert_eq!(st.blocksize, 512);
        assert_eq!(st.blockshift, 9);
    }

    #[test]
    fn byte_addressed_rescales_large_native_blocks() {
        let mut st = new_state();
        st.cardtype = CardType::SDV1;
        // 原生 1024B 块 ⇒ 折算到 512B 时块数翻倍
        st.decode_csd(byte_csd(10, 2047, 7));
        assert_eq!(st.blocksize, 512);
        assert_eq!(st.blockshift, 9);
        assert_eq!(st.part_nblocks[part::USER], 1 << 21);
    }

    #[test]
    fn mmc_block_csize_threshold_defers_to_extcsd() {
        let mut st = new_state();
        st.cardtype = CardType::MMC;
        st.cardtype.mark_block_addressed();

        // C_SIZE=0xFFF：CSD 不给块数，由 EXT_CSD SEC_COUNT 提供
        let mut ext = vec![0u8; 512];
        ext[extcsd::SEC_COUNT + 2] = 0xec; // 0x00ec0000
        st.decode_extcsd(&ext);
        assert_eq!(st.part_nblocks[part::USER], 0x00ec_0000);
        assert_eq!(st.part_nblocks[part::USER], 15_466_496);

        st.decode_csd(byte_csd(9, 0xfff, 7));
        // 再次解码 CSD 不得覆盖 EXT_CSD 的块数
        assert_eq!(st.part_nblocks[part::USER], 15_466_496);
        assert_eq!(st.blocksize, 512);
    }

    #[test]
    fn mmc_block_small_density_uses_csd() {
        let mut st = new_state();
        st.cardtype = CardType::MMC;
        st.cardtype.mark_block_addressed();
        st.decode_csd(byte_csd(9, 1000, 5));
        assert_eq!(st.part_nblocks[part::USER], 1001 * (1 << 7));
    }

    #[test]
    fn csd_write_protect_and_dsr() {
        let mut st = new_state();
        st.cardtype = CardType::SDV1;
        let mut csd = byte_csd(9, 100, 2);
        csd[1] |= 1 << 12; // DSR_IMP
        csd[3] |= 1 << 12; // TMP_WRITE_PROTECT
        st.decode_csd(csd);
        assert!(st.dsrimp);
        assert!(st.wrprotect);

        csd[3] = 1 << 13; // PERM_WRITE_PROTECT
        st.decode_csd(csd);
        assert!(st.wrprotect);
    }

    #[test]
    fn scr_buswidth_and_cmd23() {
        let mut st = new_state();
        // 线上字节序：byte1 低半字节 = SD_BUS_WIDTHS，byte3 bit1 = CMD23 支持
        let raw = [0x02u8, 0x05, 0x00, 0x02, 0, 0, 0, 0];
        let scr = [
            u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
            u32::from_ne_bytes([raw[4], raw[5], raw[6], raw[7]]),
        ];
        st.decode_scr(scr);
        assert_eq!(st.buswidth, 0x5);
        assert!(st.cmd23support);

        let raw = [0x02u8, 0x01, 0x00, 0x00, 0, 0, 0, 0];
        st.decode_scr([
            u32::from_ne_bytes([raw[0], raw[1], raw[2], raw[3]]),
            0,
        ]);
        assert_eq!(st.buswidth, 0x1);
        assert!(!st.cmd23support);
    }

    #[test]
    fn extcsd_partition_geometry() {
        let mut st = new_state();
        let mut ext = vec![0u8; 512];
        ext[extcsd::SEC_COUNT + 1] = 0x10; // 0x1000 块用户区
        ext[extcsd::PARTITION_SUPPORT] = extcsd::PART_SUPPORT_PART_EN;
        ext[extcsd::PARTITION_SETTING_COMPLETED] = 1;
        ext[extcsd::BOOT_SIZE_MULT] = 8; // 8×128 KiB = 2048 块
        ext[extcsd::RPMB_SIZE_MULT] = 2; // 512 块
        ext[extcsd::HC_ERASE_GRP_SIZE] = 1;
        ext[extcsd::HC_WP_GRP_SIZE] = 1;
        ext[extcsd::GP_SIZE_MULT] = 1; // GP1 = 1×1×1×512 KiB = 1024 块

        st.decode_extcsd(&ext);
        assert_eq!(st.part_nblocks[part::USER], 0x1000);
        assert_eq!(st.part_nblocks[part::BOOT0], 2048);
        assert_eq!(st.part_nblocks[part::BOOT1], 2048);
        assert_eq!(st.part_nblocks[part::RPMB], 512);
        assert_eq!(st.part_nblocks[part::GENP0], 1024);
        assert_eq!(st.part_nblocks[part::GENP0 + 1], 0);
    }

    #[test]
    fn extcsd_gp_skipped_without_setting_completed() {
        let mut st = new_state();
        let mut ext = vec![0u8; 512];
        ext[extcsd::PARTITION_SUPPORT] = extcsd::PART_SUPPORT_PART_EN;
        ext[extcsd::GP_SIZE_MULT] = 1;
        // PARTITION_SETTING_COMPLETED 未置位 ⇒ GP 分区不暴露
        st.decode_extcsd(&ext);
        assert_eq!(st.part_nblocks[part::GENP0], 0);
    }
}
