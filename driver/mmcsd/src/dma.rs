//! DMA 对齐反弹缓冲
//!
//! 主机 DMA 预检不通过时，为单次传输分配一块对齐的中转缓冲：写方向在
//! 传输前拷入，读方向在事件完成后拷出。一条带守卫的路径取代按方向/
//! 能力展开的多份传输代码。

use alloc::alloc::{alloc, dealloc, Layout};
use core::ptr::NonNull;

use axerrno::{LinuxError, LinuxResult};

/// 反弹缓冲对齐。4 KiB 同时满足 SDMA 起始地址与边界约束。
const DMA_BOUNCE_ALIGN: usize = 4096;

/// 一次传输期间持有的对齐缓冲，drop 时释放。
pub(crate) struct BounceBuf {
    ptr: NonNull<u8>,
    len: usize,
    layout: Layout,
}

impl BounceBuf {
    /// 分配 len 字节的对齐缓冲；分配失败返回 `ENOMEM`。
    pub(crate) fn alloc(len: usize) -> LinuxResult<Self> {
        let layout = Layout::from_size_align(len.max(1), DMA_BOUNCE_ALIGN)
            .map_err(|_| LinuxError::EINVAL)?;
        let raw = unsafe { alloc(layout) };
        let ptr = NonNull::new(raw).ok_or(LinuxError::ENOMEM)?;
        Ok(Self { ptr, len, layout })
    }

    /// 分配并预拷入数据（写方向）
    pub(crate) fn alloc_from(src: &[u8]) -> LinuxResult<Self> {
        let mut buf = Self::alloc(src.len())?;
        buf.as_mut_slice().copy_from_slice(src);
        Ok(buf)
    }

    pub(crate) fn as_slice(&self) -> &[u8] {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub(crate) fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for BounceBuf {
    fn drop(&mut self) {
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// 读方向的 DMA 目标：有反弹则用反弹，否则用调用方缓冲
pub(crate) fn dma_recv_target<'a>(
    bounce: &'a mut Option<BounceBuf>,
    user: &'a mut [u8],
) -> &'a mut [u8] {
    match bounce {
        Some(b) => b.as_mut_slice(),
        None => user,
    }
}

/// 写方向的 DMA 源：有反弹则用反弹（已预拷入），否则用调用方缓冲
pub(crate) fn dma_send_source<'a>(bounce: &'a Option<BounceBuf>, user: &'a [u8]) -> &'a [u8] {
    match bounce {
        Some(b) => b.as_slice(),
        None => user,
    }
}
