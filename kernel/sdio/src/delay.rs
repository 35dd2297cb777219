//! 延时/让出接口
//!
//! 卡驱动的所有睡眠、微秒延时与忙等让出都经由 `DelayOps`，由平台在注册
//! 槽位时提供；轮询预算以累计延时毫秒计数，驱动不依赖单调时钟。
//! 无专用定时器的平台可用 `SpinDelay` 忙等实现兜底。

/// 延时提供方。实现方可睡眠（线程上下文）或忙等（无调度环境）。
pub trait DelayOps: Send {
    /// 延时约 us 微秒
    fn delay_us(&mut self, us: u32);

    /// 延时约 ms 毫秒
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }

    /// 让出 CPU（busy-poll 模式下替代睡眠）
    fn yield_now(&mut self) {
        core::hint::spin_loop();
    }
}

/// 每微秒忙等循环数。无精确时钟时为启发式近似，时长与 CPU 频率相关。
pub const LOOPS_PER_US: u32 = 1;

/// 纯忙等的延时实现，用于无定时器/调度器的环境。
pub struct SpinDelay;

impl DelayOps for SpinDelay {
    #[inline]
    fn delay_us(&mut self, us: u32) {
        let limit = us.saturating_mul(LOOPS_PER_US).max(1);
        for _ in 0..limit {
            core::hint::spin_loop();
        }
    }
}
