use core::time::Duration;
use lazy_static::lazy_static;
use std::time::Instant;

lazy_static! {
    /// 第一次读取时钟的时刻，作为内核“开机”时间
    static ref BOOT_INSTANT: Instant = Instant::now();
}

pub fn get_time_ms() -> usize {
    BOOT_INSTANT.elapsed().as_millis() as usize
}

/// 把毫秒超时换算成绝对截止时刻，`NO_TIMEOUT` 表示永不超时
pub fn deadline_after_ms(timeout_ms: u64) -> Option<Instant> {
    if timeout_ms == crate::config::NO_TIMEOUT {
        return None;
    }
    Instant::now().checked_add(Duration::from_millis(timeout_ms))
}
