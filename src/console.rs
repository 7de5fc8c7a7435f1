//! 控制台输出与内核日志
//!
//! 日志级别取自环境变量 `LOG`（运行时优先，其次是编译期的 `option_env!("LOG")`），
//! 可选 `error` / `warn` / `info` / `debug` / `trace`，缺省关闭。

use crate::task::current_ids;
use crate::timer::get_time_ms;
use core::fmt::{self, Write};
use log::{Level, LevelFilter, Log, Metadata, Record};
use std::io::{self, Write as IoWrite};

struct Stderr;

impl Write for Stderr {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        io::stderr()
            .lock()
            .write_all(s.as_bytes())
            .map_err(|_| fmt::Error)
    }
}

pub fn print(args: fmt::Arguments) {
    // 控制台写失败时没有别处可以报告
    let _ = Stderr.write_fmt(args);
}

/// 安装内核日志器，可重复调用
pub fn init() {
    static LOGGER: Logger = Logger;
    static INIT: spin::Once<()> = spin::Once::new();
    INIT.call_once(|| {
        if log::set_logger(&LOGGER).is_ok() {
            log::set_max_level(level_filter());
        }
    });
}

fn level_filter() -> LevelFilter {
    let level = std::env::var("LOG").ok();
    match level.as_deref().or(option_env!("LOG")) {
        Some("error") => LevelFilter::Error,
        Some("warn") => LevelFilter::Warn,
        Some("info") => LevelFilter::Info,
        Some("debug") => LevelFilter::Debug,
        Some("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

struct Logger;
impl Log for Logger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = level_to_color_code(record.level());
        let now = get_time_ms();
        match current_ids() {
            Some((pid, tid)) => print(format_args!(
                "\x1b[{}m[{:>6}ms] {:<5} [{}:{}] {}\x1b[0m\n",
                color,
                now,
                record.level(),
                pid,
                tid,
                record.args()
            )),
            None => print(format_args!(
                "\x1b[{}m[{:>6}ms] {:<5} [kernel] {}\x1b[0m\n",
                color,
                now,
                record.level(),
                record.args()
            )),
        }
    }

    fn flush(&self) {
        let _ = io::stderr().flush();
    }
}

fn level_to_color_code(level: Level) -> u8 {
    match level {
        Level::Error => 31, // Red
        Level::Warn => 93,  // BrightYellow
        Level::Info => 34,  // Blue
        Level::Debug => 32, // Green
        Level::Trace => 90, // BrightBlack
    }
}
