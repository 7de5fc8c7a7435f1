//! 内核常量与可调配置

/// 管道环形缓冲区容量（字节）
pub const PIPE_BUFFER_SIZE: usize = 256;
/// 进程表大小
pub const MAX_PROC: usize = 256;
/// 每个进程的文件描述符数量
pub const MAX_FILEID: usize = 16;
/// 全局 FCB 数量上限
pub const MAX_FILES: usize = 512;
/// 最大端口号
pub const MAX_PORT: usize = 1023;
/// “无端口”哨兵
pub const NOPORT: usize = 0;
/// 进程信息记录中参数块的最大拷贝长度
pub const PROCINFO_MAX_ARGS_SIZE: usize = 128;
/// Connect 不设超时
pub const NO_TIMEOUT: u64 = u64::MAX;

/// 内核实例的运行时配置
///
/// ## Overview
/// 默认值取自上面的常量，测试可以通过 `with_*` 缩小各类资源池。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelConfig {
    pub max_proc: usize,
    pub max_fileid: usize,
    pub max_files: usize,
    pub max_port: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_proc: MAX_PROC,
            max_fileid: MAX_FILEID,
            max_files: MAX_FILES,
            max_port: MAX_PORT,
        }
    }
}

impl KernelConfig {
    /// 进程表至少要容纳 idle(0) 与 init(1)
    pub fn with_max_proc(mut self, max_proc: usize) -> Self {
        self.max_proc = max_proc.max(2);
        self
    }

    pub fn with_max_fileid(mut self, max_fileid: usize) -> Self {
        self.max_fileid = max_fileid;
        self
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_max_port(mut self, max_port: usize) -> Self {
        self.max_port = max_port;
        self
    }
}
