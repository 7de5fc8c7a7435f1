//! # 管道（有界循环字节缓冲区）
//!
//! ## Overview
//! 一个管道连接一个写端与一个读端，容量为 `PIPE_BUFFER_SIZE` 字节。
//! 管道对象保存在内核状态的 `PipeTable` 中，由 `PipeReader` / `PipeWriter`
//! 或已连接的套接字按 ID 引用。
//!
//! ## Behavior
//! - 写：缓冲区满且读端仍打开时阻塞；读端在等待期间关闭则提前返回已写字节数
//! - 读：写端已关闭且缓冲区为空时立即返回 0（EOF）；
//!   缓冲区空且写端仍打开时阻塞；写端在等待期间关闭则返回已读字节数
//! - 阻塞前先唤醒对端，避免双方同时睡眠
//!
//! ## Invariants
//! - `0 <= count <= PIPE_BUFFER_SIZE`
//! - 两端都关闭后管道才从表中移除

use super::file::{fcb_install, fcb_reserve, File, Fid};
use crate::config::PIPE_BUFFER_SIZE;
use crate::error::{KernelResult, SysError};
use crate::kernel::{KernelState, StateGuard};
use crate::sync::Condvar;
use crate::task::Pid;
use crate::util::IdTable;
use log::{debug, trace};
use std::sync::Arc;

pub type PipeId = usize;

pub(crate) struct Pipe {
    buffer: [u8; PIPE_BUFFER_SIZE],
    w_position: usize,
    r_position: usize,
    count: usize,
    pub reader_open: bool,
    pub writer_open: bool,
    has_space: Arc<Condvar>,
    has_data: Arc<Condvar>,
}

pub(crate) type PipeTable = IdTable<Pipe>;

impl Pipe {
    pub fn new() -> Self {
        Self {
            buffer: [0; PIPE_BUFFER_SIZE],
            w_position: 0,
            r_position: 0,
            count: 0,
            reader_open: true,
            writer_open: true,
            has_space: Arc::new(Condvar::new()),
            has_data: Arc::new(Condvar::new()),
        }
    }

    pub fn is_full(&self) -> bool {
        self.count == PIPE_BUFFER_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn push(&mut self, byte: u8) {
        self.buffer[self.w_position] = byte;
        self.w_position = (self.w_position + 1) % PIPE_BUFFER_SIZE;
        self.count += 1;
    }

    fn pop(&mut self) -> Option<u8> {
        if self.is_empty() {
            return None;
        }
        let byte = self.buffer[self.r_position];
        self.r_position = (self.r_position + 1) % PIPE_BUFFER_SIZE;
        self.count -= 1;
        Some(byte)
    }
}

/// 向管道写入 `buf`，返回实际写入的字节数
///
/// ## Returns
/// - `Err(InvalidState)`：管道不存在，或任一端在调用时已关闭
pub(crate) fn pipe_write(st: &mut StateGuard<'_>, id: PipeId, buf: &[u8]) -> KernelResult<usize> {
    let (has_space, has_data) = match st.pipes.get(id) {
        Some(pipe) if pipe.reader_open && pipe.writer_open => {
            (Arc::clone(&pipe.has_space), Arc::clone(&pipe.has_data))
        }
        _ => return Err(SysError::InvalidState),
    };
    let mut written = 0;
    'bytes: for &byte in buf {
        loop {
            match st.pipes.get(id) {
                Some(pipe) if pipe.reader_open && pipe.writer_open => {
                    if !pipe.is_full() {
                        break;
                    }
                }
                _ => break 'bytes,
            }
            has_data.broadcast();
            trace!("pipe {} full, writer waits ({} written)", id, written);
            has_space.wait(st);
        }
        if let Some(pipe) = st.pipes.get_mut(id) {
            pipe.push(byte);
            written += 1;
        }
    }
    has_data.broadcast();
    Ok(written)
}

/// 从管道读取最多 `buf.len()` 字节，返回实际读取的字节数，0 表示 EOF
///
/// ## Returns
/// - `Err(InvalidState)`：管道不存在或读端已关闭
pub(crate) fn pipe_read(st: &mut StateGuard<'_>, id: PipeId, buf: &mut [u8]) -> KernelResult<usize> {
    let (has_space, has_data) = match st.pipes.get(id) {
        Some(pipe) if pipe.reader_open => {
            if !pipe.writer_open && pipe.is_empty() {
                return Ok(0);
            }
            (Arc::clone(&pipe.has_space), Arc::clone(&pipe.has_data))
        }
        _ => return Err(SysError::InvalidState),
    };
    let mut read = 0;
    'bytes: for slot in buf.iter_mut() {
        loop {
            match st.pipes.get(id) {
                Some(pipe) if pipe.reader_open => {
                    if !pipe.is_empty() {
                        break;
                    }
                    if !pipe.writer_open {
                        break 'bytes;
                    }
                }
                _ => break 'bytes,
            }
            has_space.broadcast();
            trace!("pipe {} empty, reader waits ({} read)", id, read);
            has_data.wait(st);
        }
        match st.pipes.get_mut(id).and_then(Pipe::pop) {
            Some(byte) => {
                *slot = byte;
                read += 1;
            }
            None => break,
        }
    }
    has_space.broadcast();
    Ok(read)
}

/// 关闭读端，唤醒阻塞的写者
pub(crate) fn pipe_close_read(st: &mut KernelState, id: PipeId) -> KernelResult<()> {
    let pipe = st.pipes.get_mut(id).ok_or(SysError::InvalidState)?;
    if !pipe.reader_open {
        return Err(SysError::InvalidState);
    }
    pipe.reader_open = false;
    pipe.has_space.broadcast();
    if !pipe.writer_open {
        st.pipes.remove(id);
        debug!("pipe {} released", id);
    }
    Ok(())
}

/// 关闭写端，唤醒阻塞的读者使其看到 EOF
pub(crate) fn pipe_close_write(st: &mut KernelState, id: PipeId) -> KernelResult<()> {
    let pipe = st.pipes.get_mut(id).ok_or(SysError::InvalidState)?;
    if !pipe.writer_open {
        return Err(SysError::InvalidState);
    }
    pipe.writer_open = false;
    pipe.has_data.broadcast();
    if !pipe.reader_open {
        st.pipes.remove(id);
        debug!("pipe {} released", id);
    }
    Ok(())
}

pub struct PipeReader {
    pipe: PipeId,
}

pub struct PipeWriter {
    pipe: PipeId,
}

impl File for PipeReader {
    fn readable(&self) -> bool {
        true
    }
    fn read(&self, st: &mut StateGuard<'_>, buf: &mut [u8]) -> KernelResult<usize> {
        pipe_read(st, self.pipe, buf)
    }
    fn close(&self, st: &mut KernelState) -> KernelResult<()> {
        pipe_close_read(st, self.pipe)
    }
}

impl File for PipeWriter {
    fn writable(&self) -> bool {
        true
    }
    fn write(&self, st: &mut StateGuard<'_>, buf: &[u8]) -> KernelResult<usize> {
        pipe_write(st, self.pipe, buf)
    }
    fn close(&self, st: &mut KernelState) -> KernelResult<()> {
        pipe_close_write(st, self.pipe)
    }
}

/// 创建管道并为 `pid` 安装读端与写端描述符
///
/// ## Returns
/// - `Ok((read_fid, write_fid))`
pub(crate) fn make_pipe(st: &mut KernelState, pid: Pid) -> KernelResult<(Fid, Fid)> {
    let fids = fcb_reserve(st, pid, 2)?;
    let id = st.pipes.insert(Pipe::new());
    fcb_install(st, pid, fids[0], Arc::new(PipeReader { pipe: id }))?;
    fcb_install(st, pid, fids[1], Arc::new(PipeWriter { pipe: id }))?;
    debug!("pid {} opened pipe {} as ({}, {})", pid, id, fids[0], fids[1]);
    Ok((fids[0], fids[1]))
}
