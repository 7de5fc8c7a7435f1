//! # 进程信息流
//!
//! `OpenInfo` 返回一个只读描述符，每次读取得到下一个非空闲进程槽位的一条定长记录，
//! 遍历结束后读取返回 0。
//!
//! 记录布局（小端）：
//!
//! ```text
//! pid: u32 | ppid: i32 (-1 表示无) | alive: u8 | thread_count: u32 |
//! argl: i32 | args_len: u16 | args: [u8; PROCINFO_MAX_ARGS_SIZE]
//! ```

use super::process::ProcessState;
use super::Pid;
use crate::config::PROCINFO_MAX_ARGS_SIZE;
use crate::error::{KernelResult, SysError};
use crate::fs::{fcb_install, fcb_reserve, Fid, File};
use crate::kernel::{KernelState, StateGuard};
use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// 一条记录的字节数
pub const PROCINFO_RECORD_SIZE: usize = 4 + 4 + 1 + 4 + 4 + 2 + PROCINFO_MAX_ARGS_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcInfo {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    /// 为 false 表示僵尸
    pub alive: bool,
    pub thread_count: usize,
    pub argl: i32,
    /// 参数块前缀，最多 `PROCINFO_MAX_ARGS_SIZE` 字节
    pub args: Vec<u8>,
}

impl ProcInfo {
    pub fn to_bytes(&self) -> [u8; PROCINFO_RECORD_SIZE] {
        let mut record = [0u8; PROCINFO_RECORD_SIZE];
        let ppid = self.ppid.map_or(-1, |ppid| ppid as i32);
        let args_len = self.args.len().min(PROCINFO_MAX_ARGS_SIZE);
        record[0..4].copy_from_slice(&(self.pid as u32).to_le_bytes());
        record[4..8].copy_from_slice(&ppid.to_le_bytes());
        record[8] = self.alive as u8;
        record[9..13].copy_from_slice(&(self.thread_count as u32).to_le_bytes());
        record[13..17].copy_from_slice(&self.argl.to_le_bytes());
        record[17..19].copy_from_slice(&(args_len as u16).to_le_bytes());
        record[19..19 + args_len].copy_from_slice(&self.args[..args_len]);
        record
    }

    /// 解析一条记录，长度不足时返回 `None`
    pub fn parse(record: &[u8]) -> Option<ProcInfo> {
        if record.len() < PROCINFO_RECORD_SIZE {
            return None;
        }
        let u32_at = |at: usize| u32::from_le_bytes([record[at], record[at + 1], record[at + 2], record[at + 3]]);
        let ppid = u32_at(4) as i32;
        let args_len = (u16::from_le_bytes([record[17], record[18]]) as usize).min(PROCINFO_MAX_ARGS_SIZE);
        Some(ProcInfo {
            pid: u32_at(0) as Pid,
            ppid: if ppid < 0 { None } else { Some(ppid as Pid) },
            alive: record[8] != 0,
            thread_count: u32_at(9) as usize,
            argl: u32_at(13) as i32,
            args: record[19..19 + args_len].to_vec(),
        })
    }
}

fn snapshot(st: &KernelState, from: Pid) -> Option<ProcInfo> {
    let (pid, pcb) = st.procs.next_used(from)?;
    let args = pcb
        .args
        .as_deref()
        .map(|args| args[..args.len().min(PROCINFO_MAX_ARGS_SIZE)].to_vec())
        .unwrap_or_default();
    Some(ProcInfo {
        pid,
        ppid: pcb.parent,
        alive: pcb.state == ProcessState::Alive,
        thread_count: pcb.thread_count,
        argl: pcb.argl,
        args,
    })
}

/// 进程信息流的描述符对象，游标为下一个要检查的 pid
pub struct ProcInfoFile {
    cursor: AtomicUsize,
}

impl File for ProcInfoFile {
    fn readable(&self) -> bool {
        true
    }

    fn read(&self, st: &mut StateGuard<'_>, buf: &mut [u8]) -> KernelResult<usize> {
        if buf.len() < PROCINFO_RECORD_SIZE {
            return Err(SysError::InvalidState);
        }
        let info = match snapshot(st, self.cursor.load(Ordering::Relaxed)) {
            Some(info) => info,
            None => return Ok(0),
        };
        self.cursor.store(info.pid + 1, Ordering::Relaxed);
        buf[..PROCINFO_RECORD_SIZE].copy_from_slice(&info.to_bytes());
        Ok(PROCINFO_RECORD_SIZE)
    }
}

pub(crate) fn open_info(st: &mut KernelState, pid: Pid) -> KernelResult<Fid> {
    let fids = fcb_reserve(st, pid, 1)?;
    let file = Arc::new(ProcInfoFile {
        cursor: AtomicUsize::new(0),
    });
    fcb_install(st, pid, fids[0], file)?;
    Ok(fids[0])
}
