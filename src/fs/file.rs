//! # 文件抽象与描述符表
//!
//! ## Overview
//! - `File`：所有可通过描述符读写的内核对象（管道端、套接字、进程信息流）的统一接口
//! - `FileTable`：全局 FCB 表，FCB 带共享引用计数，归零时调用 `File::close`
//! - 每个进程在 `fidt` 中保存 fid → FCB 的映射
//!
//! ## Invariants
//! - 描述符预留是“全有或全无”的：要么 n 个全部可用，要么一个也不占用
//! - 预留与安装之间不会释放内核锁

use crate::error::{KernelResult, SysError};
use crate::kernel::{KernelState, StateGuard};
use crate::net::SocketId;
use crate::task::Pid;
use crate::util::IdTable;
use log::trace;
use std::sync::Arc;

/// 全局 FCB 表中的下标
pub type FcbId = usize;
/// 进程描述符表中的下标
pub type Fid = usize;

pub trait File: Send + Sync {
    fn readable(&self) -> bool {
        false
    }
    fn writable(&self) -> bool {
        false
    }
    /// 可能在等待期间释放内核锁
    fn read(&self, _st: &mut StateGuard<'_>, _buf: &mut [u8]) -> KernelResult<usize> {
        Err(SysError::InvalidState)
    }
    fn write(&self, _st: &mut StateGuard<'_>, _buf: &[u8]) -> KernelResult<usize> {
        Err(SysError::InvalidState)
    }
    /// 最后一个引用消失时调用，不得阻塞
    fn close(&self, _st: &mut KernelState) -> KernelResult<()> {
        Ok(())
    }
    fn as_socket(&self) -> Option<SocketId> {
        None
    }
}

pub(crate) struct FileControlBlock {
    refcount: usize,
    file: Arc<dyn File>,
}

pub(crate) struct FileTable {
    fcbs: IdTable<FileControlBlock>,
    max_files: usize,
}

impl FileTable {
    pub fn new(max_files: usize) -> Self {
        Self {
            fcbs: IdTable::new(),
            max_files,
        }
    }

    /// 还能分配的 FCB 数量
    pub fn available(&self) -> usize {
        self.max_files.saturating_sub(self.fcbs.len())
    }

    fn alloc(&mut self, file: Arc<dyn File>) -> FcbId {
        self.fcbs.insert(FileControlBlock { refcount: 1, file })
    }

    pub fn incref(&mut self, id: FcbId) {
        if let Some(fcb) = self.fcbs.get_mut(id) {
            fcb.refcount += 1;
        }
    }

    /// 引用计数减一，归零时移除并交还文件对象
    pub fn decref(&mut self, id: FcbId) -> Option<Arc<dyn File>> {
        let fcb = self.fcbs.get_mut(id)?;
        fcb.refcount -= 1;
        if fcb.refcount > 0 {
            return None;
        }
        self.fcbs.remove(id).map(|fcb| fcb.file)
    }

    pub fn file(&self, id: FcbId) -> Option<Arc<dyn File>> {
        self.fcbs.get(id).map(|fcb| Arc::clone(&fcb.file))
    }
}

/// 为进程 `pid` 预留 `n` 个描述符
///
/// 只检查、不占用；调用者须在同一临界区内用 `fcb_install` 依次安装。
///
/// ## Returns
/// - `Err(ResourceExhausted)`：进程描述符表或全局 FCB 表空间不足
pub(crate) fn fcb_reserve(st: &KernelState, pid: Pid, n: usize) -> KernelResult<Vec<Fid>> {
    let pcb = st.procs.get(pid).ok_or(SysError::NoTask)?;
    if st.files.available() < n {
        return Err(SysError::ResourceExhausted);
    }
    let fids: Vec<Fid> = pcb
        .fidt
        .iter()
        .enumerate()
        .filter(|(_, slot)| slot.is_none())
        .map(|(fid, _)| fid)
        .take(n)
        .collect();
    if fids.len() < n {
        return Err(SysError::ResourceExhausted);
    }
    Ok(fids)
}

/// 分配 FCB 并安装到预留好的 `fid`
pub(crate) fn fcb_install(
    st: &mut KernelState,
    pid: Pid,
    fid: Fid,
    file: Arc<dyn File>,
) -> KernelResult<FcbId> {
    let fcb = st.files.alloc(file);
    match st.procs.get_mut(pid).and_then(|pcb| pcb.fidt.get_mut(fid)) {
        Some(slot) if slot.is_none() => {
            *slot = Some(fcb);
            trace!("pid {} installed fcb {} at fid {}", pid, fcb, fid);
            Ok(fcb)
        }
        _ => {
            st.files.decref(fcb);
            Err(SysError::InvalidState)
        }
    }
}

pub(crate) fn get_file(st: &KernelState, pid: Pid, fid: Fid) -> KernelResult<Arc<dyn File>> {
    st.procs
        .get(pid)
        .and_then(|pcb| pcb.fidt.get(fid).copied().flatten())
        .and_then(|fcb| st.files.file(fcb))
        .ok_or(SysError::InvalidHandle)
}

/// 引用计数归零时执行 `File::close`
pub(crate) fn fcb_decref(st: &mut KernelState, fcb: FcbId) -> KernelResult<()> {
    match st.files.decref(fcb) {
        Some(file) => file.close(st),
        None => Ok(()),
    }
}

/// 关闭进程的描述符
pub(crate) fn close_fid(st: &mut KernelState, pid: Pid, fid: Fid) -> KernelResult<()> {
    let fcb = st
        .procs
        .get_mut(pid)
        .and_then(|pcb| pcb.fidt.get_mut(fid))
        .and_then(|slot| slot.take())
        .ok_or(SysError::InvalidHandle)?;
    fcb_decref(st, fcb)
}
