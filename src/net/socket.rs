//! # 本地套接字与连接会合
//!
//! ## Overview
//! 套接字是描述符层面的状态机：`Unbound` → `Listener` 或 `Unbound` → `Peer`，不可回退。
//! - `Listen`：把未绑定套接字登记为端口的唯一监听者
//! - `Connect`：在监听者队列尾部挂一个连接请求，阻塞到请求被接纳、被取消或超时
//! - `Accept`：取队首请求，新建服务端套接字与两条交叉连接的管道，唤醒连接方
//!
//! ## Assumptions
//! - 所有操作都在内核锁内进行，等待时由条件变量暂时释放内核锁
//!
//! ## Invariants
//! - `port_map[port]` 要么为空，要么指向一个 `Listener`
//! - 套接字记录只在引用计数归零时移除；阻塞中的 Accept / Connect 各持有一个引用
//! - 连接请求只由发起它的 Connect 释放

use crate::config::NOPORT;
use crate::error::{KernelResult, SysError};
use crate::fs::{
    fcb_install, fcb_reserve, pipe_close_read, pipe_close_write, pipe_read, pipe_write, Fid, File,
    Pipe, PipeId,
};
use crate::kernel::{KernelState, StateGuard};
use crate::sync::Condvar;
use crate::task::Pid;
use crate::util::IdTable;
use bitflags::bitflags;
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

pub type SocketId = usize;
pub type Port = usize;
pub(crate) type ReqId = usize;

bitflags! {
    /// ShutDown 要关闭的方向
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ShutdownMode: u32 {
        const READ = 1;
        const WRITE = 1 << 1;
        const BOTH = Self::READ.bits() | Self::WRITE.bits();
    }
}

pub(crate) enum SocketKind {
    Unbound,
    Listener {
        queue: VecDeque<ReqId>,
        req_available: Arc<Condvar>,
    },
    Peer {
        read_pipe: PipeId,
        write_pipe: PipeId,
    },
}

pub(crate) struct Socket {
    refcount: usize,
    pub port: Port,
    pub kind: SocketKind,
}

impl Socket {
    pub fn is_unbound(&self) -> bool {
        matches!(self.kind, SocketKind::Unbound)
    }
}

pub(crate) struct ConnectionRequest {
    admitted: bool,
    /// 监听者被拆除时置位
    cancelled: bool,
    client: SocketId,
    connected_cv: Arc<Condvar>,
}

pub(crate) struct SocketTable {
    sockets: IdTable<Socket>,
    requests: IdTable<ConnectionRequest>,
    port_map: Vec<Option<SocketId>>,
}

impl SocketTable {
    pub fn new(max_port: Port) -> Self {
        Self {
            sockets: IdTable::new(),
            requests: IdTable::new(),
            port_map: vec![None; max_port + 1],
        }
    }

    pub fn max_port(&self) -> Port {
        self.port_map.len() - 1
    }

    /// 端口上的监听者
    pub fn listener_on(&self, port: Port) -> Option<SocketId> {
        self.port_map.get(port).copied().flatten()
    }

    /// 监听者队列中尚未处理的请求数
    #[cfg(test)]
    pub fn backlog(&self, lid: SocketId) -> usize {
        match self.sockets.get(lid).map(|sock| &sock.kind) {
            Some(SocketKind::Listener { queue, .. }) => queue.len(),
            _ => 0,
        }
    }

    #[cfg(test)]
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    fn retain(&mut self, sid: SocketId) {
        if let Some(sock) = self.sockets.get_mut(sid) {
            sock.refcount += 1;
        }
    }

    fn valid_port(&self, port: Port) -> bool {
        port != NOPORT && port <= self.max_port()
    }
}

/// 创建未绑定的套接字并安装描述符
///
/// ## Returns
/// - `Err(InvalidHandle)`：端口超出 `NOPORT..=max_port`
/// - `Err(ResourceExhausted)`：描述符不足
pub(crate) fn socket_create(st: &mut KernelState, pid: Pid, port: Port) -> KernelResult<Fid> {
    if port > st.sockets.max_port() {
        return Err(SysError::InvalidHandle);
    }
    let fids = fcb_reserve(st, pid, 1)?;
    let sid = st.sockets.sockets.insert(Socket {
        refcount: 1,
        port,
        kind: SocketKind::Unbound,
    });
    fcb_install(st, pid, fids[0], Arc::new(SocketFile { sid }))?;
    debug!("pid {} created socket {} on port {}", pid, sid, port);
    Ok(fids[0])
}

/// Listen
///
/// ## Returns
/// - `Err(InvalidState)`：套接字不是 `Unbound`、端口无效或已被占用
pub(crate) fn listen(st: &mut KernelState, sid: SocketId) -> KernelResult<()> {
    let table = &mut st.sockets;
    let port = match table.sockets.get(sid) {
        Some(sock) if sock.is_unbound() => sock.port,
        Some(_) => return Err(SysError::InvalidState),
        None => return Err(SysError::InvalidHandle),
    };
    if !table.valid_port(port) || table.port_map[port].is_some() {
        return Err(SysError::InvalidState);
    }
    if let Some(sock) = table.sockets.get_mut(sid) {
        sock.kind = SocketKind::Listener {
            queue: VecDeque::new(),
            req_available: Arc::new(Condvar::new()),
        };
    }
    table.port_map[port] = Some(sid);
    debug!("socket {} listening on port {}", sid, port);
    Ok(())
}

/// 在 `port` 的监听者队列尾部挂入连接请求并唤醒监听者
fn enqueue_request(st: &mut KernelState, sid: SocketId, port: Port) -> KernelResult<ReqId> {
    let table = &mut st.sockets;
    match table.sockets.get(sid) {
        Some(sock) if sock.is_unbound() => {}
        Some(_) => return Err(SysError::InvalidState),
        None => return Err(SysError::InvalidHandle),
    }
    if !table.valid_port(port) {
        return Err(SysError::InvalidHandle);
    }
    let lid = table.listener_on(port).ok_or(SysError::InvalidHandle)?;
    let req = table.requests.insert(ConnectionRequest {
        admitted: false,
        cancelled: false,
        client: sid,
        connected_cv: Arc::new(Condvar::new()),
    });
    if let Some(Socket {
        kind: SocketKind::Listener {
            queue,
            req_available,
        },
        ..
    }) = table.sockets.get_mut(lid)
    {
        queue.push_back(req);
        req_available.signal();
    }
    table.retain(sid);
    trace!("socket {} queued request {} on port {}", sid, req, port);
    Ok(req)
}

/// Connect
///
/// ## Behavior
/// - 阻塞直到请求被接纳、被取消或截止时刻到达，每次唤醒后重新检查
/// - 无论成败，返回前都把自己的请求从队列中摘下并释放
///
/// ## Returns
/// - `Err(InvalidHandle)`：端口无效或没有监听者
/// - `Err(ProtocolViolation)`：等待期间监听者被拆除
/// - `Err(Timeout)`：超时
pub(crate) fn connect(
    st: &mut StateGuard<'_>,
    sid: SocketId,
    port: Port,
    deadline: Option<Instant>,
) -> KernelResult<()> {
    let req = enqueue_request(st, sid, port)?;
    let cv = match st.sockets.requests.get(req) {
        Some(request) => Arc::clone(&request.connected_cv),
        None => return Err(SysError::InvalidState),
    };
    let mut timed_out = false;
    let outcome = loop {
        match st.sockets.requests.get(req) {
            Some(request) if request.admitted => break Ok(()),
            Some(request) if request.cancelled => break Err(SysError::ProtocolViolation),
            Some(_) => {}
            None => break Err(SysError::InvalidState),
        }
        if timed_out {
            break Err(SysError::Timeout);
        }
        timed_out = match deadline {
            Some(deadline) => cv.wait_until(st, deadline),
            None => {
                cv.wait(st);
                false
            }
        };
    };
    drop_request(st, req, port);
    release_socket(st, sid);
    match outcome {
        Ok(()) => debug!("socket {} connected to port {}", sid, port),
        Err(err) => debug!("socket {} failed to connect to port {}: {}", sid, port, err),
    }
    outcome
}

/// 从监听者队列中摘下并释放请求
fn drop_request(st: &mut KernelState, req: ReqId, port: Port) {
    let table = &mut st.sockets;
    if let Some(lid) = table.listener_on(port) {
        if let Some(Socket {
            kind: SocketKind::Listener { queue, .. },
            ..
        }) = table.sockets.get_mut(lid)
        {
            queue.retain(|&r| r != req);
        }
    }
    table.requests.remove(req);
}

/// Accept
///
/// ## Behavior
/// - 队列为空时阻塞；每次唤醒后先确认监听者仍登记在端口表中
/// - 多个 Accept 可以并发，各自按 FIFO 顺序服务一个请求
///
/// ## Returns
/// - `Ok(fid)`：服务端新套接字的描述符
/// - `Err(InvalidState)`：不是监听者
/// - `Err(ProtocolViolation)`：等待期间监听者被拆除
/// - `Err(ResourceExhausted)`：无法为新套接字分配描述符，请求留在队首并唤醒下一个 Accept
pub(crate) fn accept(st: &mut StateGuard<'_>, pid: Pid, lid: SocketId) -> KernelResult<Fid> {
    let (port, req_available) = match st.sockets.sockets.get(lid) {
        Some(Socket {
            port,
            kind: SocketKind::Listener { req_available, .. },
            ..
        }) => (*port, Arc::clone(req_available)),
        Some(_) => return Err(SysError::InvalidState),
        None => return Err(SysError::InvalidHandle),
    };
    st.sockets.retain(lid);
    let outcome = loop {
        if st.sockets.listener_on(port) != Some(lid) {
            warn!("listener {} on port {} torn down during accept", lid, port);
            break Err(SysError::ProtocolViolation);
        }
        if let Some(req) = front_request(st, lid) {
            let admitted = admit(st, pid, lid, req);
            if admitted.is_err() {
                // 请求仍在队首，交给下一个等待的 Accept
                req_available.signal();
            }
            break admitted;
        }
        trace!("listener {} waits for requests", lid);
        req_available.wait(st);
    };
    release_socket(st, lid);
    outcome
}

/// 队首仍然有效的请求；客户端已不再是 `Unbound` 的请求直接取消
fn front_request(st: &mut KernelState, lid: SocketId) -> Option<ReqId> {
    let table = &mut st.sockets;
    loop {
        let req = match table.sockets.get(lid) {
            Some(Socket {
                kind: SocketKind::Listener { queue, .. },
                ..
            }) => *queue.front()?,
            _ => return None,
        };
        let stale = match table.requests.get(req) {
            Some(request) => !table
                .sockets
                .get(request.client)
                .map_or(false, Socket::is_unbound),
            None => true,
        };
        if !stale {
            return Some(req);
        }
        if let Some(Socket {
            kind: SocketKind::Listener { queue, .. },
            ..
        }) = table.sockets.get_mut(lid)
        {
            queue.pop_front();
        }
        if let Some(request) = table.requests.get_mut(req) {
            request.cancelled = true;
            request.connected_cv.signal();
        }
        trace!("listener {} dropped stale request {}", lid, req);
    }
}

/// 接纳队首请求：先预留描述符，再建立服务端套接字与两条交叉管道
fn admit(st: &mut KernelState, pid: Pid, lid: SocketId, req: ReqId) -> KernelResult<Fid> {
    let fids = fcb_reserve(st, pid, 1)?;
    let port = st.sockets.sockets.get(lid).map_or(NOPORT, |sock| sock.port);
    if let Some(Socket {
        kind: SocketKind::Listener { queue, .. },
        ..
    }) = st.sockets.sockets.get_mut(lid)
    {
        queue.pop_front();
    }
    let client = st
        .sockets
        .requests
        .get(req)
        .map(|request| request.client)
        .ok_or(SysError::InvalidState)?;

    // client -> server
    let upstream = st.pipes.insert(Pipe::new());
    // server -> client
    let downstream = st.pipes.insert(Pipe::new());
    let server = st.sockets.sockets.insert(Socket {
        refcount: 1,
        port,
        kind: SocketKind::Peer {
            read_pipe: upstream,
            write_pipe: downstream,
        },
    });
    if let Some(sock) = st.sockets.sockets.get_mut(client) {
        sock.kind = SocketKind::Peer {
            read_pipe: downstream,
            write_pipe: upstream,
        };
    }
    fcb_install(st, pid, fids[0], Arc::new(SocketFile { sid: server }))?;
    if let Some(request) = st.sockets.requests.get_mut(req) {
        request.admitted = true;
        request.connected_cv.signal();
    }
    debug!(
        "listener {} admitted socket {} as peer {} (fid {})",
        lid, client, server, fids[0]
    );
    Ok(fids[0])
}

/// ShutDown
///
/// ## Behavior
/// - `READ` 关闭自己读管道的读端，`WRITE` 关闭自己写管道的写端，`BOTH` 两者都关
/// - 所请求的方向中只要有一个原本打开就算成功
pub(crate) fn shutdown(st: &mut KernelState, sid: SocketId, mode: ShutdownMode) -> KernelResult<()> {
    let (read_pipe, write_pipe) = match st.sockets.sockets.get(sid).map(|sock| &sock.kind) {
        Some(SocketKind::Peer {
            read_pipe,
            write_pipe,
            ..
        }) => (*read_pipe, *write_pipe),
        Some(_) => return Err(SysError::InvalidState),
        None => return Err(SysError::InvalidHandle),
    };
    if mode.is_empty() {
        return Err(SysError::InvalidState);
    }
    let mut closed_any = false;
    if mode.contains(ShutdownMode::READ) {
        closed_any |= pipe_close_read(st, read_pipe).is_ok();
    }
    if mode.contains(ShutdownMode::WRITE) {
        closed_any |= pipe_close_write(st, write_pipe).is_ok();
    }
    if closed_any {
        debug!("socket {} shut down {:?}", sid, mode);
        Ok(())
    } else {
        Err(SysError::InvalidState)
    }
}

/// 监听者拆除：取消全部排队请求、清除端口表项、唤醒阻塞的 Accept
fn teardown_listener(st: &mut KernelState, lid: SocketId) {
    let table = &mut st.sockets;
    let (port, queue, req_available) = match table.sockets.get_mut(lid) {
        Some(Socket {
            port,
            kind:
                SocketKind::Listener {
                    queue,
                    req_available,
                },
            ..
        }) => (*port, core::mem::take(queue), Arc::clone(req_available)),
        _ => return,
    };
    for req in queue {
        if let Some(request) = table.requests.get_mut(req) {
            request.cancelled = true;
            request.connected_cv.broadcast();
        }
    }
    if table.port_map.get(port).copied().flatten() == Some(lid) {
        table.port_map[port] = None;
    }
    req_available.broadcast();
    debug!("listener {} on port {} torn down", lid, port);
}

/// 关闭 Peer 仍然打开的读写端
fn close_peer_halves(st: &mut KernelState, sid: SocketId) {
    let (read_pipe, write_pipe) = match st.sockets.sockets.get(sid).map(|sock| &sock.kind) {
        Some(SocketKind::Peer {
            read_pipe,
            write_pipe,
            ..
        }) => (*read_pipe, *write_pipe),
        _ => return,
    };
    if st.pipes.get(read_pipe).map_or(false, |pipe| pipe.reader_open) {
        let _ = pipe_close_read(st, read_pipe);
    }
    if st.pipes.get(write_pipe).map_or(false, |pipe| pipe.writer_open) {
        let _ = pipe_close_write(st, write_pipe);
    }
}

/// 引用计数减一，归零时移除记录
fn release_socket(st: &mut KernelState, sid: SocketId) {
    let remaining = match st.sockets.sockets.get_mut(sid) {
        Some(sock) => {
            sock.refcount -= 1;
            sock.refcount
        }
        None => return,
    };
    if remaining == 0 {
        close_peer_halves(st, sid);
        st.sockets.sockets.remove(sid);
        trace!("socket {} released", sid);
    }
}

/// 描述符关闭：Peer 关闭两端，Listener 拆除，Unbound 不做处理
pub(crate) fn socket_close(st: &mut KernelState, sid: SocketId) -> KernelResult<()> {
    let (is_peer, is_listener) = match st.sockets.sockets.get(sid).map(|sock| &sock.kind) {
        Some(SocketKind::Peer { .. }) => (true, false),
        Some(SocketKind::Listener { .. }) => (false, true),
        Some(SocketKind::Unbound) => (false, false),
        None => return Err(SysError::InvalidHandle),
    };
    if is_peer {
        close_peer_halves(st, sid);
    } else if is_listener {
        teardown_listener(st, sid);
    }
    release_socket(st, sid);
    Ok(())
}

/// 套接字描述符
pub struct SocketFile {
    sid: SocketId,
}

impl SocketFile {
    fn pipes(&self, st: &KernelState) -> KernelResult<(PipeId, PipeId)> {
        match st.sockets.sockets.get(self.sid).map(|sock| &sock.kind) {
            Some(SocketKind::Peer {
                read_pipe,
                write_pipe,
                ..
            }) => Ok((*read_pipe, *write_pipe)),
            _ => Err(SysError::InvalidState),
        }
    }
}

impl File for SocketFile {
    fn readable(&self) -> bool {
        true
    }
    fn writable(&self) -> bool {
        true
    }
    fn read(&self, st: &mut StateGuard<'_>, buf: &mut [u8]) -> KernelResult<usize> {
        let (read_pipe, _) = self.pipes(st)?;
        pipe_read(st, read_pipe, buf)
    }
    fn write(&self, st: &mut StateGuard<'_>, buf: &[u8]) -> KernelResult<usize> {
        let (_, write_pipe) = self.pipes(st)?;
        pipe_write(st, write_pipe, buf)
    }
    fn close(&self, st: &mut KernelState) -> KernelResult<()> {
        socket_close(st, self.sid)
    }
    fn as_socket(&self) -> Option<SocketId> {
        Some(self.sid)
    }
}


#[cfg(test)]
mod rendezvous_tests {
    use crate::config::{NOPORT, NO_TIMEOUT};
    use crate::error::SysError;
    use crate::syscall::{sys_close, sys_connect, sys_create_thread, sys_listen, sys_socket, sys_thread_join};
    use crate::test_util::{listener_backlog, pending_requests, run_kernel, wait_for};

    fn connect_with_timeout(port: i32, _args: &[u8]) -> i32 {
        let fd = sys_socket(NOPORT);
        assert!(fd >= 0);
        sys_connect(fd as usize, port as usize, 200) as i32
    }

    fn connect_unbounded(port: i32, _args: &[u8]) -> i32 {
        let fd = sys_socket(NOPORT);
        assert!(fd >= 0);
        sys_connect(fd as usize, port as usize, NO_TIMEOUT) as i32
    }

    fn timeout_unqueues_request(_argl: i32, _args: &[u8]) -> i32 {
        const PORT: usize = 200;
        let listener = sys_socket(PORT) as usize;
        assert_eq!(sys_listen(listener), 0);
        let client = sys_create_thread(Some(connect_with_timeout), PORT as i32, None);
        wait_for("request to be queued", || listener_backlog(listener) == 1);
        assert_eq!(pending_requests(), 1);

        let mut status = 0;
        assert_eq!(sys_thread_join(client, Some(&mut status)), 0);
        assert_eq!(status as isize, SysError::Timeout.code());
        assert_eq!(listener_backlog(listener), 0);
        assert_eq!(pending_requests(), 0);
        assert_eq!(sys_close(listener), 0);
        0
    }

    #[test]
    fn timed_out_connect_leaves_listener_queue_empty() {
        assert_eq!(run_kernel(timeout_unqueues_request), 0);
    }

    fn teardown_under_connect(_argl: i32, _args: &[u8]) -> i32 {
        const PORT: usize = 201;
        let listener = sys_socket(PORT) as usize;
        assert_eq!(sys_listen(listener), 0);
        let clients = [
            sys_create_thread(Some(connect_unbounded), PORT as i32, None),
            sys_create_thread(Some(connect_unbounded), PORT as i32, None),
        ];
        wait_for("both requests to be queued", || listener_backlog(listener) == 2);

        assert_eq!(sys_close(listener), 0);
        for client in clients {
            let mut status = 0;
            assert_eq!(sys_thread_join(client, Some(&mut status)), 0);
            assert_eq!(status as isize, SysError::ProtocolViolation.code());
        }
        assert_eq!(pending_requests(), 0);
        0
    }

    #[test]
    fn closing_listener_fails_blocked_connects() {
        assert_eq!(run_kernel(teardown_under_connect), 0);
    }
}
