//! # 网络模块（net）
//!
//! 只有内核内部的本地套接字，没有真实的网络传输；
//! 一对已连接的套接字之间的数据流由两条管道承载。

mod socket;

pub use socket::{Port, ShutdownMode, SocketFile, SocketId};

pub(crate) use socket::{accept, connect, listen, shutdown, socket_create, SocketTable};
