use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tinyos_kernel::syscall::{
    sys_close, sys_create_thread, sys_pipe, sys_read, sys_thread_join, sys_write, PipeFds,
};
use tinyos_kernel::{boot, KernelConfig, SysError};

const TOTAL: usize = 300;

fn pattern(i: usize) -> u8 {
    (i * 7 % 251) as u8
}

static PRODUCER_DONE: AtomicBool = AtomicBool::new(false);

fn producer(fd: i32, _args: &[u8]) -> i32 {
    let data: Vec<u8> = (0..TOTAL).map(pattern).collect();
    let written = sys_write(fd as usize, &data);
    PRODUCER_DONE.store(true, Ordering::SeqCst);
    written as i32
}

fn consumer(fd: i32, _args: &[u8]) -> i32 {
    let mut received = Vec::new();
    let mut chunk = [0u8; 100];
    loop {
        let n = sys_read(fd as usize, &mut chunk);
        assert!(n >= 0, "read failed: {}", n);
        if n == 0 {
            break;
        }
        received.extend_from_slice(&chunk[..n as usize]);
    }
    let expected: Vec<u8> = (0..TOTAL).map(pattern).collect();
    assert_eq!(received, expected);
    received.len() as i32
}

fn producer_consumer(_argl: i32, _args: &[u8]) -> i32 {
    let mut fds = PipeFds::default();
    assert_eq!(sys_pipe(&mut fds), 0);

    let producer = sys_create_thread(Some(producer), fds.write as i32, None);
    thread::sleep(Duration::from_millis(50));
    assert!(
        !PRODUCER_DONE.load(Ordering::SeqCst),
        "300 bytes cannot fit a 256-byte pipe without a reader"
    );

    let consumer = sys_create_thread(Some(consumer), fds.read as i32, None);
    let mut written = 0;
    assert_eq!(sys_thread_join(producer, Some(&mut written)), 0);
    assert_eq!(written as usize, TOTAL);

    assert_eq!(sys_close(fds.write), 0);
    let mut read = 0;
    assert_eq!(sys_thread_join(consumer, Some(&mut read)), 0);
    assert_eq!(read as usize, TOTAL);
    assert_eq!(sys_close(fds.read), 0);
    0
}

#[test]
fn producer_blocks_until_consumer_drains() {
    assert_eq!(boot(KernelConfig::default(), producer_consumer, 0, None), Ok(0));
}

fn floods(fd: i32, _args: &[u8]) -> i32 {
    sys_write(fd as usize, &[0xAB; 400]) as i32
}

fn reader_closes_under_writer(_argl: i32, _args: &[u8]) -> i32 {
    let mut fds = PipeFds::default();
    assert_eq!(sys_pipe(&mut fds), 0);
    let writer = sys_create_thread(Some(floods), fds.write as i32, None);
    thread::sleep(Duration::from_millis(30));
    assert_eq!(sys_close(fds.read), 0);

    let mut written = 0;
    assert_eq!(sys_thread_join(writer, Some(&mut written)), 0);
    assert_eq!(written, 256);
    assert_eq!(sys_write(fds.write, b"x"), SysError::InvalidState.code());
    assert_eq!(sys_close(fds.write), 0);
    assert_eq!(sys_close(fds.write), SysError::InvalidHandle.code());
    0
}

#[test]
fn closing_the_read_end_stops_a_blocked_writer() {
    assert_eq!(
        boot(KernelConfig::default(), reader_closes_under_writer, 0, None),
        Ok(0)
    );
}

fn eof_after_buffered_bytes(_argl: i32, _args: &[u8]) -> i32 {
    let mut fds = PipeFds::default();
    assert_eq!(sys_pipe(&mut fds), 0);
    assert_eq!(sys_write(fds.write, b"tail"), 4);
    assert_eq!(sys_close(fds.write), 0);

    let mut buf = [0u8; 16];
    assert_eq!(sys_read(fds.read, &mut buf), 4);
    assert_eq!(&buf[..4], b"tail");
    assert_eq!(sys_read(fds.read, &mut buf), 0);

    assert_eq!(sys_write(fds.read, b"no"), SysError::InvalidState.code());
    assert_eq!(sys_read(42, &mut buf), SysError::InvalidHandle.code());
    0
}

#[test]
fn reader_sees_buffered_bytes_then_eof() {
    assert_eq!(
        boot(KernelConfig::default(), eof_after_buffered_bytes, 0, None),
        Ok(0)
    );
}
