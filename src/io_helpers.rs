// Readiness is polled with UdpSocket::peek_from under a read timeout rather
// than blocking directly in recv_from, so stop_flag can be checked between
// attempts.

use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::trace;

fn data_available(socket: &UdpSocket, timeout: Duration) -> io::Result<bool> {
    socket.set_read_timeout(Some(timeout))?;
    let mut scratch = [0u8; 1];
    match socket.peek_from(&mut scratch) {
        Ok(_) => Ok(true),
        Err(e) if is_timeout(&e) => Ok(false),
        Err(e) => Err(e),
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

// Returns false only when cancelled via stop_flag.
pub fn wait_for_data(
    socket: &UdpSocket,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> io::Result<bool> {
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(false);
        }
        if data_available(socket, timeout)? {
            return Ok(true);
        }
    }
}

fn is_transient_recv_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::NetworkDown | io::ErrorKind::Interrupted
    )
}

fn is_transient_send_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::NetworkDown
            | io::ErrorKind::HostUnreachable
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
    )
}

// Ok(None) means cancelled via stop_flag before any datagram arrived.
pub fn recv_with_retry(
    socket: &UdpSocket,
    buf: &mut [u8],
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> io::Result<Option<(usize, SocketAddr)>> {
    if !wait_for_data(socket, timeout, stop_flag)? {
        return Ok(None);
    }

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(None);
        }
        match socket.recv_from(buf) {
            Ok((n, from)) => return Ok(Some((n, from))),
            Err(e) if is_transient_recv_error(&e) => {
                trace!("transient recv error, retrying: {e}");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}

pub fn send_with_retry(
    socket: &UdpSocket,
    data: &[u8],
    to: SocketAddr,
    stop_flag: &AtomicBool,
) -> io::Result<bool> {
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(false);
        }
        match socket.send_to(data, to) {
            Ok(_) => return Ok(true),
            Err(e) if is_transient_send_error(&e) => {
                trace!("transient send error, retrying: {e}");
                continue;
            }
            Err(e) => return Err(e),
        }
    }
}
