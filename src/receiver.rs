use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, trace};

use crate::error::ReceiverError;
use crate::io_helpers;
use crate::protocol;
use crate::sink::ByteSink;

// One UDP socket and one worker thread per receiver.
pub struct ReceiverPeer {
    stop_flag: Arc<AtomicBool>,
    finished_flag: Arc<AtomicBool>,
    error_slot: Arc<Mutex<Option<ReceiverError>>>,
    worker: Option<JoinHandle<()>>,
}

impl ReceiverPeer {
    pub fn new(sink: Box<dyn ByteSink>, peer_addr: SocketAddrV4, timeout: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let finished_flag = Arc::new(AtomicBool::new(false));
        let error_slot: Arc<Mutex<Option<ReceiverError>>> = Arc::new(Mutex::new(None));

        let worker = {
            let stop_flag = Arc::clone(&stop_flag);
            let finished_flag = Arc::clone(&finished_flag);
            let error_slot = Arc::clone(&error_slot);
            std::thread::spawn(move || {
                run(sink, peer_addr, timeout, stop_flag, finished_flag, error_slot)
            })
        };

        Self {
            stop_flag,
            finished_flag,
            error_slot,
            worker: Some(worker),
        }
    }

    pub fn with_default_timeout(sink: Box<dyn ByteSink>, peer_addr: SocketAddrV4) -> Self {
        Self::new(sink, peer_addr, Duration::from_millis(500))
    }

    pub fn error_occurred(&self) -> bool {
        self.error_slot.lock().expect("error slot poisoned").is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        self.error_slot
            .lock()
            .expect("error slot poisoned")
            .as_ref()
            .map(|e| e.to_string())
    }

    pub fn error_code(&self) -> Option<i32> {
        self.error_slot
            .lock()
            .expect("error slot poisoned")
            .as_ref()
            .map(|e| e.code())
    }

    pub fn is_running(&self) -> bool {
        !self.finished_flag.load(Ordering::SeqCst)
    }

    // Idempotent; joins the worker before returning.
    pub fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.stop_flag.store(false, Ordering::SeqCst);
    }
}

impl Drop for ReceiverPeer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn latch_error(error_slot: &Mutex<Option<ReceiverError>>, err: ReceiverError) {
    let mut slot = error_slot.lock().expect("error slot poisoned");
    if slot.is_none() {
        error!("receiver error: {err}");
        *slot = Some(err);
    }
}

fn run(
    mut sink: Box<dyn ByteSink>,
    peer_addr: SocketAddrV4,
    timeout: Duration,
    stop_flag: Arc<AtomicBool>,
    finished_flag: Arc<AtomicBool>,
    error_slot: Arc<Mutex<Option<ReceiverError>>>,
) {
    // Bind here, not inside run_inner, so the socket outlives the sink: it
    // must close after the sink is flushed and released, not before.
    match UdpSocket::bind(("0.0.0.0", 0)).map_err(ReceiverError::Socket) {
        Ok(socket) => {
            debug!("receiver opened socket on {:?}", socket.local_addr());
            if let Err(err) = run_inner(&socket, peer_addr, timeout, &stop_flag, sink.as_mut()) {
                latch_error(&error_slot, err);
            }
            if let Err(e) = sink.flush() {
                latch_error(&error_slot, ReceiverError::Stream(e));
            }
            drop(sink);
            drop(socket);
        }
        Err(err) => {
            latch_error(&error_slot, err);
            drop(sink);
        }
    }
    finished_flag.store(true, Ordering::SeqCst);
}

fn run_inner(
    socket: &UdpSocket,
    peer_addr: SocketAddrV4,
    timeout: Duration,
    stop_flag: &AtomicBool,
    sink: &mut dyn ByteSink,
) -> Result<(), ReceiverError> {
    let peer_socket_addr = SocketAddr::V4(peer_addr);
    let Some(packet_size) = perform_handshake(socket, peer_socket_addr, timeout, stop_flag)?
    else {
        return Ok(());
    };
    info!("receiver negotiated packet size {packet_size}");

    let mut working_buffer = vec![0u8; packet_size as usize];
    request_loop(
        socket,
        peer_socket_addr,
        &mut working_buffer,
        packet_size,
        timeout,
        stop_flag,
        sink,
    )
}

// Resends HANDSHAKE_INIT on every readiness timeout until a datagram from
// the configured peer IP arrives carrying a valid HANDSHAKE_ACK.
fn perform_handshake(
    socket: &UdpSocket,
    peer_addr: SocketAddr,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> Result<Option<u16>, ReceiverError> {
    let mut buf = [0u8; protocol::HANDSHAKE_ACK_LEN];
    loop {
        if !io_helpers::send_with_retry(socket, &protocol::HANDSHAKE_INIT, peer_addr, stop_flag)
            .map_err(ReceiverError::Socket)?
        {
            return Ok(None);
        }

        if !io_helpers::wait_for_data(socket, timeout, stop_flag).map_err(ReceiverError::Socket)? {
            continue; // nothing arrived within the window; resend INIT
        }

        loop {
            let received = io_helpers::recv_with_retry(socket, &mut buf, timeout, stop_flag)
                .map_err(ReceiverError::Socket)?;
            let Some((n, from)) = received else {
                return Ok(None);
            };
            if from.ip() != peer_addr.ip() {
                continue;
            }
            return match protocol::decode_handshake_ack(&buf[..n]) {
                Some(packet_size) => Ok(Some(packet_size)),
                None => Err(ReceiverError::InvalidHandshake),
            };
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn request_loop(
    socket: &UdpSocket,
    peer_addr: SocketAddr,
    working_buffer: &mut [u8],
    packet_size: u16,
    timeout: Duration,
    stop_flag: &AtomicBool,
    sink: &mut dyn ByteSink,
) -> Result<(), ReceiverError> {
    let mut next_id: u64 = 0;
    let mut offset: u64 = 0;

    loop {
        let req = protocol::Request {
            id: next_id,
            offset,
            max_len: packet_size,
        };
        let frame = protocol::encode_request(req);
        if !io_helpers::send_with_retry(socket, &frame, peer_addr, stop_flag)
            .map_err(ReceiverError::Socket)?
        {
            return Ok(());
        }

        let received = io_helpers::recv_with_retry(socket, working_buffer, timeout, stop_flag)
            .map_err(ReceiverError::Socket)?;
        let Some((packet_len, from)) = received else {
            return Ok(());
        };

        if from.ip() != peer_addr.ip() {
            continue; // repeat the same request
        }

        let Some(id) = protocol::decode_payload_header(&working_buffer[..packet_len]) else {
            continue; // wrong tag: repeat the same request
        };
        if id != next_id {
            continue; // stale payload: repeat the same request
        }

        let body = &working_buffer[protocol::PAYLOAD_HEADER_LEN..packet_len];
        sink.write_all(body).map_err(ReceiverError::Stream)?;
        offset += body.len() as u64;
        next_id += 1;
        trace!("accepted payload id={id} new offset={offset}");

        if packet_len < packet_size as usize {
            return Ok(());
        }
    }
}
