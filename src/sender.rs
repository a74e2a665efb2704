use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use log::{debug, error, info, trace, warn};

use crate::error::SenderError;
use crate::io_helpers;
use crate::protocol::{self, Request, DEFAULT_PACKET_SIZE, MIN_PACKET_SIZE};
use crate::source::ByteSource;

enum ServeOutcome {
    Stopped,
    Recover,
}

// One UDP socket and one worker thread per sender.
pub struct SenderPeer {
    stop_flag: Arc<AtomicBool>,
    finished_flag: Arc<AtomicBool>,
    error_slot: Arc<Mutex<Option<SenderError>>>,
    port: u16,
    packet_size: u16,
    timeout: Duration,
    worker: Option<JoinHandle<()>>,
}

impl SenderPeer {
    // packet_size must be >= protocol::MIN_PACKET_SIZE; rejected before the worker starts.
    pub fn new(
        source: Box<dyn ByteSource>,
        port: u16,
        packet_size: u16,
        timeout: Duration,
    ) -> Result<Self, SenderError> {
        if packet_size < MIN_PACKET_SIZE {
            return Err(SenderError::CorruptRequest);
        }

        let stop_flag = Arc::new(AtomicBool::new(false));
        let finished_flag = Arc::new(AtomicBool::new(false));
        let error_slot: Arc<Mutex<Option<SenderError>>> = Arc::new(Mutex::new(None));

        let worker = {
            let stop_flag = Arc::clone(&stop_flag);
            let finished_flag = Arc::clone(&finished_flag);
            let error_slot = Arc::clone(&error_slot);
            std::thread::spawn(move || {
                run(
                    source,
                    port,
                    packet_size,
                    timeout,
                    stop_flag,
                    finished_flag,
                    error_slot,
                )
            })
        };

        Ok(Self {
            stop_flag,
            finished_flag,
            error_slot,
            port,
            packet_size,
            timeout,
            worker: Some(worker),
        })
    }

    pub fn with_defaults(source: Box<dyn ByteSource>, port: u16) -> Result<Self, SenderError> {
        Self::new(source, port, DEFAULT_PACKET_SIZE, Duration::from_millis(500))
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn packet_size(&self) -> u16 {
        self.packet_size
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
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

impl Drop for SenderPeer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn latch_error(error_slot: &Mutex<Option<SenderError>>, err: SenderError) {
    let mut slot = error_slot.lock().expect("error slot poisoned");
    if slot.is_none() {
        error!("sender error: {err}");
        *slot = Some(err);
    }
}

#[allow(clippy::too_many_arguments)]
fn run(
    mut source: Box<dyn ByteSource>,
    port: u16,
    packet_size: u16,
    timeout: Duration,
    stop_flag: Arc<AtomicBool>,
    finished_flag: Arc<AtomicBool>,
    error_slot: Arc<Mutex<Option<SenderError>>>,
) {
    // Bind here, not inside run_inner, so the socket outlives the source: it
    // must close after the source is released, not before.
    match UdpSocket::bind(("0.0.0.0", port)).map_err(SenderError::Bind) {
        Ok(socket) => {
            debug!("sender bound to 0.0.0.0:{port}");
            if let Err(err) = run_inner(&socket, source.as_mut(), packet_size, timeout, &stop_flag)
            {
                latch_error(&error_slot, err);
            }
            drop(source);
            drop(socket);
        }
        Err(err) => {
            latch_error(&error_slot, err);
            drop(source);
        }
    }
    finished_flag.store(true, Ordering::SeqCst);
}

fn run_inner(
    socket: &UdpSocket,
    source: &mut dyn ByteSource,
    packet_size: u16,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> Result<(), SenderError> {
    let Some(peer_addr) = receive_handshake(socket, timeout, stop_flag)? else {
        return Ok(());
    };
    info!("sender saw handshake from {peer_addr}");

    send_handshake_ack(socket, peer_addr, packet_size, timeout, stop_flag)
        .map_err(SenderError::Socket)?;

    let acknowledged = AtomicBool::new(false);
    let mut packet = vec![0u8; packet_size as usize];

    loop {
        match serve_loop(
            socket,
            peer_addr,
            &mut packet,
            packet_size,
            timeout,
            stop_flag,
            &acknowledged,
            source,
        )? {
            ServeOutcome::Stopped => return Ok(()),
            ServeOutcome::Recover => {
                warn!("pre-acknowledgement stray datagram, re-announcing handshake");
                send_handshake_ack(socket, peer_addr, packet_size, timeout, stop_flag)
                    .map_err(SenderError::Socket)?;
            }
        }
    }
}

fn receive_handshake(
    socket: &UdpSocket,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> Result<Option<SocketAddr>, SenderError> {
    let mut buf = [0u8; 1];
    match io_helpers::recv_with_retry(socket, &mut buf, timeout, stop_flag)
        .map_err(SenderError::Socket)?
    {
        None => Ok(None),
        Some((_, from)) => {
            if buf[0] != protocol::TAG_HANDSHAKE {
                return Err(SenderError::CorruptHandshake);
            }
            Ok(Some(from))
        }
    }
}

fn send_handshake_ack(
    socket: &UdpSocket,
    peer_addr: SocketAddr,
    packet_size: u16,
    timeout: Duration,
    stop_flag: &AtomicBool,
) -> std::io::Result<()> {
    let frame = protocol::encode_handshake_ack(packet_size);
    loop {
        if stop_flag.load(Ordering::SeqCst) {
            return Ok(());
        }
        if !io_helpers::send_with_retry(socket, &frame, peer_addr, stop_flag)? {
            return Ok(());
        }
        if io_helpers::wait_for_data(socket, timeout, stop_flag)? {
            return Ok(());
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn serve_loop(
    socket: &UdpSocket,
    peer_addr: SocketAddr,
    packet: &mut [u8],
    packet_size: u16,
    timeout: Duration,
    stop_flag: &AtomicBool,
    acknowledged: &AtomicBool,
    source: &mut dyn ByteSource,
) -> Result<ServeOutcome, SenderError> {
    let mut req_buf = [0u8; protocol::REQUEST_LEN];
    loop {
        let received = io_helpers::recv_with_retry(socket, &mut req_buf, timeout, stop_flag)
            .map_err(SenderError::Socket)?;
        let Some((n, from)) = received else {
            return Ok(ServeOutcome::Stopped);
        };

        if from.ip() != peer_addr.ip() {
            if acknowledged.load(Ordering::SeqCst) {
                continue;
            }
            return Ok(ServeOutcome::Recover);
        }
        acknowledged.store(true, Ordering::SeqCst);

        let req: Request =
            protocol::decode_request(&req_buf[..n]).ok_or(SenderError::CorruptRequest)?;
        if req.max_len > packet_size || (req.max_len as usize) < protocol::PAYLOAD_HEADER_LEN {
            return Err(SenderError::CorruptRequest);
        }

        protocol::write_payload_header(packet, req.id);
        let body_cap = req.max_len as usize - protocol::PAYLOAD_HEADER_LEN;
        let read = source
            .read_at(
                req.offset,
                &mut packet[protocol::PAYLOAD_HEADER_LEN..protocol::PAYLOAD_HEADER_LEN + body_cap],
            )
            .map_err(SenderError::Stream)?;

        let out_len = if read.eof {
            source.clear_eof();
            protocol::PAYLOAD_HEADER_LEN + read.bytes_read
        } else {
            req.max_len as usize
        };
        trace!("serving id={} offset={} bytes={}", req.id, req.offset, out_len);

        let sent = io_helpers::send_with_retry(socket, &packet[..out_len], peer_addr, stop_flag)
            .map_err(SenderError::Socket)?;
        if !sent {
            return Ok(ServeOutcome::Stopped);
        }
    }
}
