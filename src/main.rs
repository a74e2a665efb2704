use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use udpr::protocol;
use udpr::receiver::ReceiverPeer;
use udpr::sender::SenderPeer;
use udpr::sink::FileSink;
use udpr::source::FileSource;

#[derive(Parser)]
#[command(name = "udpr", version, about = "Minimal reliable UDP stream transfer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Send {
        source: PathBuf,
        #[arg(long, default_value_t = 9000)]
        port: u16,
        #[arg(long, default_value_t = protocol::DEFAULT_PACKET_SIZE)]
        packet_size: u16,
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
    },
    Recv {
        sink: PathBuf,
        #[arg(long)]
        peer_ip: Ipv4Addr,
        #[arg(long)]
        peer_port: u16,
        #[arg(long, default_value_t = 500)]
        timeout_ms: u64,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_default_env().init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Send {
            source,
            port,
            packet_size,
            timeout_ms,
        } => run_send(source, port, packet_size, timeout_ms),
        Commands::Recv {
            sink,
            peer_ip,
            peer_port,
            timeout_ms,
        } => run_recv(sink, peer_ip, peer_port, timeout_ms),
    }
}

fn run_send(source: PathBuf, port: u16, packet_size: u16, timeout_ms: u64) -> Result<()> {
    let file_source = FileSource::open(&source)
        .with_context(|| format!("failed to open source file `{}`", source.display()))?;

    let peer = SenderPeer::new(
        Box::new(file_source),
        port,
        packet_size,
        Duration::from_millis(timeout_ms),
    )
    .context("failed to start sender")?;

    info!("listening on 0.0.0.0:{port}, packet size {packet_size}");
    while peer.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    if let Some(message) = peer.error_message() {
        bail!("sender failed: {message}");
    }
    Ok(())
}

fn run_recv(sink: PathBuf, peer_ip: Ipv4Addr, peer_port: u16, timeout_ms: u64) -> Result<()> {
    let file_sink = FileSink::create(&sink)
        .with_context(|| format!("failed to create sink file `{}`", sink.display()))?;

    let peer_addr = SocketAddrV4::new(peer_ip, peer_port);
    let peer = ReceiverPeer::new(Box::new(file_sink), peer_addr, Duration::from_millis(timeout_ms));

    info!("requesting transfer from {peer_addr}");
    while peer.is_running() {
        std::thread::sleep(Duration::from_millis(100));
    }

    if let Some(message) = peer.error_message() {
        bail!("receiver failed: {message}");
    }
    info!("transfer complete, wrote to {}", sink.display());
    Ok(())
}
