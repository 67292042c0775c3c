//! Entry point for `rdt-over-udp`.
//!
//! Parses CLI arguments and runs either **server** mode (print every message
//! that arrives) or **client** mode (send a batch of test messages).  All
//! protocol work is delegated to the library; `main.rs` owns only process
//! setup (logging, argument parsing).

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rdt_over_udp::config::{DEFAULT_CAPACITY, DEFAULT_MSS};
use rdt_over_udp::{Protocol, Rdt, RdtConfig};

/// Reliable data transfer over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// ARQ discipline.
    #[arg(short, long, value_enum, default_value_t = Protocol::GoBackN)]
    protocol: Protocol,

    /// Probability in [0, 1] of dropping each outgoing segment.
    #[arg(short, long, default_value_t = 0.0)]
    loss: f64,

    /// Maximum payload bytes per segment.
    #[arg(long, default_value_t = DEFAULT_MSS)]
    mss: usize,

    /// Send and receive window capacity, in segments.
    #[arg(short, long, default_value_t = DEFAULT_CAPACITY)]
    window: usize,

    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 500)]
    rto_ms: u64,

    /// Upper bound of the simulated per-segment delay in milliseconds.
    #[arg(long, default_value_t = 200)]
    delay_ms: u64,

    /// Seed for reproducible loss and delay.
    #[arg(long)]
    seed: Option<u64>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Args)]
struct Endpoint {
    /// Peer host name or address.
    #[arg(long, default_value = "localhost")]
    peer_host: String,

    /// Peer UDP port.
    #[arg(long)]
    peer_port: u16,

    /// Local UDP port to bind.
    #[arg(long)]
    local_port: u16,
}

#[derive(Subcommand)]
enum Mode {
    /// Receive messages and print them until interrupted.
    Server {
        #[command(flatten)]
        endpoint: Endpoint,
    },
    /// Send `count` messages of `size` bytes, then wait for every ack.
    Client {
        #[command(flatten)]
        endpoint: Endpoint,

        /// Number of messages.
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Bytes per message.
        #[arg(short, long, default_value_t = 45)]
        size: usize,
    },
}

impl Cli {
    fn config(&self) -> RdtConfig {
        let config = RdtConfig::default()
            .with_protocol(self.protocol)
            .with_mss(self.mss)
            .with_loss_rate(self.loss)
            .with_capacity(self.window, self.window)
            .with_rto(Duration::from_millis(self.rto_ms))
            .with_max_delay(Duration::from_millis(self.delay_ms));
        match self.seed {
            Some(seed) => config.with_seed(seed),
            None => config,
        }
    }
}

async fn open(endpoint: &Endpoint, config: RdtConfig) -> Result<Rdt> {
    Rdt::connect(
        &endpoint.peer_host,
        endpoint.peer_port,
        endpoint.local_port,
        config,
    )
    .await
    .with_context(|| {
        format!(
            "opening connection to {}:{} from port {}",
            endpoint.peer_host, endpoint.peer_port, endpoint.local_port
        )
    })
}

async fn run_server(rdt: Rdt) -> Result<()> {
    let mut buf = vec![0u8; rdt.config().mss];
    loop {
        let n = rdt.receive(&mut buf).await?;
        println!("{}", String::from_utf8_lossy(&buf[..n]));
    }
}

async fn run_client(rdt: Rdt, count: usize, size: usize) -> Result<()> {
    for i in 0..count {
        let fill = b'0' + (i % 10) as u8;
        let msg = vec![fill; size];
        rdt.send(&msg).await?;
        log::info!("sent message {i} ({size} bytes)");
    }
    rdt.flush().await?;
    log::info!("all {count} message(s) acknowledged");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = cli.config();

    match &cli.mode {
        Mode::Server { endpoint } => {
            log::info!("Starting {} server on port {}", cli.protocol, endpoint.local_port);
            let rdt = open(endpoint, config).await?;
            run_server(rdt).await
        }
        Mode::Client {
            endpoint,
            count,
            size,
        } => {
            log::info!(
                "Starting {} client, sending to {}:{}",
                cli.protocol,
                endpoint.peer_host,
                endpoint.peer_port
            );
            let rdt = open(endpoint, config).await?;
            run_client(rdt, *count, *size).await
        }
    }
}
