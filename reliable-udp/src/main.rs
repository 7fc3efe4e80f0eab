//! Entry point for `reliable-udp`.
//!
//! Parses CLI arguments and dispatches into either **send** or **recv** mode.
//! All actual protocol work is delegated to library modules; `main.rs` owns only
//! process setup (logging, argument parsing, stdin/stdout plumbing).

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use reliable_udp::{
    simulator::StatsHandle, Channel, LossyChannel, Session, SessionConfig, SessionError,
    SimulatorConfig, TimerConfig, UdpChannel,
};

/// Reliable, in-order transport over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Read stdin to EOF, send it to the peer, then close.
    Send {
        /// Remote peer address (e.g. 127.0.0.1:9000).
        #[arg(short, long)]
        peer: SocketAddr,
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        #[command(flatten)]
        tuning: Tuning,
    },
    /// Write every fragment from the peer to stdout until it closes.
    Recv {
        /// Local address to bind (e.g. 0.0.0.0:9000).
        #[arg(short, long, default_value = "0.0.0.0:9000")]
        bind: SocketAddr,
        /// Remote peer address; only its datagrams are accepted.
        #[arg(short, long)]
        peer: SocketAddr,
        #[command(flatten)]
        tuning: Tuning,
    },
}

/// Timing and fault-injection knobs shared by both modes.
#[derive(Args)]
struct Tuning {
    /// Largest datagram, header included.
    #[arg(long, default_value_t = reliable_udp::packet::DEFAULT_MTU)]
    mtu: usize,
    /// Retransmission timeout in milliseconds.
    #[arg(long, default_value_t = 250)]
    rto_ms: u64,
    /// Linger after the FIN is acknowledged, in milliseconds.
    #[arg(long, default_value_t = 2000)]
    grace_ms: u64,
    /// Probability of dropping an outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    loss: f64,
    /// Probability of duplicating an outbound datagram.
    #[arg(long, default_value_t = 0.0)]
    duplicate: f64,
    /// Probability of delaying an outbound datagram by --delay-ms.
    #[arg(long, default_value_t = 0.0)]
    reorder: f64,
    #[arg(long, default_value_t = 50)]
    delay_ms: u64,
    /// Seed for the fault simulator.
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Tuning {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            mtu: self.mtu,
            timers: TimerConfig {
                retransmit_timeout: Duration::from_millis(self.rto_ms),
                close_grace: Duration::from_millis(self.grace_ms),
                ..TimerConfig::default()
            },
            ..SessionConfig::default()
        }
    }

    fn simulator_config(&self) -> SimulatorConfig {
        SimulatorConfig {
            loss_rate: self.loss,
            duplicate_rate: self.duplicate,
            reorder_rate: self.reorder,
            reorder_delay: Duration::from_millis(self.delay_ms),
            seed: self.seed,
            ..SimulatorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Send { peer, bind, tuning } => {
            log::info!("Sending stdin to {peer}");
            let (session, stats) = open(bind, peer, &tuning).await?;
            run_send(session).await?;
            log::info!("Simulator: {:?}", stats.get());
        }
        Mode::Recv { bind, peer, tuning } => {
            log::info!("Receiving from {peer} on {bind}");
            let (session, stats) = open(bind, peer, &tuning).await?;
            run_recv(session).await?;
            log::info!("Simulator: {:?}", stats.get());
        }
    }
    Ok(())
}

async fn open(
    bind: SocketAddr,
    peer: SocketAddr,
    tuning: &Tuning,
) -> Result<(Session<LossyChannel<UdpChannel>>, StatsHandle)> {
    let channel = UdpChannel::bind(bind).await.context("bind")?;
    let sim = tuning.simulator_config();
    if !sim.is_transparent() {
        log::warn!("Fault injection enabled: {sim:?}");
    }
    let lossy = LossyChannel::new(channel, sim);
    let stats = lossy.stats_handle();
    let session = Session::with_channel(lossy, peer, tuning.session_config())?;
    Ok((session, stats))
}

async fn run_send<C: Channel>(mut session: Session<C>) -> Result<()> {
    let mut data = Vec::new();
    tokio::io::stdin()
        .read_to_end(&mut data)
        .await
        .context("read stdin")?;

    session.send(&data).await.context("send")?;
    log::info!(
        "Sent {} bytes ({} retransmissions)",
        data.len(),
        session.retransmissions()
    );
    session.close().await.context("close")?;
    Ok(())
}

async fn run_recv<C: Channel>(mut session: Session<C>) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    let mut total = 0usize;
    loop {
        match session.receive().await {
            Ok(fragment) => {
                total += fragment.len();
                stdout.write_all(&fragment).await.context("write stdout")?;
            }
            Err(SessionError::Eof) => break,
            Err(e) => return Err(e).context("receive"),
        }
    }
    stdout.flush().await.context("flush stdout")?;
    log::info!("Received {total} bytes");
    session.close().await.context("close")?;
    Ok(())
}
