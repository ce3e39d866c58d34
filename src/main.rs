use std::net::SocketAddrV4;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use clap::{Args, Parser, Subcommand};
use tokio::io::{AsyncBufRead, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use telewatch::{DecodedMessage, MessageSink, Receiver, ReceiverConfig, TransportMode};
use telewatch_relay::{Output, Relay, DEFAULT_MESSAGE_TYPE};

#[derive(Parser, Debug)]
#[command(name = "telewatch")]
#[command(about = "Receive drone telemetry over multicast or direct streams")]
#[command(version, args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    receive: ReceiveArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Receive and print messages (default)
    Receive(ReceiveArgs),
    /// Publish lines from stdin or a file as envelopes
    Relay(RelayArgs),
}

#[derive(Args, Debug)]
struct LogArgs {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[derive(Args, Debug)]
struct ReceiveArgs {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Transport mode: multicast, direct-stream or both
    #[arg(short, long)]
    mode: Option<TransportMode>,

    /// Host of the direct streams
    #[arg(long)]
    host: Option<String>,

    /// Direct telemetry stream port
    #[arg(long)]
    telemetry_port: Option<u16>,

    /// Direct status stream port
    #[arg(long)]
    status_port: Option<u16>,

    /// Multicast listener port
    #[arg(long)]
    multicast_port: Option<u16>,

    /// Listen on the status/serial multicast port instead
    #[arg(long, conflicts_with = "multicast_port")]
    serial: bool,

    #[command(flatten)]
    log: LogArgs,
}

impl ReceiveArgs {
    fn to_config(&self) -> Result<ReceiverConfig> {
        let mut config =
            ReceiverConfig::load(self.config.as_deref()).context("Failed to load configuration")?;

        if let Some(mode) = self.mode {
            config.mode = mode;
        }
        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.telemetry_port {
            config.telemetry_port = port;
        }
        if let Some(port) = self.status_port {
            config.status_port = port;
        }
        if let Some(port) = self.multicast_port {
            config.multicast_port = port;
        }
        if self.serial {
            config = config.use_multicast_status_port();
        }

        config.validate()?;
        Ok(config)
    }
}

#[derive(Args, Debug)]
struct RelayArgs {
    /// Read lines from this file instead of stdin
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Envelope type field
    #[arg(long = "type", default_value = DEFAULT_MESSAGE_TYPE)]
    message_type: String,

    /// Send datagrams to this group:port
    #[arg(long)]
    multicast: Option<SocketAddrV4>,

    /// Serve stream subscribers on this address
    #[arg(long)]
    listen: Option<String>,

    #[command(flatten)]
    log: LogArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Receive(cli.receive)) {
        Command::Receive(args) => {
            init_tracing(&args.log);
            run_receiver(args).await
        }
        Command::Relay(args) => {
            init_tracing(&args.log);
            run_relay(args).await
        }
    }
}

/// Logs go to stderr so stdout carries only messages.
fn init_tracing(args: &LogArgs) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Prints each message as `HH:MM:SS.mmm [kind] content`.
struct ConsoleSink;

impl ConsoleSink {
    fn print(message: &DecodedMessage) {
        let time = DateTime::from_timestamp_millis(message.timestamp_ms as i64)
            .map(|t| t.with_timezone(&Local).format("%H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| "--:--:--.---".to_string());
        println!("{} [{}] {}", time, message.kind, message.content);
    }
}

impl MessageSink for ConsoleSink {
    fn append(&mut self, message: DecodedMessage) {
        Self::print(&message);
    }

    fn clear(&mut self) {}
}

async fn run_receiver(args: ReceiveArgs) -> Result<()> {
    let config = args.to_config()?;
    info!(
        mode = %config.mode,
        host = %config.host,
        telemetry_port = config.telemetry_port,
        status_port = config.status_port,
        multicast_port = config.multicast_port,
        "Starting telewatch"
    );

    let receiver = Receiver::new();
    let mut connected = receiver.connected();
    let mut events = receiver.subscribe_states();
    receiver
        .start(&config, ConsoleSink)
        .context("Failed to start receiver")?;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let notice = if *connected.borrow_and_update() {
                    "connected"
                } else {
                    "disconnected"
                };
                ConsoleSink::print(&DecodedMessage::system(notice));
            }
            event = events.recv() => match event {
                Ok(event) => debug!(
                    endpoint = %event.endpoint,
                    connection = %event.connection,
                    peer = %event.label,
                    state = %event.state,
                    "Endpoint event"
                ),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "Missed endpoint events"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    receiver.stop().await;
    Ok(())
}

async fn run_relay(args: RelayArgs) -> Result<()> {
    let mut builder = Relay::builder().message_type(args.message_type);
    if let Some(addr) = args.multicast {
        builder = builder.output(Output::multicast(*addr.ip(), addr.port()));
    }
    if let Some(listen) = args.listen {
        builder = builder.output(Output::stream(listen));
    }
    let relay = builder
        .build()
        .await
        .context("Failed to set up relay outputs (use --multicast and/or --listen)")?;

    match args.input {
        Some(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .with_context(|| format!("Failed to open {}", path.display()))?;
            pump(&relay, BufReader::new(file)).await
        }
        None => pump(&relay, BufReader::new(tokio::io::stdin())).await,
    }
}

async fn pump<R>(relay: &Relay, reader: R) -> Result<()>
where
    R: AsyncBufRead + Unpin,
{
    tokio::select! {
        result = relay.run(reader) => {
            let published = result?;
            info!(published, "Relay finished");
        }
        _ = tokio::signal::ctrl_c() => info!("Relay interrupted"),
    }
    Ok(())
}
