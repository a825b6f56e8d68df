use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Subcommand, ValueEnum};
use pubsock_endpoint::EndpointConfig;
use pubsock_frame::ByteOrder;
use pubsock_transport::DEFAULT_BACKLOG;

use crate::exit::{CliError, CliResult, INTERNAL, USAGE};
use crate::output::OutputFormat;

pub mod broker;
pub mod consume;
pub mod offset;
pub mod publish;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bind a topic and round-robin messages to connected consumers.
    Publish(PublishArgs),
    /// Connect to a topic and print received messages.
    Consume(ConsumeArgs),
    /// Bind a broker topic and answer control lines.
    Broker(BrokerArgs),
    /// Send an offset control message to a topic.
    Offset(OffsetArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Publish(args) => publish::run(args, format),
        Command::Consume(args) => consume::run(args, format),
        Command::Broker(args) => broker::run(args, format),
        Command::Offset(args) => offset::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum ByteOrderArg {
    Network,
    Native,
}

impl From<ByteOrderArg> for ByteOrder {
    fn from(arg: ByteOrderArg) -> Self {
        match arg {
            ByteOrderArg::Network => ByteOrder::Network,
            ByteOrderArg::Native => ByteOrder::Native,
        }
    }
}

/// Endpoint settings shared by every subcommand.
#[derive(Args, Debug)]
pub struct EndpointArgs {
    /// Topic name used in logs and output.
    #[arg(long, default_value = "default", env = "PUBSOCK_TOPIC")]
    pub topic: String,
    /// Byte order of length prefixes.
    #[arg(long, value_enum, default_value = "network", env = "PUBSOCK_BYTE_ORDER")]
    pub byte_order: ByteOrderArg,
    /// Back-off between idle passes over the peers (e.g. 5ms, 1s).
    #[arg(long, default_value = "5ms", env = "PUBSOCK_POLL_INTERVAL")]
    pub poll_interval: String,
    /// Listen backlog for bound topics.
    #[arg(long, default_value_t = DEFAULT_BACKLOG, env = "PUBSOCK_BACKLOG")]
    pub backlog: i32,
    /// Use blocking peer sockets with this read/write timeout (e.g. 2s).
    #[arg(long, value_name = "TIMEOUT", env = "PUBSOCK_BLOCKING")]
    pub blocking: Option<String>,
    /// Drop a peer that stops reading partway through a frame for this long.
    #[arg(long, default_value = "1s", env = "PUBSOCK_SEND_TIMEOUT")]
    pub send_timeout: String,
}

impl EndpointArgs {
    pub fn config(&self) -> CliResult<EndpointConfig> {
        let mut config = EndpointConfig::default()
            .with_byte_order(self.byte_order.into())
            .with_poll_interval(parse_duration(&self.poll_interval)?)
            .with_backlog(self.backlog)
            .with_send_timeout(parse_duration(&self.send_timeout)?);
        if let Some(timeout) = &self.blocking {
            config = config
                .with_non_blocking(false)
                .with_io_timeout(Some(parse_duration(timeout)?));
        }
        Ok(config)
    }
}

#[derive(Args, Debug)]
pub struct PublishArgs {
    /// Topic URI to bind (e.g. tcp://*:7100).
    pub uri: String,
    /// Message to publish (repeatable). Default: one message per stdin line.
    #[arg(long, short = 'd')]
    pub data: Vec<String>,
    /// Consumers to wait for before publishing.
    #[arg(long, default_value_t = 1)]
    pub consumers: usize,
    /// Maximum time to wait for consumers (e.g. 10s, 500ms).
    #[arg(long, default_value = "10s")]
    pub wait_timeout: String,
    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

#[derive(Args, Debug)]
pub struct ConsumeArgs {
    /// Topic URI to connect to (e.g. tcp://127.0.0.1:7100).
    pub uri: String,
    /// Exit after receiving N messages.
    #[arg(long)]
    pub count: Option<usize>,
    /// Give up when no message arrives within this time (e.g. 5s).
    #[arg(long)]
    pub timeout: Option<String>,
    /// Send this offset control message after connecting.
    #[arg(long)]
    pub offset: Option<u32>,
    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

#[derive(Args, Debug)]
pub struct BrokerArgs {
    /// Topic URI to bind (e.g. tcp://*:7200).
    pub uri: String,
    /// Exit after handling N control lines.
    #[arg(long)]
    pub count: Option<usize>,
    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

#[derive(Args, Debug)]
pub struct OffsetArgs {
    /// Topic URI to connect to.
    pub uri: String,
    /// Offset value to send.
    pub value: u32,
    #[command(flatten)]
    pub endpoint: EndpointArgs,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, millis) = if let Some(num) = input.strip_suffix("ms") {
        (num, true)
    } else if let Some(num) = input.strip_suffix('s') {
        (num, false)
    } else {
        (input, false)
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

/// Flag cleared by Ctrl-C.
pub fn install_ctrlc_handler() -> CliResult<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        flag.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))?;
    Ok(running)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert!(parse_duration("0s").is_err());
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn blocking_flag_switches_socket_mode() {
        let args = EndpointArgs {
            topic: "t".to_string(),
            byte_order: ByteOrderArg::Native,
            poll_interval: "20ms".to_string(),
            backlog: 4,
            blocking: Some("2s".to_string()),
            send_timeout: "250ms".to_string(),
        };
        let config = args.config().unwrap();
        assert!(!config.non_blocking);
        assert_eq!(config.io_timeout, Some(Duration::from_secs(2)));
        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert_eq!(config.byte_order, ByteOrder::Native);
        assert_eq!(config.backlog, 4);
        assert_eq!(config.send_timeout, Duration::from_millis(250));
    }
}
