use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pubsock_endpoint::{Endpoint, WriteOutcome};
use tracing::info;

use crate::cmd::{install_ctrlc_handler, parse_duration, PublishArgs};
use crate::exit::{endpoint_error, io_error, CliError, CliResult, FAILURE, SUCCESS, TIMEOUT};
use crate::output::{print_delivery, OutputFormat};

const CONSUMER_POLL: Duration = Duration::from_millis(25);

pub fn run(args: PublishArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.endpoint.config()?;
    let wait_timeout = parse_duration(&args.wait_timeout)?;
    let topic = args.endpoint.topic.clone();

    let mut endpoint = Endpoint::builder(&topic, &args.uri)
        .config(config)
        .bind()
        .map_err(|err| endpoint_error("bind failed", err))?;
    endpoint
        .run()
        .map_err(|err| endpoint_error("accept loop failed to start", err))?;
    info!(%topic, addr = ?endpoint.local_addr(), "publishing");

    let running = install_ctrlc_handler()?;
    wait_for_consumers(&endpoint, args.consumers, wait_timeout, &running)?;

    let messages: Box<dyn Iterator<Item = io::Result<String>>> = if args.data.is_empty() {
        Box::new(io::stdin().lock().lines())
    } else {
        Box::new(args.data.into_iter().map(Ok))
    };
    let result = publish_all(&endpoint, &topic, messages, &running, format);

    endpoint
        .shutdown()
        .map_err(|err| endpoint_error("accept loop failed", err))?;
    result
}

fn wait_for_consumers(
    endpoint: &Endpoint,
    wanted: usize,
    timeout: Duration,
    running: &AtomicBool,
) -> CliResult<()> {
    let start = Instant::now();
    while endpoint.peer_count() < wanted && running.load(Ordering::SeqCst) {
        if start.elapsed() >= timeout {
            return Err(CliError::new(
                TIMEOUT,
                format!(
                    "timed out waiting for consumers ({} of {wanted} connected)",
                    endpoint.peer_count()
                ),
            ));
        }
        thread::sleep(CONSUMER_POLL);
    }
    Ok(())
}

fn publish_all(
    endpoint: &Endpoint,
    topic: &str,
    messages: impl Iterator<Item = io::Result<String>>,
    running: &AtomicBool,
    format: OutputFormat,
) -> CliResult<i32> {
    for message in messages {
        if !running.load(Ordering::SeqCst) {
            break;
        }
        let message = message.map_err(|err| io_error("failed reading stdin", err))?;
        let outcome = endpoint
            .write(message.as_bytes())
            .map_err(|err| endpoint_error("publish failed", err))?;

        match outcome {
            WriteOutcome::Delivered { peer, bytes } => {
                print_delivery(topic, Some(&peer.to_string()), bytes, format);
            }
            WriteOutcome::NoConsumers => {
                print_delivery(topic, None, 0, format);
                return Err(CliError::new(FAILURE, "no consumers connected"));
            }
        }
    }
    Ok(SUCCESS)
}
