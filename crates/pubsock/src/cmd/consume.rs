use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use pubsock_endpoint::{Endpoint, EndpointError};
use pubsock_frame::FrameError;
use tracing::{debug, info};

use crate::cmd::{install_ctrlc_handler, parse_duration, ConsumeArgs};
use crate::exit::{endpoint_error, CliError, CliResult, SUCCESS, TIMEOUT};
use crate::output::{print_message, OutputFormat};

/// How long a single receive waits before re-checking Ctrl-C.
const RECV_SLICE: Duration = Duration::from_millis(100);

pub fn run(args: ConsumeArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.endpoint.config()?;
    let idle_timeout = args.timeout.as_deref().map(parse_duration).transpose()?;
    let topic = args.endpoint.topic.as_str();

    let client = Endpoint::builder(topic, &args.uri)
        .config(config)
        .connect()
        .map_err(|err| endpoint_error("connect failed", err))?;
    let peer = client
        .remote_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| args.uri.clone());
    info!(%topic, %peer, "consuming");

    if let Some(offset) = args.offset {
        client
            .send_offset(offset)
            .map_err(|err| endpoint_error("offset send failed", err))?;
        client.set_write_offset(offset);
    }

    let running = install_ctrlc_handler()?;
    let mut received = 0usize;
    let mut last_message = Instant::now();

    while running.load(Ordering::SeqCst) {
        if args.count.is_some_and(|count| received >= count) {
            break;
        }
        match client.recv_timeout(RECV_SLICE) {
            Ok(Some(payload)) => {
                print_message(topic, &peer, &payload, format);
                received = received.saturating_add(1);
                last_message = Instant::now();
            }
            Ok(None) => {
                if idle_timeout.is_some_and(|limit| last_message.elapsed() >= limit) {
                    return Err(CliError::new(TIMEOUT, "no message within timeout"));
                }
            }
            Err(EndpointError::Frame(FrameError::ConnectionClosed)) => {
                debug!(%topic, received, "publisher closed the connection");
                break;
            }
            Err(err) => return Err(endpoint_error("receive failed", err)),
        }
    }

    Ok(SUCCESS)
}
