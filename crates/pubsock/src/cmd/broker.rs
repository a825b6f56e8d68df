use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pubsock_endpoint::{Disposition, Endpoint, LoopState, Mode, Peer};
use pubsock_frame::FrameError;
use tracing::{debug, info, warn};

use crate::cmd::{install_ctrlc_handler, BrokerArgs};
use crate::exit::{endpoint_error, CliResult, SUCCESS};
use crate::output::{print_message, OutputFormat};

const QUIT: &[u8] = b"quit";
const ACK: &[u8] = b"ok";
const IDLE_POLL: Duration = Duration::from_millis(25);

pub fn run(args: BrokerArgs, format: OutputFormat) -> CliResult<i32> {
    let config = args.endpoint.config()?;
    let topic = args.endpoint.topic.clone();
    let handled = Arc::new(AtomicUsize::new(0));

    let handler = ControlLines {
        topic: topic.clone(),
        format,
        handled: Arc::clone(&handled),
    };
    let mut endpoint = Endpoint::builder(&topic, &args.uri)
        .mode(Mode::Broker)
        .config(config)
        .handler(move |peer: &mut Peer| handler.serve(peer))
        .bind()
        .map_err(|err| endpoint_error("bind failed", err))?;
    endpoint
        .run()
        .map_err(|err| endpoint_error("broker loop failed to start", err))?;
    info!(%topic, addr = ?endpoint.local_addr(), "broker listening");

    let running = install_ctrlc_handler()?;
    while running.load(Ordering::SeqCst) && endpoint.state() == LoopState::Running {
        if args
            .count
            .is_some_and(|count| handled.load(Ordering::SeqCst) >= count)
        {
            break;
        }
        thread::sleep(IDLE_POLL);
    }

    endpoint
        .shutdown()
        .map_err(|err| endpoint_error("broker loop failed", err))?;
    Ok(SUCCESS)
}

/// Prints each control line, acknowledges it, and disconnects on `quit`.
struct ControlLines {
    topic: String,
    format: OutputFormat,
    handled: Arc<AtomicUsize>,
}

impl ControlLines {
    fn serve(&self, peer: &mut Peer) -> Disposition {
        let id = peer.id().to_string();
        loop {
            match peer.poll_frame() {
                Ok(Some(line)) => {
                    print_message(&self.topic, &id, &line, self.format);
                    self.handled.fetch_add(1, Ordering::SeqCst);
                    if line.as_ref() == QUIT {
                        return Disposition::Evict;
                    }
                    if let Err(err) = peer.send(ACK) {
                        warn!(peer = %id, error = %err, "acknowledgement failed");
                        return Disposition::Evict;
                    }
                }
                Ok(None) => return Disposition::Keep,
                Err(FrameError::ConnectionClosed) => {
                    debug!(peer = %id, "peer hung up");
                    return Disposition::Evict;
                }
                Err(err) => {
                    warn!(peer = %id, error = %err, "bad control line");
                    return Disposition::Evict;
                }
            }
        }
    }
}
