//! Background accept/multiplex loop.
//!
//! One thread per endpoint. It waits on an epoll set holding the listener and
//! a wake descriptor, so `stop` never has to wait for a connection to arrive.
//! - point-to-point: accepted peers go to the shared [`PeerPool`]
//! - broker: accepted peers join a readiness set owned by the loop, and the
//!   [`ReadinessHandler`] runs for each peer that becomes readable

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use pubsock_frame::FrameConfig;
use pubsock_transport::{Events, Poller, Token, TransportError, Waker};
use tracing::{debug, error, info, warn};

use crate::config::{EndpointConfig, Mode};
use crate::peer::{Peer, PeerId};
use crate::pool::PeerPool;

pub(crate) const WAKE_TOKEN: Token = Token(u64::MAX);
pub(crate) const LISTENER_TOKEN: Token = Token(u64::MAX - 1);

/// What the broker loop should do with a peer after its handler ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep watching the peer.
    Keep,
    /// Close the peer and drop it from the readiness set.
    Evict,
}

impl From<i32> for Disposition {
    /// Status-code convention: negative means evict.
    fn from(status: i32) -> Self {
        if status < 0 {
            Disposition::Evict
        } else {
            Disposition::Keep
        }
    }
}

/// Per-peer callback of a broker-role endpoint.
///
/// Called on the loop thread whenever `peer` is readable (including when the
/// remote end hung up). Readiness is level-triggered: a handler that leaves
/// complete lines buffered or ignores a closed peer is called again right
/// away, so drain with [`Peer::poll_frame`] and evict on errors.
pub trait ReadinessHandler: Send {
    fn on_ready(&mut self, peer: &mut Peer) -> Disposition;
}

impl<F> ReadinessHandler for F
where
    F: FnMut(&mut Peer) -> Disposition + Send,
{
    fn on_ready(&mut self, peer: &mut Peer) -> Disposition {
        self(peer)
    }
}

/// State shared between the endpoint and its loop thread.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    pub(crate) pool: Mutex<PeerPool>,
    pub(crate) stop: AtomicBool,
    pub(crate) broker_peers: AtomicUsize,
    next_peer_id: AtomicU64,
}

impl Shared {
    pub(crate) fn new() -> Self {
        Self {
            next_peer_id: AtomicU64::new(1),
            ..Self::default()
        }
    }

    pub(crate) fn stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    fn allocate_id(&self) -> PeerId {
        PeerId::new(self.next_peer_id.fetch_add(1, Ordering::Relaxed))
    }
}

pub(crate) struct AcceptLoop {
    pub(crate) listener: Arc<TcpListener>,
    pub(crate) poller: Poller,
    pub(crate) waker: Arc<Waker>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) config: EndpointConfig,
    pub(crate) mode: Mode,
}

impl AcceptLoop {
    pub(crate) fn run(
        self,
        handler: Option<Box<dyn ReadinessHandler>>,
    ) -> Result<(), TransportError> {
        self.poller
            .register(self.listener.as_raw_fd(), LISTENER_TOKEN)?;
        self.waker.register(&self.poller, WAKE_TOKEN)?;

        let result = match handler {
            Some(handler) => self.run_broker(handler),
            None => self.run_point_to_point(),
        };
        if let Err(err) = &result {
            error!(error = %err, "accept loop terminated");
        }
        result
    }

    fn run_point_to_point(&self) -> Result<(), TransportError> {
        info!(mode = %self.mode, "accept loop running");
        let mut events = Events::default();

        while !self.shared.stopped() {
            self.poller.wait(&mut events, None)?;
            for token in events.tokens() {
                match token {
                    WAKE_TOKEN => self.waker.drain(),
                    LISTENER_TOKEN => self.accept_pending(|peer| {
                        self.shared.pool.lock().push(peer);
                    }),
                    other => debug!(token = other.0, "ignoring unknown token"),
                }
            }
        }

        info!("accept loop stopped");
        Ok(())
    }

    fn run_broker(&self, mut handler: Box<dyn ReadinessHandler>) -> Result<(), TransportError> {
        info!(mode = %self.mode, "broker loop running");
        let mut ready: HashMap<Token, Peer> = HashMap::new();
        let mut events = Events::default();

        let result = loop {
            if self.shared.stopped() {
                break Ok(());
            }
            if let Err(err) = self.poller.wait(&mut events, None) {
                break Err(err);
            }

            for token in events.tokens() {
                match token {
                    WAKE_TOKEN => self.waker.drain(),
                    LISTENER_TOKEN => {
                        let mut admitted = Vec::new();
                        self.accept_pending(|peer| admitted.push(peer));
                        for peer in admitted {
                            let token = Token(peer.id().get());
                            if let Err(err) = self.poller.register(peer.raw_fd(), token) {
                                warn!(peer = %peer.id(), error = %err, "cannot watch peer, closing");
                                peer.close();
                                continue;
                            }
                            ready.insert(token, peer);
                        }
                    }
                    token => {
                        // Evicted earlier in this batch.
                        let Some(peer) = ready.get_mut(&token) else {
                            continue;
                        };
                        if handler.on_ready(peer) == Disposition::Evict {
                            if let Some(peer) = ready.remove(&token) {
                                self.evict(peer);
                            }
                        }
                    }
                }
                self.shared.broker_peers.store(ready.len(), Ordering::SeqCst);
            }
        };

        for (_, peer) in ready.drain() {
            peer.close();
        }
        self.shared.broker_peers.store(0, Ordering::SeqCst);
        info!("broker loop stopped");
        result
    }

    fn evict(&self, peer: Peer) {
        warn!(peer = %peer.id(), addr = ?peer.addr(), "handler evicted peer, disconnecting");
        if let Err(err) = self.poller.deregister(peer.raw_fd()) {
            debug!(peer = %peer.id(), error = %err, "deregister failed");
        }
        peer.close();
    }

    /// Accept every queued connection on the non-blocking listener.
    fn accept_pending(&self, mut admit: impl FnMut(Peer)) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    let id = self.shared.allocate_id();
                    info!(peer = %id, %addr, fd = stream.as_raw_fd(), "received connection");
                    match self.make_peer(id, stream) {
                        Ok(peer) => admit(peer),
                        Err(err) => warn!(peer = %id, error = %err, "failed to set up peer"),
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    error!(error = %TransportError::Accept(err), "accept failed");
                    // Persistent failures (fd exhaustion) stay readable; don't spin.
                    std::thread::sleep(self.config.poll_interval);
                    return;
                }
            }
        }
    }

    fn make_peer(&self, id: PeerId, stream: TcpStream) -> pubsock_frame::Result<Peer> {
        let non_blocking = self.config.peer_non_blocking(self.mode);
        if let Err(err) = stream.set_nonblocking(non_blocking) {
            error!(
                peer = %id,
                non_blocking,
                error = %err,
                "failed to apply blocking mode"
            );
        }
        let frame_config: FrameConfig = self.config.frame_config(self.mode, non_blocking);
        Peer::from_stream(id, stream, frame_config)
    }
}
