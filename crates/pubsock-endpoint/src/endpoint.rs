use std::fmt;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use pubsock_frame::{ByteOrder, FrameError, FrameFormat, FrameReader, FrameWriter, SendStatus};
use pubsock_transport::{tcp, Poller, Resolver, TransportError, UriResolver, Waker};
use tracing::{debug, info, info_span, warn};

use crate::acceptor::{AcceptLoop, ReadinessHandler, Shared};
use crate::config::{EndpointConfig, Mode, Role};
use crate::control;
use crate::error::{EndpointError, Result};
use crate::peer::PeerId;
use crate::pool::{PeerPool, Removal};

/// A frame received from a pooled peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    peer: PeerId,
    payload: Bytes,
}

impl Message {
    pub fn peer(&self) -> PeerId {
        self.peer
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Result of [`Endpoint::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The frame went to `peer`; `bytes` is the payload length.
    Delivered { peer: PeerId, bytes: usize },
    /// The pool was (or became) empty. Zero bytes were written.
    NoConsumers,
}

impl WriteOutcome {
    /// Payload bytes written, zero when nobody was listening.
    pub fn bytes(&self) -> usize {
        match self {
            WriteOutcome::Delivered { bytes, .. } => *bytes,
            WriteOutcome::NoConsumers => 0,
        }
    }
}

/// Result of the `read_msg` family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    Message(Message),
    /// The pool was (or became) empty.
    NoPeers,
    /// The timeout elapsed with no complete frame from any peer.
    Idle,
}

/// Lifecycle of the background accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Running,
    Stopped,
}

enum Primary {
    Listener(Arc<TcpListener>),
    Outbound(Mutex<Outbound>),
}

struct Outbound {
    reader: FrameReader<TcpStream>,
    writer: FrameWriter<TcpStream>,
    remote: Option<SocketAddr>,
}

/// Builds and initialises an [`Endpoint`].
pub struct EndpointBuilder {
    topic: String,
    uri: String,
    mode: Mode,
    config: EndpointConfig,
    resolver: Box<dyn Resolver>,
    handler: Option<Box<dyn ReadinessHandler>>,
}

impl EndpointBuilder {
    /// Point-to-point or broker. Default: point-to-point.
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    pub fn config(mut self, config: EndpointConfig) -> Self {
        self.config = config;
        self
    }

    /// Override URI resolution. Default: [`UriResolver`].
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    /// Readiness handler for broker mode. A point-to-point endpoint with a
    /// handler fails to [`Endpoint::run`].
    pub fn handler(mut self, handler: impl ReadinessHandler + 'static) -> Self {
        self.handler = Some(Box::new(handler));
        self
    }

    pub fn bind(self) -> Result<Endpoint> {
        self.init(Role::Bind)
    }

    pub fn connect(self) -> Result<Endpoint> {
        self.init(Role::Connect)
    }

    /// Resolve the URI and create the primary socket for `role`.
    pub fn init(self, role: Role) -> Result<Endpoint> {
        let Self {
            topic,
            uri,
            mode,
            config,
            resolver,
            handler,
        } = self;
        info!(%topic, %uri, %mode, ?role, "initializing endpoint");

        let resolved = resolver.resolve(&uri);
        let (host, port, primary) = match role {
            Role::Bind => {
                let (host, port) = resolved?;
                debug!(%host, port, "binding");
                let listener = tcp::bind(&host, port, &config.bind_options())?;
                (host, port, Primary::Listener(Arc::new(listener)))
            }
            Role::Connect => {
                let (host, port) = resolved.map_err(|err| match err {
                    TransportError::Resolution { reason, .. } => TransportError::Connect {
                        addr: uri.clone(),
                        source: io::Error::new(io::ErrorKind::InvalidInput, reason),
                    },
                    other => other,
                })?;
                let stream = tcp::connect(&host, port, config.non_blocking)?;
                let remote = tcp::remote_address(&stream);
                let frame_config = config.frame_config(mode, config.non_blocking);
                let reader_stream = stream.try_clone().map_err(TransportError::Io)?;
                let reader = FrameReader::with_config_tcp(reader_stream, frame_config.clone())?;
                let writer = FrameWriter::with_config_tcp(stream, frame_config)?;
                let outbound = Outbound {
                    reader,
                    writer,
                    remote,
                };
                (host, port, Primary::Outbound(Mutex::new(outbound)))
            }
        };

        Ok(Endpoint {
            topic,
            uri,
            role,
            mode,
            host,
            port,
            config,
            primary,
            shared: Arc::new(Shared::new()),
            write_offset: AtomicU32::new(0),
            handler: Mutex::new(handler),
            waker: None,
            task: None,
            shut_down: false,
        })
    }
}

/// One side of a topic connection.
///
/// A bind-role endpoint owns a listener; [`Endpoint::run`] starts the accept
/// loop and the caller-facing operations ([`Endpoint::write`],
/// [`Endpoint::read_msg`], ...) run on any thread through `&self`. A
/// connect-role endpoint owns one outbound connection used for offsets and
/// client-side frames.
pub struct Endpoint {
    topic: String,
    uri: String,
    role: Role,
    mode: Mode,
    host: String,
    port: u16,
    config: EndpointConfig,
    primary: Primary,
    shared: Arc<Shared>,
    write_offset: AtomicU32,
    handler: Mutex<Option<Box<dyn ReadinessHandler>>>,
    waker: Option<Arc<Waker>>,
    task: Option<JoinHandle<std::result::Result<(), TransportError>>>,
    shut_down: bool,
}

impl Endpoint {
    pub fn builder(topic: impl Into<String>, uri: impl Into<String>) -> EndpointBuilder {
        EndpointBuilder {
            topic: topic.into(),
            uri: uri.into(),
            mode: Mode::PointToPoint,
            config: EndpointConfig::default(),
            resolver: Box::new(UriResolver),
            handler: None,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Host as resolved from the URI (possibly the wildcard token).
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Port as resolved from the URI; see [`Endpoint::local_addr`] for the
    /// port actually bound when it was 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub fn is_non_blocking(&self) -> bool {
        self.config.non_blocking
    }

    /// Local address of the primary socket.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.primary {
            Primary::Listener(listener) => listener.local_addr().ok(),
            Primary::Outbound(outbound) => outbound.lock().writer.get_ref().local_addr().ok(),
        }
    }

    /// Remote address of the outbound connection (connect role only).
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        match &self.primary {
            Primary::Listener(_) => None,
            Primary::Outbound(outbound) => outbound.lock().remote,
        }
    }

    /// Install the broker readiness handler before [`Endpoint::run`].
    pub fn set_handler(&mut self, handler: impl ReadinessHandler + 'static) {
        *self.handler.get_mut() = Some(Box::new(handler));
    }

    pub fn state(&self) -> LoopState {
        match &self.task {
            _ if self.shut_down => LoopState::Stopped,
            None => LoopState::Idle,
            Some(task) if task.is_finished() => LoopState::Stopped,
            Some(_) => LoopState::Running,
        }
    }

    /// Start the background accept loop. Bind role only, once.
    pub fn run(&mut self) -> Result<()> {
        if self.shut_down || self.shared.stopped() {
            return Err(EndpointError::Stopped);
        }
        if self.task.is_some() {
            return Err(EndpointError::AlreadyRunning);
        }
        let Primary::Listener(listener) = &self.primary else {
            return Err(EndpointError::NotListening);
        };
        match (self.mode, self.handler.get_mut().is_some()) {
            (Mode::Broker, false) => return Err(EndpointError::MissingHandler),
            (Mode::PointToPoint, true) => return Err(EndpointError::UnexpectedHandler),
            _ => {}
        }

        // The loop only accepts after readiness, never blocking in accept().
        listener.set_nonblocking(true).map_err(TransportError::Io)?;
        let poller = Poller::new()?;
        let waker = Arc::new(Waker::new()?);

        let handler = self.handler.get_mut().take();
        let accept_loop = AcceptLoop {
            listener: Arc::clone(listener),
            poller,
            waker: Arc::clone(&waker),
            shared: Arc::clone(&self.shared),
            config: self.config.clone(),
            mode: self.mode,
        };

        let span = info_span!("endpoint", topic = %self.topic);
        let task = thread::Builder::new()
            .name("pubsock-accept".to_string())
            .spawn(move || {
                let _entered = span.entered();
                accept_loop.run(handler)
            })
            .map_err(TransportError::Io)?;

        self.waker = Some(waker);
        self.task = Some(task);
        info!(topic = %self.topic, mode = %self.mode, addr = ?self.local_addr(), "endpoint running");
        Ok(())
    }

    /// Ask the loop and any waiting caller to stop, without joining.
    pub fn stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        if let Some(waker) = &self.waker {
            if let Err(err) = waker.wake() {
                warn!(topic = %self.topic, error = %err, "failed to wake accept loop");
            }
        }
    }

    /// Stop the loop, join it, and close every remaining peer.
    ///
    /// Returns the error that ended the loop, if it failed on its own.
    pub fn shutdown(&mut self) -> Result<()> {
        self.stop();
        let result = match self.task.take() {
            Some(task) => match task.join() {
                Ok(loop_result) => loop_result.map_err(EndpointError::from),
                Err(_) => Err(EndpointError::LoopPanicked),
            },
            None => Ok(()),
        };
        self.shared.pool.lock().close_all();
        if !self.shut_down {
            info!(topic = %self.topic, "endpoint shut down");
        }
        self.shut_down = true;
        result
    }

    /// Number of pooled peers (point-to-point role).
    pub fn peer_count(&self) -> usize {
        self.shared.pool.lock().len()
    }

    /// Pooled peer ids in rotation order.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.shared.pool.lock().ids()
    }

    /// Number of peers in the broker readiness set.
    pub fn broker_peer_count(&self) -> usize {
        self.shared.broker_peers.load(Ordering::SeqCst)
    }

    /// Peer at the round-robin cursor; advances the cursor.
    pub fn next_peer(&self) -> Result<PeerId> {
        self.shared.pool.lock().next()
    }

    /// Evict and close every pool entry for `peer`.
    pub fn remove_peer(&self, peer: PeerId) -> Removal {
        self.shared.pool.lock().remove(peer)
    }

    /// Send one frame to the next ready peer in round-robin order.
    ///
    /// Peers that fail are evicted and the next one is tried; peers that
    /// cannot take data right now are skipped. A peer that stops taking bytes
    /// mid-frame is evicted after `send_timeout`, or as soon as the endpoint
    /// is stopped. Returns [`WriteOutcome::NoConsumers`] once the pool is
    /// empty.
    pub fn write(&self, message: &[u8]) -> Result<WriteOutcome> {
        if self.mode == Mode::Broker {
            return Err(EndpointError::BrokerWriteMisuse);
        }
        if message.len() > self.config.max_frame_size {
            return Err(FrameError::FrameTooLarge {
                size: message.len(),
                max: self.config.max_frame_size,
            }
            .into());
        }

        let mut pool = self.shared.pool.lock();
        let mut not_ready = 0usize;
        loop {
            let Some(peer) = pool.current_mut() else {
                debug!(topic = %self.topic, "no consumers");
                return Ok(WriteOutcome::NoConsumers);
            };
            let id = peer.id();

            match peer.try_send(message, self.stall_wait()) {
                Ok(SendStatus::Sent(bytes)) => {
                    pool.advance();
                    debug!(peer = %id, bytes, "frame written");
                    return Ok(WriteOutcome::Delivered { peer: id, bytes });
                }
                Ok(SendStatus::NotReady) => {
                    pool.advance();
                    not_ready += 1;
                    if not_ready >= pool.len() {
                        not_ready = 0;
                        self.back_off(&mut pool)?;
                    }
                }
                Err(err) => {
                    warn!(peer = %id, error = %err, "write failed, evicting peer");
                    pool.evict_current();
                    if self.shared.stopped() {
                        return Err(EndpointError::Stopped);
                    }
                    not_ready = 0;
                }
            }
        }
    }

    /// Receive the next frame from the pool in round-robin order, waiting
    /// until one arrives or the pool empties.
    pub fn read_msg(&self) -> Result<ReadOutcome> {
        self.read_with(self.mode.frame_format(self.config.byte_order), None)
    }

    /// Like [`Endpoint::read_msg`], giving up with [`ReadOutcome::Idle`]
    /// after `timeout`.
    pub fn read_msg_timeout(&self, timeout: Duration) -> Result<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        self.read_with(
            self.mode.frame_format(self.config.byte_order),
            Some(deadline),
        )
    }

    /// Like [`Endpoint::read_msg`] with an explicit length-prefix byte order.
    pub fn read_msg_with_order(&self, order: ByteOrder) -> Result<ReadOutcome> {
        self.read_with(self.mode.frame_format(order), None)
    }

    fn read_with(&self, format: FrameFormat, deadline: Option<Instant>) -> Result<ReadOutcome> {
        let mut pool = self.shared.pool.lock();
        let mut idle = 0usize;
        loop {
            let Some(peer) = pool.current_mut() else {
                return Ok(ReadOutcome::NoPeers);
            };
            let id = peer.id();
            peer.set_read_format(format);

            match peer.poll_frame() {
                Ok(Some(payload)) => {
                    pool.advance();
                    debug!(peer = %id, bytes = payload.len(), "frame read");
                    return Ok(ReadOutcome::Message(Message { peer: id, payload }));
                }
                Ok(None) => {
                    pool.advance();
                    idle += 1;
                    if idle >= pool.len() {
                        idle = 0;
                        if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                            return Ok(ReadOutcome::Idle);
                        }
                        self.back_off(&mut pool)?;
                    }
                }
                Err(err @ FrameError::FrameTooLarge { .. }) => {
                    warn!(peer = %id, error = %err, "protocol violation, evicting peer");
                    pool.evict_current();
                    idle = 0;
                }
                Err(err) => {
                    warn!(peer = %id, error = %err, "read failed, evicting peer");
                    pool.evict_current();
                    idle = 0;
                }
            }
        }
    }

    /// Sleep one poll interval with the pool unlocked so the accept loop can
    /// keep admitting peers.
    fn back_off(&self, pool: &mut MutexGuard<'_, PeerPool>) -> Result<()> {
        if self.shared.stopped() {
            return Err(EndpointError::Stopped);
        }
        let interval = self.config.poll_interval;
        MutexGuard::unlocked(pool, || thread::sleep(interval));
        Ok(())
    }

    /// Mid-frame wait for a socket that filled up: one poll interval at a
    /// time, until it drains, `send_timeout` runs out or the endpoint stops.
    fn stall_wait(&self) -> impl FnMut(&TcpStream) -> io::Result<bool> + '_ {
        let deadline = Instant::now() + self.config.send_timeout;
        move |stream| {
            if self.shared.stopped() || Instant::now() >= deadline {
                return Ok(false);
            }
            tcp::wait_writable(stream, self.config.poll_interval)?;
            Ok(true)
        }
    }

    pub fn get_write_offset(&self) -> u32 {
        self.write_offset.load(Ordering::SeqCst)
    }

    pub fn set_write_offset(&self, offset: u32) {
        debug!(offset, "write offset set");
        self.write_offset.store(offset, Ordering::SeqCst);
    }

    /// Send an offset control message over the outbound connection.
    ///
    /// Returns the number of bytes written (always eight).
    pub fn send_offset(&self, offset: u32) -> Result<usize> {
        let outbound = self.outbound()?;
        let wire = control::encode_offset(offset, self.config.byte_order);
        let written = outbound
            .lock()
            .writer
            .write_encoded_with(&wire, self.stall_wait())?;
        debug!(offset, written, "offset sent");
        Ok(written)
    }

    /// Send one frame over the outbound connection (connect role).
    ///
    /// Fails with [`FrameError::Stalled`] if the listener stops reading for
    /// longer than `send_timeout` mid-frame; the connection is unusable then.
    pub fn send(&self, payload: &[u8]) -> Result<usize> {
        let outbound = self.outbound()?;
        let written = outbound.lock().writer.send_with(payload, self.stall_wait())?;
        Ok(written)
    }

    /// Receive one frame from the outbound connection (connect role),
    /// waiting until it arrives.
    pub fn recv(&self) -> Result<Bytes> {
        self.recv_until(None)?.ok_or(EndpointError::Stopped)
    }

    /// Like [`Endpoint::recv`], returning `None` after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<Bytes>> {
        self.recv_until(Some(Instant::now() + timeout))
    }

    fn recv_until(&self, deadline: Option<Instant>) -> Result<Option<Bytes>> {
        let outbound = self.outbound()?;
        let mut guard = outbound.lock();
        loop {
            if let Some(frame) = guard.reader.poll_frame()? {
                return Ok(Some(frame));
            }
            if self.shared.stopped() {
                return Err(EndpointError::Stopped);
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Ok(None);
            }
            let interval = self.config.poll_interval;
            MutexGuard::unlocked(&mut guard, || thread::sleep(interval));
        }
    }

    fn outbound(&self) -> Result<&Mutex<Outbound>> {
        match &self.primary {
            Primary::Outbound(outbound) => Ok(outbound),
            Primary::Listener(_) => Err(EndpointError::NotConnected),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        if self.shut_down {
            return;
        }
        if let Err(err) = self.shutdown() {
            warn!(topic = %self.topic, error = %err, "accept loop ended with error");
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("topic", &self.topic)
            .field("uri", &self.uri)
            .field("role", &self.role)
            .field("mode", &self.mode)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("state", &self.state())
            .finish()
    }
}
