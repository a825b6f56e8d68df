/// Errors that can occur in endpoint operations.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Socket lifecycle or readiness error.
    #[error("transport error: {0}")]
    Transport(#[from] pubsock_transport::TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] pubsock_frame::FrameError),

    /// The peer pool is empty.
    #[error("no peers connected")]
    NoPeers,

    /// `write` was called on a broker-role endpoint; broker writes belong in
    /// the readiness handler.
    #[error("broker endpoints write from the readiness handler, not through write()")]
    BrokerWriteMisuse,

    /// The operation needs an outbound (connect-role) primary socket.
    #[error("endpoint has no outbound connection")]
    NotConnected,

    /// The operation needs a listening (bind-role) primary socket.
    #[error("endpoint is not listening")]
    NotListening,

    /// `run` was already called on this endpoint.
    #[error("accept loop already started")]
    AlreadyRunning,

    /// A broker-role endpoint was started without a readiness handler.
    #[error("broker endpoint needs a readiness handler")]
    MissingHandler,

    /// A point-to-point endpoint was given a readiness handler, which only
    /// broker endpoints call.
    #[error("readiness handlers only run on broker endpoints")]
    UnexpectedHandler,

    /// The endpoint was asked to stop while the operation was waiting.
    #[error("endpoint stopped")]
    Stopped,

    /// The background accept loop panicked.
    #[error("accept loop panicked")]
    LoopPanicked,
}

pub type Result<T> = std::result::Result<T, EndpointError>;
