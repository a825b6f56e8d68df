/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame (declared or actual) exceeds the configured maximum size.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// A line frame payload contains the line terminator.
    #[error("line payload contains a newline at byte {0}")]
    InvalidLine(usize),

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete frame was received.
    #[error("connection closed (incomplete frame)")]
    ConnectionClosed,

    /// The stream stopped taking bytes partway through a frame. The frame is
    /// abandoned and the connection is no longer usable.
    #[error("send stalled after {written} of {len} frame bytes")]
    Stalled { written: usize, len: usize },
}

pub type Result<T> = std::result::Result<T, FrameError>;
