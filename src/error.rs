use thiserror::Error;

/// Errors surfaced by [`BlueTransport`](crate::BlueTransport).
///
/// Link failures never show up here: they become state transitions and an
/// error message on the transport instead.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No input available")]
    NoInputAvailable,

    #[error("Failed to start write retry timer: {0}")]
    Timer(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;
