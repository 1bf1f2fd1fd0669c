use thiserror::Error;

/// Errors surfaced by the async receiver bridge.
///
/// Bus operations themselves never fail; subscribing twice, unsubscribing
/// something absent and posting with no listeners are all defined no-ops.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvError {
    #[error("No value available yet")]
    Empty,

    #[error("Stream completed")]
    Completed,
}

pub type Result<T> = std::result::Result<T, RecvError>;
