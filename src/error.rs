use thiserror::Error;

/// Failure of a single source. Never propagates past the aggregation
/// boundary; the source just contributes no articles for that cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("network error: {0}")]
    Network(String),

    #[error("format error: {0}")]
    Format(String),

    #[error("{0}")]
    Envelope(String),
}

/// Failure of the aggregation as a whole.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("source task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
