use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("{blocks} block(s) failed their checksum")]
    Corruption { blocks: usize },
    #[error("{blocks} block(s) / {bytes} byte(s) still live after the run")]
    Leak { blocks: usize, bytes: usize },
    #[error("thread {thread} could not allocate {size} bytes")]
    Exhausted { thread: usize, size: usize },
    #[error("worker thread {thread} panicked")]
    WorkerPanicked { thread: usize },
}
