use buffer::BufferError;
use memory::MemoryError;
use runtime::handshake::Aborted;

#[derive(Debug, thiserror::Error)]
pub enum AccelError {
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Aborted(#[from] Aborted),
    #[error("simulation did not finish within {0} cycles")]
    Timeout(u64),
    #[error("accelerator is still executing an earlier program")]
    Busy,
}

pub type Result<T, E = AccelError> = std::result::Result<T, E>;
