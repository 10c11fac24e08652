use thiserror::Error;

/// Recoverable and fatal conditions raised by bus operations.
///
/// Public entry points that the external interface defines as `bool`-returning
/// (`send`, `try_send`, `recv`, ...) convert this internally and never expose
/// it; the typed form exists so tests and the lower-level `Bus` API can match
/// on exactly what went wrong without aborting the process.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("module id {id} is out of range (max {max})")]
    IdOutOfRange { id: u32, max: u32 },

    #[error("module {id} is already registered")]
    AlreadyRegistered { id: u32 },

    #[error("module {id} is not registered")]
    NotRegistered { id: u32 },

    #[error("module {id} already has a name attached")]
    AlreadyNamed { id: u32 },

    #[error("name {name:?} is already bound to module {existing}")]
    NameAlreadyBound { name: String, existing: u32 },

    #[error("name {name:?} is not bound to any module")]
    NameNotFound { name: String },

    #[error("ring ({src} -> {dst}) is full")]
    RingFull { src: u32, dst: u32 },

    #[error("payload of {size} bytes exceeds the configured slot size of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("module {id} has been deleted")]
    Closed { id: u32 },

    #[error("OS resource allocation failed: {0}")]
    Os(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, BusError>;
