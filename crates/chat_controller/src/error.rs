use session_store::{SessionId, SessionStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("there is no message to resend")]
    NothingToRetry,
    #[error("session storage is unavailable: {reason}")]
    StoreUnavailable { reason: String },
    #[error("session {id} does not exist")]
    UnknownSession { id: SessionId },
    #[error(transparent)]
    Store(#[from] SessionStoreError),
}
