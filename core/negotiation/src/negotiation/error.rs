use thiserror::Error;

use crate::crypto::CryptoError;
use crate::db::dao::StoreError;
use crate::db::DbError;
use crate::executor::ExecuteError;
use crate::queue::QueueError;

/// Failures of locally requested operations.
#[derive(Error, Debug)]
pub enum NegotiationError {
    #[error("Attestation [{0}] not found.")]
    AttestationNotFound(String),
    #[error("Attestation [{id}] is an {role} attestation.")]
    WrongRole { id: String, role: String },
    #[error("Attestation [{0}] has no accepted bid yet.")]
    NoAcceptedBid(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Execute(#[from] ExecuteError),
}
