mod attestation;
mod filter;
mod job;
mod negotiation;

pub use attestation::AttestationDao;
pub use filter::FilterDao;
pub use job::JobDao;
pub use negotiation::{NegotiationDao, StoreError};
