use async_trait::async_trait;
use bigdecimal::BigDecimal;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::{Address, AttestationTx, Ledger, LedgerError, TxHash};

/// Ledger with balances set by hand. Unknown addresses hold nothing.
#[derive(Clone, Default)]
pub struct MockLedger {
    balances: Arc<Mutex<HashMap<Address, BigDecimal>>>,
    submitted: Arc<Mutex<Vec<AttestationTx>>>,
    fail_submissions: Arc<Mutex<bool>>,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&self, address: Address, balance: BigDecimal) {
        self.balances.lock().insert(address, balance);
    }

    pub fn submitted(&self) -> Vec<AttestationTx> {
        self.submitted.lock().clone()
    }

    pub fn fail_submissions(&self, fail: bool) {
        *self.fail_submissions.lock() = fail;
    }
}

#[async_trait]
impl Ledger for MockLedger {
    async fn escrow_balance(&self, address: &Address) -> Result<BigDecimal, LedgerError> {
        Ok(self
            .balances
            .lock()
            .get(address)
            .cloned()
            .unwrap_or_else(|| BigDecimal::from(0)))
    }

    async fn submit_attestation(&self, tx: &AttestationTx) -> Result<TxHash, LedgerError> {
        if *self.fail_submissions.lock() {
            return Err(LedgerError::Timeout {
                method: "attest".to_string(),
                timeout: Duration::from_secs(5),
            });
        }
        let mut submitted = self.submitted.lock();
        submitted.push(tx.clone());
        Ok(format!("0x{:064x}", submitted.len()))
    }
}
