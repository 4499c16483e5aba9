mod utils;

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

use attest_ledger::{Address, AttestationTx, Ledger, LedgerError, TxHash};
use attest_negotiation::db::dao::AttestationDao;
use attest_negotiation::db::model::{AttestationStatus, JobState};
use attest_negotiation::negotiation::NegotiationError;
use attest_negotiation::queue::TaskRunner;
use attest_negotiation::Task;

use utils::*;

#[tokio::test]
async fn test_submission_is_retried_until_the_limit() -> anyhow::Result<()> {
    let mut attester_args = ATTESTER_ARGS.to_vec();
    attester_args.extend_from_slice(&["--job-retry-limit", "3"]);
    let network = market(
        "test_submission_is_retried_until_the_limit",
        &attester_args,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);
    let attestation_id = negotiate_job(&network).await?;

    attester.ledger.fail_submissions(true);
    attester.service.submit_attestation(&attestation_id).await?;
    assert_eq!(attester.run_jobs().await?, 3);

    let failed = attester.service.queue().tasks(JobState::Failed).await?;
    assert_eq!(
        failed,
        vec![Task::SubmitAttestation {
            attestation_id: attestation_id.clone()
        }]
    );
    assert!(attester.ledger.submitted().is_empty());
    let stored = attester
        .db
        .as_dao::<AttestationDao>()
        .get(&attestation_id)
        .await?
        .unwrap();
    assert_eq!(stored.status, AttestationStatus::Ready);

    // Once the node is back, a new request goes through.
    attester.ledger.fail_submissions(false);
    attester.service.submit_attestation(&attestation_id).await?;
    assert_eq!(attester.run_jobs().await?, 1);
    assert_eq!(attester.ledger.submitted().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_repeated_submission_sends_one_transaction() -> anyhow::Result<()> {
    let network = market(
        "test_repeated_submission_sends_one_transaction",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);
    let attestation_id = negotiate_job(&network).await?;

    attester.service.submit_attestation(&attestation_id).await?;
    attester.service.submit_attestation(&attestation_id).await?;
    assert_eq!(attester.run_jobs().await?, 2);
    attester.service.submit_attestation(&attestation_id).await?;
    assert_eq!(attester.run_jobs().await?, 1);

    assert_eq!(attester.ledger.submitted().len(), 1);
    assert_eq!(
        attester
            .service
            .queue()
            .tasks(JobState::Completed)
            .await?
            .into_iter()
            .filter(|task| matches!(task, Task::SubmitAttestation { .. }))
            .count(),
        3
    );
    Ok(())
}

#[tokio::test]
async fn test_submission_of_requester_attestation_fails_at_once() -> anyhow::Result<()> {
    let network = market(
        "test_submission_of_requester_attestation_fails_at_once",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let requester = network.node(REQUESTER);
    let (attestation, _) = solicit(requester, 5).await?;
    network.settle().await?;

    requester.service.submit_attestation(&attestation.id).await?;
    assert_eq!(requester.run_jobs().await?, 1);
    assert_eq!(
        requester.service.queue().tasks(JobState::Failed).await?.len(),
        1
    );

    assert!(matches!(
        requester.service.submit_attestation("missing").await,
        Err(NegotiationError::AttestationNotFound(_))
    ));
    Ok(())
}

#[tokio::test]
async fn test_interrupted_jobs_are_recovered() -> anyhow::Result<()> {
    let network = market(
        "test_interrupted_jobs_are_recovered",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);
    let attestation_id = negotiate_job(&network).await?;
    let queue = attester.service.queue();

    attester.service.submit_attestation(&attestation_id).await?;
    // Claimed, then the process "dies" before finishing it.
    let claimed = queue.next().await?.unwrap();
    assert_eq!(claimed.attempts, 1);
    assert!(queue.next().await?.is_none());
    assert_eq!(attester.run_jobs().await?, 0);

    assert_eq!(queue.recover().await?, 1);
    assert_eq!(attester.run_jobs().await?, 1);
    assert_eq!(attester.ledger.submitted().len(), 1);
    Ok(())
}

/// Ledger whose submissions hang until released.
#[derive(Default)]
struct HeldLedger {
    submissions: AtomicUsize,
    entered: Notify,
    release: Notify,
}

#[async_trait]
impl Ledger for HeldLedger {
    async fn escrow_balance(&self, _address: &Address) -> Result<BigDecimal, LedgerError> {
        Ok(BigDecimal::from(0))
    }

    async fn submit_attestation(&self, _tx: &AttestationTx) -> Result<TxHash, LedgerError> {
        let n = self.submissions.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.notify_one();
        self.release.notified().await;
        Ok(format!("0x{:064x}", n))
    }
}

#[tokio::test]
async fn test_concurrent_workers_submit_once() -> anyhow::Result<()> {
    let network = market(
        "test_concurrent_workers_submit_once",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);
    let attestation_id = negotiate_job(&network).await?;

    // Two processes sharing one database.
    let ledger = Arc::new(HeldLedger::default());
    let first = TaskRunner::new(
        attester.db.clone(),
        Arc::new(attester.whisper.clone()),
        ledger.clone(),
    );
    let second = TaskRunner::new(
        attester.db.clone(),
        Arc::new(attester.whisper.clone()),
        ledger.clone(),
    );
    let task = Task::SubmitAttestation {
        attestation_id: attestation_id.clone(),
    };

    let (first_result, second_result) = tokio::join!(first.run(&task), async {
        ledger.entered.notified().await;
        let result = second.run(&task).await;
        ledger.release.notify_one();
        result
    });

    assert!(first_result.is_ok());
    match second_result {
        Err(e) => assert!(e.is_retryable()),
        Ok(()) => panic!("Second worker submitted a claimed attestation."),
    }
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);

    let stored = attester
        .db
        .as_dao::<AttestationDao>()
        .get(&attestation_id)
        .await?
        .unwrap();
    assert_eq!(stored.status, AttestationStatus::Complete);
    assert!(stored.tx_hash.is_some());

    // The retried job finds the transaction and does nothing.
    second.run(&task).await?;
    assert_eq!(ledger.submissions.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn test_claimed_attestation_is_released_on_ledger_error() -> anyhow::Result<()> {
    let network = market(
        "test_claimed_attestation_is_released_on_ledger_error",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);
    let attestation_id = negotiate_job(&network).await?;
    let dao = attester.db.as_dao::<AttestationDao>();

    attester.ledger.fail_submissions(true);
    attester.service.submit_attestation(&attestation_id).await?;
    attester.run_jobs().await?;
    assert_eq!(dao.get(&attestation_id).await?.unwrap().status, AttestationStatus::Ready);

    // A claim held elsewhere blocks submission without touching the ledger.
    attester.ledger.fail_submissions(false);
    assert!(dao.claim_for_submission(&attestation_id).await?);
    assert!(!dao.claim_for_submission(&attestation_id).await?);
    attester.service.submit_attestation(&attestation_id).await?;
    attester.run_jobs().await?;
    assert!(attester.ledger.submitted().is_empty());

    assert!(dao.release_claim(&attestation_id).await?);
    attester.service.submit_attestation(&attestation_id).await?;
    assert_eq!(attester.run_jobs().await?, 1);
    assert_eq!(attester.ledger.submitted().len(), 1);
    Ok(())
}
