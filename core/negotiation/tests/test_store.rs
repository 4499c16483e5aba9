mod utils;

use bigdecimal::BigDecimal;

use attest_negotiation::crypto::{new_session, to_topic, Wallet};
use attest_negotiation::db::dao::{AttestationDao, NegotiationDao, StoreError};
use attest_negotiation::db::model::{
    AttestationRole, JobState, MessageType, PersistRecord, StoreAttestationBid,
    StoreAwaitSubjectData,
};
use attest_negotiation::service::Wallets;
use attest_negotiation::testing::NegotiationNetwork;
use attest_negotiation::{AttestationType, Task};

use utils::*;

const NODE: &str = "Store";

async fn store_node(test_name: &str) -> anyhow::Result<NegotiationNetwork> {
    init_logger();
    NegotiationNetwork::new(test_name)?
        .add_node(NODE, &["--ping-enabled", "false"], Wallets::default())
        .await
}

fn bid_record(negotiation_id: &str) -> StoreAttestationBid {
    let bid_session = new_session();
    StoreAttestationBid {
        listen_topic: to_topic(&bid_session),
        bid_session,
        negotiation_session: negotiation_id.to_string(),
        solicitation_session: negotiation_id.to_string(),
        reward_ask: BigDecimal::from(10),
        reward_bid: BigDecimal::from(10),
        attestation_type: AttestationType::Phone,
        attestation_topic: AttestationType::Phone.topic(),
        requester_public_key: Some("0x04aa".to_string()),
    }
}

#[tokio::test]
async fn test_replayed_step_is_a_duplicate() -> anyhow::Result<()> {
    let network = store_node("test_replayed_step_is_a_duplicate").await?;
    let dao = network.node(NODE).db.as_dao::<NegotiationDao>();

    let negotiation_id = new_session();
    let record = bid_record(&negotiation_id);
    dao.store(PersistRecord::AttestationBid(record.clone())).await?;

    match dao.store(PersistRecord::AttestationBid(record)).await {
        Err(StoreError::Duplicate {
            negotiation_id: id,
            message_type,
        }) => {
            assert_eq!(id, negotiation_id);
            assert_eq!(message_type, MessageType::BidStored);
        }
        other => panic!("Expected a duplicate, got {:?}", other),
    }

    // The replay was rolled back as a whole.
    assert_eq!(dao.messages(&negotiation_id).await?.len(), 1);
    let attestations = network
        .node(NODE)
        .db
        .as_dao::<AttestationDao>()
        .list()
        .await?
        .into_iter()
        .filter(|a| a.role == AttestationRole::Attester)
        .count();
    assert_eq!(attestations, 1);
    Ok(())
}

#[tokio::test]
async fn test_missing_negotiation_is_not_a_duplicate() -> anyhow::Result<()> {
    let network = store_node("test_missing_negotiation_is_not_a_duplicate").await?;
    let dao = network.node(NODE).db.as_dao::<NegotiationDao>();

    let negotiation_id = new_session();
    let result = dao
        .store(PersistRecord::AwaitSubjectData(StoreAwaitSubjectData {
            uuid: new_session(),
            bid_session: new_session(),
            negotiation_session: negotiation_id.clone(),
            attester: Wallet::random().address(),
            reward_bid: BigDecimal::from(10),
            attester_topic: to_topic(&negotiation_id),
            attester_public_key: None,
        }))
        .await;

    assert!(matches!(
        result,
        Err(StoreError::MissingPrerequisite { .. })
    ));
    assert!(dao.messages(&negotiation_id).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_step_and_its_jobs_commit_together() -> anyhow::Result<()> {
    let network = store_node("test_step_and_its_jobs_commit_together").await?;
    let node = network.node(NODE);
    let dao = node.db.as_dao::<NegotiationDao>();
    let queue = node.service.queue();
    let pending = || async move { queue.tasks(JobState::Pending).await };
    let before = pending().await?.len();

    let negotiation_id = new_session();
    let record = bid_record(&negotiation_id);
    let end_session = Task::WhisperEndSession {
        topic: to_topic(&negotiation_id),
        entity: "phone".to_string(),
    };
    dao.store_with_jobs(
        PersistRecord::AttestationBid(record.clone()),
        vec![queue.job(&end_session)?],
    )
    .await?;
    let jobs = pending().await?;
    assert_eq!(jobs.len(), before + 1);
    assert!(jobs.contains(&end_session));

    // A replay rolls back its jobs with the step.
    let replay = dao
        .store_with_jobs(
            PersistRecord::AttestationBid(record),
            vec![queue.job(&end_session)?],
        )
        .await;
    assert!(matches!(replay, Err(StoreError::Duplicate { .. })));
    assert_eq!(pending().await?.len(), before + 1);

    // So does a step that can't be stored.
    let orphan = new_session();
    let rejected = dao
        .store_with_jobs(
            PersistRecord::AwaitSubjectData(StoreAwaitSubjectData {
                uuid: new_session(),
                bid_session: new_session(),
                negotiation_session: orphan.clone(),
                attester: Wallet::random().address(),
                reward_bid: BigDecimal::from(10),
                attester_topic: to_topic(&orphan),
                attester_public_key: None,
            }),
            vec![queue.job(&end_session)?],
        )
        .await;
    assert!(matches!(
        rejected,
        Err(StoreError::MissingPrerequisite { .. })
    ));
    assert_eq!(pending().await?.len(), before + 1);
    Ok(())
}
