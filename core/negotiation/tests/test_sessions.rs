mod utils;

use attest_negotiation::crypto::{new_session, to_topic};
use attest_negotiation::db::dao::FilterDao;
use attest_negotiation::protocol::{ping_topic, Ping};
use attest_negotiation::service::Wallets;
use attest_negotiation::testing::NegotiationNetwork;
use attest_negotiation::{AttestationType, Message, Task};

use utils::*;

#[tokio::test]
async fn test_expired_broadcast_filter_is_replaced() -> anyhow::Result<()> {
    let network = market(
        "test_expired_broadcast_filter_is_replaced",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let attester = network.node(ATTESTER);

    let filters = attester.whisper.active_filters();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].1, vec![AttestationType::Phone.topic()]);
    attester.whisper.expire_filter(&filters[0].0);

    let stats = attester.poll().await;
    assert_eq!(stats.expired_filters, 1);
    assert!(attester
        .db
        .as_dao::<FilterDao>()
        .list_for_entity("phone")
        .await?
        .is_empty());

    assert_eq!(attester.run_jobs().await?, 1);
    let renewed = attester.whisper.active_filters();
    assert_eq!(renewed.len(), 1);
    assert_ne!(renewed[0].0, filters[0].0);

    // Solicitations reach the attester again.
    let (_, negotiation_id) = solicit(network.node(REQUESTER), 5).await?;
    network.settle().await?;
    assert_eq!(
        network.whisper().posted_on(&to_topic(&negotiation_id)).len(),
        1
    );
    Ok(())
}

#[tokio::test]
async fn test_expired_direct_filter_is_dropped() -> anyhow::Result<()> {
    let network = market(
        "test_expired_direct_filter_is_dropped",
        ATTESTER_ARGS,
        &["--ping-enabled", "false"],
    )
    .await?;
    let requester = network.node(REQUESTER);
    let (_, negotiation_id) = solicit(requester, 5).await?;
    assert_eq!(requester.run_jobs().await?, 1);
    assert_eq!(requester.whisper.key_pair_count(), 1);

    let filters = requester.whisper.active_filters();
    assert_eq!(filters.len(), 1);
    assert_eq!(filters[0].1, vec![to_topic(&negotiation_id)]);
    requester.whisper.expire_filter(&filters[0].0);

    let stats = requester.poll().await;
    assert_eq!(stats.expired_filters, 1);
    assert_eq!(requester.whisper.key_pair_count(), 0);
    // Reply channels are not reopened.
    assert_eq!(requester.run_jobs().await?, 0);
    assert!(requester.whisper.active_filters().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_ping_is_answered_by_every_node() -> anyhow::Result<()> {
    init_logger();
    let network = NegotiationNetwork::new("test_ping_is_answered_by_every_node")?
        .add_node("Node-1", &[], Wallets::default())
        .await?
        .add_node("Node-2", &[], Wallets::default())
        .await?;
    network.settle().await?;

    let node = network.node("Node-1");
    let session = new_session();
    node.service
        .queue()
        .publish(Task::WhisperBroadcastMessage {
            message: Message::Ping(Ping {
                session: session.clone(),
                reply_to_topic: ping_topic(),
            }),
            topic: ping_topic(),
            password: node.config.whisper.whisper_password.clone(),
        })
        .await?;
    network.settle().await?;

    let pongs = network
        .whisper()
        .posted_on(&ping_topic())
        .into_iter()
        .filter_map(|payload| Message::from_payload(&payload).ok())
        .filter(|message| matches!(message, Message::Pong(pong) if pong.re_session == session))
        .count();
    assert_eq!(pongs, 2);
    Ok(())
}

#[tokio::test]
async fn test_message_for_wrong_entity_is_dropped() -> anyhow::Result<()> {
    let network = market(
        "test_message_for_wrong_entity_is_dropped",
        ATTESTER_ARGS,
        REQUESTER_ARGS,
    )
    .await?;
    let requester = network.node(REQUESTER);

    // A ping on an attestation type topic is not something an attester
    // answers.
    requester
        .service
        .queue()
        .publish(Task::WhisperBroadcastMessage {
            message: Message::Ping(Ping {
                session: new_session(),
                reply_to_topic: ping_topic(),
            }),
            topic: AttestationType::Phone.topic(),
            password: requester.config.whisper.whisper_password.clone(),
        })
        .await?;
    let stats = network.settle().await?;

    assert_eq!(stats.received, 1);
    assert_eq!(stats.rejected, 1);
    assert!(network.whisper().posted_on(&ping_topic()).is_empty());
    Ok(())
}
