use std::sync::Arc;

use attest_ledger::Ledger;
use attest_persistence::executor::DbExecutor;

use crate::config::Config;
use crate::crypto::new_session;
use crate::negotiation::decision::{Decision, DecisionAction, Recipient};
use crate::protocol::{Message, Ping, Pong};

/// Dependencies shared by the attester and requester sides.
#[derive(Clone)]
pub struct CommonBroker {
    pub(super) db: DbExecutor,
    pub(super) ledger: Arc<dyn Ledger>,
    pub(super) config: Arc<Config>,
}

impl CommonBroker {
    pub fn new(db: DbExecutor, ledger: Arc<dyn Ledger>, config: Arc<Config>) -> CommonBroker {
        CommonBroker { db, ledger, config }
    }

    pub fn password(&self) -> &str {
        &self.config.whisper.whisper_password
    }

    /// Liveness check: answer on the topic the ping asked for.
    pub fn handle_ping(&self, ping: &Ping) -> Decision {
        Decision::new(DecisionAction::Pong).respond(
            Recipient::broadcast(ping.reply_to_topic.clone(), self.password()),
            Message::Pong(Pong {
                session: new_session(),
                re_session: ping.session.clone(),
            }),
        )
    }
}
