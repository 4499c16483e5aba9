use chrono::{NaiveDateTime, Utc};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};

use attest_persistence::executor::{
    do_with_transaction, readonly_transaction, AsDao, ConnType, PoolType,
};
use attest_persistence::types::BigDecimalField;

use crate::db::dao::job::insert_job;
use crate::db::model::{
    Attestation, AttestationRole, AttestationStatus, JobDetailsFields, MessageType, Negotiation,
    NegotiationMsg, NewJob, PersistRecord, StoreAttestationBid, StoreAwaitSubjectData, StoreJobDetails,
    StorePaymentAuthorization, StoreSolicitation, StoreStartAttestation,
};
use crate::db::schema::attestation::dsl as attestation_dsl;
use crate::db::schema::negotiation::dsl as negotiation_dsl;
use crate::db::schema::negotiation_msg::dsl as msg_dsl;
use crate::db::schema::{attestation, negotiation, negotiation_msg};
use crate::db::{DbError, DbResult};

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// The step was stored before; the inbound message is a replay.
    #[error("Step [{message_type}] of negotiation [{negotiation_id}] already stored.")]
    Duplicate {
        negotiation_id: String,
        message_type: MessageType,
    },
    #[error("Can't store [{message_type}] of negotiation [{negotiation_id}]: {missing} not found.")]
    MissingPrerequisite {
        negotiation_id: String,
        message_type: MessageType,
        missing: String,
    },
    #[error("Negotiation [{0}] already accepted another bid.")]
    AlreadyAccepted(String),
    #[error(transparent)]
    Db(#[from] DbError),
}

impl From<DieselError> for StoreError {
    fn from(e: DieselError) -> Self {
        StoreError::Db(DbError::Diesel(e))
    }
}

impl From<r2d2::Error> for StoreError {
    fn from(e: r2d2::Error) -> Self {
        StoreError::Db(DbError::Pool(e))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Db(DbError::RuntimeError(e))
    }
}

impl StoreError {
    /// Errors caused by the counterparty breaking the protocol. Retrying the
    /// same message won't help.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            StoreError::MissingPrerequisite { .. } | StoreError::AlreadyAccepted(..)
        )
    }
}

fn is_unique_violation(e: &DieselError) -> bool {
    match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => true,
        DieselError::DatabaseError(_, info) => info.message().contains("UNIQUE constraint failed"),
        _ => false,
    }
}

/// Changes a negotiation step applies to an attestation. `None` fields are
/// left untouched.
#[derive(AsChangeset)]
#[table_name = "attestation"]
struct AttestationUpdate {
    status: Option<AttestationStatus>,
    subject: Option<String>,
    attester: Option<String>,
    requester: Option<String>,
    data: Option<String>,
    type_ids: Option<String>,
    subject_sig: Option<String>,
    requester_sig: Option<String>,
    payment_nonce: Option<String>,
    payment_sig: Option<String>,
    data_hash: Option<String>,
    request_nonce: Option<String>,
    reward: Option<BigDecimalField>,
    updated_at: NaiveDateTime,
}

impl AttestationUpdate {
    fn touch() -> Self {
        AttestationUpdate {
            status: None,
            subject: None,
            attester: None,
            requester: None,
            data: None,
            type_ids: None,
            subject_sig: None,
            requester_sig: None,
            payment_nonce: None,
            payment_sig: None,
            data_hash: None,
            request_nonce: None,
            reward: None,
            updated_at: Utc::now().naive_utc(),
        }
    }

    fn with_job_details(mut self, details: &JobDetailsFields) -> Self {
        self.subject = Some(details.subject.to_string());
        self.data = Some(details.subject_data.clone());
        self.type_ids = Some(serde_json::Value::from(details.type_ids.clone()).to_string());
        self.subject_sig = Some(details.subject_sig.clone());
        self.requester_sig = Some(details.requester_sig.clone());
        self.payment_nonce = Some(details.payment_nonce.clone());
        self.payment_sig = Some(details.payment_sig.clone());
        self.data_hash = Some(details.data_hash.clone());
        self.request_nonce = Some(details.request_nonce.clone());
        self.reward = Some(details.reward.clone().into());
        self
    }
}

/// Transactional persistence of negotiation steps.
///
/// Every store function inserts one `negotiation_msg` row first. The unique
/// index on (regarding message, negotiation, step) makes a replayed inbound
/// message fail with [`StoreError::Duplicate`] and roll back, so callers can
/// treat it as already handled.
pub struct NegotiationDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for NegotiationDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> NegotiationDao<'c> {
    pub async fn store(&self, record: PersistRecord) -> Result<(), StoreError> {
        self.store_with_jobs(record, vec![]).await
    }

    /// Stores a negotiation step and, in the same transaction, the jobs that
    /// carry out its side effects. A replayed step stores neither.
    pub async fn store_with_jobs(
        &self,
        record: PersistRecord,
        jobs: Vec<NewJob>,
    ) -> Result<(), StoreError> {
        do_with_transaction(self.pool, move |conn| {
            match record {
                PersistRecord::Solicitation(r) => store_solicitation(conn, r)?,
                PersistRecord::AttestationBid(r) => store_attestation_bid(conn, r)?,
                PersistRecord::AwaitSubjectData(r) => store_await_subject_data(conn, r)?,
                PersistRecord::JobDetails(r) => store_send_job_details(conn, r)?,
                PersistRecord::StartAttestation(r) => store_start_attestation(conn, r)?,
                PersistRecord::PaymentAuthorization(r) => {
                    store_send_payment_authorization(conn, r)?
                }
            }
            for job in &jobs {
                insert_job(conn, job)?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get(&self, negotiation_id: &str) -> DbResult<Option<Negotiation>> {
        let negotiation_id = negotiation_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(get_negotiation(conn, &negotiation_id)?)
        })
        .await
    }

    /// Latest message of the given step in a negotiation.
    pub async fn find_message(
        &self,
        negotiation_id: &str,
        message_type: MessageType,
    ) -> DbResult<Option<NegotiationMsg>> {
        let negotiation_id = negotiation_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(negotiation_msg::table
                .filter(msg_dsl::negotiation_id.eq(negotiation_id))
                .filter(msg_dsl::message_type.eq(message_type))
                .order_by(msg_dsl::created_at.desc())
                .first::<NegotiationMsg>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn messages(&self, negotiation_id: &str) -> DbResult<Vec<NegotiationMsg>> {
        let negotiation_id = negotiation_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(negotiation_msg::table
                .filter(msg_dsl::negotiation_id.eq(negotiation_id))
                .order_by(msg_dsl::created_at.asc())
                .load::<NegotiationMsg>(conn)?)
        })
        .await
    }
}

fn store_solicitation(conn: &ConnType, r: StoreSolicitation) -> Result<(), StoreError> {
    let message_type = MessageType::SolicitationStored;
    create_negotiation(conn, &r.session, &r.reward_ask.clone().into(), &r.attestation_topic.to_string())?;

    let mut msg = NegotiationMsg::new(r.session.clone(), None, r.session.clone(), message_type);
    msg.future_topic = Some(r.reply_topic.to_string());
    insert_message(conn, msg)?;

    let updated = diesel::update(
        attestation_dsl::attestation
            .filter(attestation_dsl::id.eq(&r.attestation_id))
            .filter(attestation_dsl::role.eq(AttestationRole::Requester)),
    )
    .set((
        attestation_dsl::negotiation_id.eq(&r.session),
        attestation_dsl::reward.eq(BigDecimalField::from(r.reward_ask.clone())),
        attestation_dsl::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;

    if updated == 0 {
        return Err(StoreError::MissingPrerequisite {
            negotiation_id: r.session.clone(),
            message_type,
            missing: format!("requester attestation [{}]", r.attestation_id),
        });
    }
    Ok(())
}

fn store_attestation_bid(conn: &ConnType, r: StoreAttestationBid) -> Result<(), StoreError> {
    create_negotiation(
        conn,
        &r.negotiation_session,
        &r.reward_ask.clone().into(),
        &r.attestation_topic.to_string(),
    )?;

    let mut msg = NegotiationMsg::new(
        r.bid_session.clone(),
        Some(r.solicitation_session.clone()),
        r.negotiation_session.clone(),
        MessageType::BidStored,
    );
    msg.future_topic = Some(r.listen_topic.to_string());
    msg.bid = Some(r.reward_bid.clone().into());
    msg.reply_to = r.requester_public_key.clone();
    insert_message(conn, msg)?;

    let mut attestation = Attestation::new(AttestationRole::Attester, r.attestation_type);
    attestation.negotiation_id = Some(r.negotiation_session.clone());
    attestation.reward = Some(r.reward_bid.clone().into());
    diesel::insert_into(attestation_dsl::attestation)
        .values(&attestation)
        .execute(conn)?;
    Ok(())
}

fn store_await_subject_data(conn: &ConnType, r: StoreAwaitSubjectData) -> Result<(), StoreError> {
    let message_type = MessageType::AwaitSubjectDataStored;
    let missing = |what: String| StoreError::MissingPrerequisite {
        negotiation_id: r.negotiation_session.clone(),
        message_type,
        missing: what,
    };

    get_negotiation(conn, &r.negotiation_session)?
        .ok_or_else(|| missing("negotiation".to_string()))?;

    let accepted_other = negotiation_msg::table
        .filter(msg_dsl::negotiation_id.eq(&r.negotiation_session))
        .filter(msg_dsl::message_type.eq(message_type))
        .filter(msg_dsl::regarding_uuid.ne(&r.bid_session))
        .count()
        .get_result::<i64>(conn)?;
    if accepted_other > 0 {
        return Err(StoreError::AlreadyAccepted(r.negotiation_session.clone()));
    }

    let mut msg = NegotiationMsg::new(
        r.uuid.clone(),
        Some(r.bid_session.clone()),
        r.negotiation_session.clone(),
        message_type,
    );
    msg.future_topic = Some(r.attester_topic.to_string());
    msg.bid = Some(r.reward_bid.clone().into());
    msg.reply_to = r.attester_public_key.clone();
    insert_message(conn, msg)?;

    let attestation =
        find_role_attestation(conn, &r.negotiation_session, AttestationRole::Requester)?
            .ok_or_else(|| missing("requester attestation".to_string()))?;
    link_attestation(conn, &r.negotiation_session, &attestation.id)?;

    let mut update = AttestationUpdate::touch();
    update.attester = Some(r.attester.to_string());
    update.reward = Some(r.reward_bid.clone().into());
    update_attestation(conn, &attestation.id, &update)
}

fn store_send_job_details(conn: &ConnType, r: StoreJobDetails) -> Result<(), StoreError> {
    let message_type = MessageType::SendJobDetailsStored;
    insert_message(
        conn,
        NegotiationMsg::new(
            r.session.clone(),
            Some(r.bid_session.clone()),
            r.negotiation_session.clone(),
            message_type,
        ),
    )?;

    let attestation =
        find_role_attestation(conn, &r.negotiation_session, AttestationRole::Requester)?
            .ok_or_else(|| StoreError::MissingPrerequisite {
                negotiation_id: r.negotiation_session.clone(),
                message_type,
                missing: "requester attestation".to_string(),
            })?;

    let mut update = AttestationUpdate::touch().with_job_details(&r.details);
    update.status = Some(AttestationStatus::Ready);
    update_attestation(conn, &attestation.id, &update)
}

fn store_start_attestation(conn: &ConnType, r: StoreStartAttestation) -> Result<(), StoreError> {
    let message_type = MessageType::StartAttestationStored;
    insert_message(
        conn,
        NegotiationMsg::new(
            r.session.clone(),
            Some(r.bid_session.clone()),
            r.negotiation_session.clone(),
            message_type,
        ),
    )?;

    let attestation =
        find_role_attestation(conn, &r.negotiation_session, AttestationRole::Attester)?
            .ok_or_else(|| StoreError::MissingPrerequisite {
                negotiation_id: r.negotiation_session.clone(),
                message_type,
                missing: "attester attestation".to_string(),
            })?;
    link_attestation(conn, &r.negotiation_session, &attestation.id)?;

    let mut update = AttestationUpdate::touch().with_job_details(&r.details);
    update.attester = Some(r.attester.to_string());
    update.requester = Some(r.requester.to_string());
    update.status = Some(AttestationStatus::Ready);
    update_attestation(conn, &attestation.id, &update)
}

fn store_send_payment_authorization(conn: &ConnType, r: StorePaymentAuthorization) -> Result<(), StoreError> {
    let message_type = MessageType::SendPaymentAuthorizationStored;
    insert_message(
        conn,
        NegotiationMsg::new(
            r.session.clone(),
            Some(r.bid_session.clone()),
            r.negotiation_session.clone(),
            message_type,
        ),
    )?;

    let attestation = find_role_attestation(conn, &r.negotiation_session, r.role)?
        .ok_or_else(|| StoreError::MissingPrerequisite {
            negotiation_id: r.negotiation_session.clone(),
            message_type,
            missing: format!("{} attestation", r.role),
        })?;
    link_attestation(conn, &r.negotiation_session, &attestation.id)?;

    let mut update = AttestationUpdate::touch();
    update.attester = Some(r.attester.to_string());
    update.requester = Some(r.requester.to_string());
    update.payment_nonce = Some(r.payment_nonce.clone());
    update.payment_sig = Some(r.payment_sig.clone());
    update.reward = Some(r.reward.clone().into());
    update.status = Some(AttestationStatus::Ready);
    update_attestation(conn, &attestation.id, &update)
}

fn create_negotiation(
    conn: &ConnType,
    id: &str,
    initial_reward: &BigDecimalField,
    attestation_topic: &str,
) -> Result<(), StoreError> {
    diesel::insert_or_ignore_into(negotiation::table)
        .values(&Negotiation::new(
            id.to_string(),
            initial_reward.clone(),
            attestation_topic.to_string(),
        ))
        .execute(conn)?;
    Ok(())
}

fn get_negotiation(conn: &ConnType, id: &str) -> Result<Option<Negotiation>, DieselError> {
    negotiation::table
        .filter(negotiation_dsl::id.eq(id))
        .first::<Negotiation>(conn)
        .optional()
}

fn insert_message(conn: &ConnType, msg: NegotiationMsg) -> Result<(), StoreError> {
    diesel::insert_into(negotiation_msg::table)
        .values(&msg)
        .execute(conn)
        .map_err(|e| match is_unique_violation(&e) {
            true => StoreError::Duplicate {
                negotiation_id: msg.negotiation_id.clone(),
                message_type: msg.message_type,
            },
            false => e.into(),
        })?;
    Ok(())
}

fn find_role_attestation(
    conn: &ConnType,
    negotiation_id: &str,
    role: AttestationRole,
) -> Result<Option<Attestation>, DieselError> {
    attestation::table
        .filter(attestation_dsl::negotiation_id.eq(negotiation_id))
        .filter(attestation_dsl::role.eq(role))
        .order_by(attestation_dsl::created_at.desc())
        .first::<Attestation>(conn)
        .optional()
}

fn link_attestation(
    conn: &ConnType,
    negotiation_id: &str,
    attestation_id: &str,
) -> Result<(), StoreError> {
    diesel::update(negotiation::table.filter(negotiation_dsl::id.eq(negotiation_id)))
        .set(negotiation_dsl::attestation_id.eq(attestation_id))
        .execute(conn)?;
    Ok(())
}

fn update_attestation(
    conn: &ConnType,
    attestation_id: &str,
    update: &AttestationUpdate,
) -> Result<(), StoreError> {
    diesel::update(attestation::table.filter(attestation_dsl::id.eq(attestation_id)))
        .set(update)
        .execute(conn)?;
    Ok(())
}
