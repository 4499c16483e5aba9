use chrono::Utc;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};

use attest_persistence::executor::{do_with_transaction, readonly_transaction, AsDao, PoolType};

use crate::db::model::{Attestation, AttestationRole, AttestationStatus};
use crate::db::schema::attestation::dsl;
use crate::db::DbResult;

pub struct AttestationDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for AttestationDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> AttestationDao<'c> {
    pub async fn create(&self, attestation: Attestation) -> DbResult<()> {
        do_with_transaction(self.pool, move |conn| {
            diesel::insert_into(dsl::attestation)
                .values(&attestation)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn get(&self, attestation_id: &str) -> DbResult<Option<Attestation>> {
        let attestation_id = attestation_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::attestation
                .filter(dsl::id.eq(attestation_id))
                .first::<Attestation>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn find_by_negotiation(
        &self,
        negotiation_id: &str,
        role: AttestationRole,
    ) -> DbResult<Option<Attestation>> {
        let negotiation_id = negotiation_id.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::attestation
                .filter(dsl::negotiation_id.eq(negotiation_id))
                .filter(dsl::role.eq(role))
                .order_by(dsl::created_at.desc())
                .first::<Attestation>(conn)
                .optional()?)
        })
        .await
    }

    pub async fn list(&self) -> DbResult<Vec<Attestation>> {
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::attestation
                .order_by(dsl::created_at.asc())
                .load::<Attestation>(conn)?)
        })
        .await
    }

    /// Single-statement `ready` to `submitting` transition. Only one worker,
    /// in any process sharing the database, gets true for a given attestation.
    pub async fn claim_for_submission(&self, attestation_id: &str) -> DbResult<bool> {
        self.transition(
            attestation_id,
            AttestationStatus::Ready,
            AttestationStatus::Submitting,
        )
        .await
    }

    /// Gives the claim back after a failed submission.
    pub async fn release_claim(&self, attestation_id: &str) -> DbResult<bool> {
        self.transition(
            attestation_id,
            AttestationStatus::Submitting,
            AttestationStatus::Ready,
        )
        .await
    }

    async fn transition(
        &self,
        attestation_id: &str,
        from: AttestationStatus,
        to: AttestationStatus,
    ) -> DbResult<bool> {
        let attestation_id = attestation_id.to_string();
        do_with_transaction(self.pool, move |conn| {
            let updated = diesel::update(
                dsl::attestation
                    .filter(dsl::id.eq(attestation_id))
                    .filter(dsl::status.eq(from)),
            )
            .set((
                dsl::status.eq(to),
                dsl::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }

    /// Moves a claimed attestation to `complete` and records its transaction.
    /// Returns false if the attestation wasn't claimed anymore.
    pub async fn mark_complete(&self, attestation_id: &str, tx_hash: &str) -> DbResult<bool> {
        let attestation_id = attestation_id.to_string();
        let tx_hash = tx_hash.to_string();
        do_with_transaction(self.pool, move |conn| {
            let updated = diesel::update(
                dsl::attestation
                    .filter(dsl::id.eq(attestation_id))
                    .filter(dsl::status.eq(AttestationStatus::Submitting)),
            )
            .set((
                dsl::status.eq(AttestationStatus::Complete),
                dsl::tx_hash.eq(tx_hash),
                dsl::updated_at.eq(Utc::now().naive_utc()),
            ))
            .execute(conn)?;
            Ok(updated > 0)
        })
        .await
    }
}
