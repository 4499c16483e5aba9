use chrono::{NaiveDateTime, Utc};
use diesel::result::Error as DieselError;
use diesel::{ExpressionMethods, OptionalExtension, QueryDsl, RunQueryDsl};

use attest_persistence::executor::{
    do_with_transaction, readonly_transaction, AsDao, ConnType, PoolType,
};
use attest_persistence::types::AdaptTimestamp;

use crate::db::model::{Job, JobState, NewJob};
use crate::db::schema::job::dsl;
use crate::db::DbResult;

no_arg_sql_function!(
    last_insert_rowid,
    diesel::sql_types::Integer,
    "Id of the row inserted last on this connection."
);

/// Inserts a job on a connection the caller already holds, so the job
/// commits together with the caller's transaction.
pub(super) fn insert_job(conn: &ConnType, job: &NewJob) -> Result<i32, DieselError> {
    diesel::insert_into(dsl::job).values(job).execute(conn)?;
    diesel::select(last_insert_rowid).get_result::<i32>(conn)
}

pub struct JobDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for JobDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> JobDao<'c> {
    pub async fn insert(&self, job: NewJob) -> DbResult<i32> {
        do_with_transaction(self.pool, move |conn| Ok(insert_job(conn, &job)?)).await
    }

    /// Atomically claims the oldest due pending job. A job claimed by a
    /// concurrent worker in between is skipped.
    pub async fn claim_next(&self) -> DbResult<Option<Job>> {
        do_with_transaction(self.pool, move |conn| {
            let now = Utc::now().naive_utc();
            let candidate = dsl::job
                .filter(dsl::state.eq(JobState::Pending))
                .filter(dsl::run_after.le(now.adapt()))
                .order_by((dsl::run_after.asc(), dsl::id.asc()))
                .first::<Job>(conn)
                .optional()?;

            let candidate = match candidate {
                Some(job) => job,
                None => return Ok(None),
            };

            let claimed = diesel::update(
                dsl::job
                    .filter(dsl::id.eq(candidate.id))
                    .filter(dsl::state.eq(JobState::Pending)),
            )
            .set((
                dsl::state.eq(JobState::Active),
                dsl::attempts.eq(dsl::attempts + 1),
                dsl::updated_at.eq(now),
            ))
            .execute(conn)?;

            if claimed == 0 {
                return Ok(None);
            }
            Ok(Some(dsl::job.filter(dsl::id.eq(candidate.id)).first::<Job>(conn)?))
        })
        .await
    }

    pub async fn complete(&self, job_id: i32) -> DbResult<()> {
        self.set_state(job_id, JobState::Completed, None, None).await
    }

    /// Puts a failed job back in the queue to run at `retry_at`, or marks it
    /// failed for good when `retry_at` is `None`.
    pub async fn fail(
        &self,
        job_id: i32,
        error: String,
        retry_at: Option<NaiveDateTime>,
    ) -> DbResult<()> {
        match retry_at {
            Some(at) => self.set_state(job_id, JobState::Pending, Some(error), Some(at)).await,
            None => self.set_state(job_id, JobState::Failed, Some(error), None).await,
        }
    }

    async fn set_state(
        &self,
        job_id: i32,
        state: JobState,
        error: Option<String>,
        run_after: Option<NaiveDateTime>,
    ) -> DbResult<()> {
        do_with_transaction(self.pool, move |conn| {
            let now = Utc::now().naive_utc();
            diesel::update(dsl::job.filter(dsl::id.eq(job_id)))
                .set((
                    dsl::state.eq(state),
                    dsl::last_error.eq(error),
                    dsl::updated_at.eq(now),
                ))
                .execute(conn)?;
            if let Some(run_after) = run_after {
                diesel::update(dsl::job.filter(dsl::id.eq(job_id)))
                    .set(dsl::run_after.eq(run_after.adapt()))
                    .execute(conn)?;
            }
            Ok(())
        })
        .await
    }

    /// Returns jobs left active by a previous process to the queue.
    pub async fn requeue_active(&self) -> DbResult<usize> {
        do_with_transaction(self.pool, move |conn| {
            Ok(diesel::update(dsl::job.filter(dsl::state.eq(JobState::Active)))
                .set(dsl::state.eq(JobState::Pending))
                .execute(conn)?)
        })
        .await
    }

    pub async fn list(&self, state: Option<JobState>) -> DbResult<Vec<Job>> {
        readonly_transaction(self.pool, move |conn| {
            let mut query = dsl::job.order_by(dsl::id.asc()).into_boxed();
            if let Some(state) = state {
                query = query.filter(dsl::state.eq(state));
            }
            Ok(query.load::<Job>(conn)?)
        })
        .await
    }
}
