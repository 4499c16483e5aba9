use chrono::NaiveDateTime;
use diesel::sql_types::Text;

use attest_persistence::types::TimestampAdapter;

use crate::db::schema::job;

#[derive(
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    AsExpression,
    FromSqlRow,
    PartialEq,
    Eq,
    Debug,
    Clone,
    Copy,
)]
#[strum(serialize_all = "kebab-case")]
#[sql_type = "Text"]
pub enum JobState {
    /// Waiting for `run_after`.
    Pending,
    /// Claimed by a worker.
    Active,
    Completed,
    /// Retries exhausted or a non-retryable error.
    Failed,
}

text_field!(JobState);

#[derive(Clone, Debug, Queryable)]
pub struct Job {
    pub id: i32,
    pub task_name: String,
    pub payload: String,
    pub state: JobState,
    pub attempts: i32,
    pub retry_limit: i32,
    pub run_after: NaiveDateTime,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Clone, Debug, Insertable)]
#[table_name = "job"]
pub struct NewJob {
    pub task_name: String,
    pub payload: String,
    pub state: JobState,
    pub attempts: i32,
    pub retry_limit: i32,
    pub run_after: TimestampAdapter,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}
