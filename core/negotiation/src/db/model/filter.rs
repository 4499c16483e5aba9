use chrono::{NaiveDateTime, Utc};

use attest_whisper::Topic;

use crate::db::schema::whisper_filters;

/// Locally installed Whisper filter. `keypair_id` is set for direct-message
/// filters, so the keypair can be dropped together with the filter.
#[derive(Clone, Debug, Insertable, Queryable)]
#[table_name = "whisper_filters"]
pub struct WhisperFilter {
    pub filter_id: String,
    pub entity: String,
    pub keypair_id: Option<String>,
    pub topic: String,
    pub created_at: NaiveDateTime,
}

impl WhisperFilter {
    pub fn new(filter_id: String, entity: String, keypair_id: Option<String>, topic: &Topic) -> Self {
        WhisperFilter {
            filter_id,
            entity,
            keypair_id,
            topic: topic.to_string(),
            created_at: Utc::now().naive_utc(),
        }
    }
}
