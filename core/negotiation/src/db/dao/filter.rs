use diesel::{ExpressionMethods, QueryDsl, RunQueryDsl};

use attest_persistence::executor::{do_with_transaction, readonly_transaction, AsDao, PoolType};
use attest_whisper::Topic;

use crate::db::model::WhisperFilter;
use crate::db::schema::whisper_filters::dsl;
use crate::db::DbResult;

pub struct FilterDao<'c> {
    pool: &'c PoolType,
}

impl<'a> AsDao<'a> for FilterDao<'a> {
    fn as_dao(pool: &'a PoolType) -> Self {
        Self { pool }
    }
}

impl<'c> FilterDao<'c> {
    pub async fn insert(&self, filter: WhisperFilter) -> DbResult<()> {
        do_with_transaction(self.pool, move |conn| {
            diesel::insert_into(dsl::whisper_filters)
                .values(&filter)
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    pub async fn find(&self, topic: &Topic, entity: &str) -> DbResult<Vec<WhisperFilter>> {
        let topic = topic.to_string();
        let entity = entity.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::whisper_filters
                .filter(dsl::topic.eq(topic))
                .filter(dsl::entity.eq(entity))
                .load::<WhisperFilter>(conn)?)
        })
        .await
    }

    pub async fn list_for_entity(&self, entity: &str) -> DbResult<Vec<WhisperFilter>> {
        let entity = entity.to_string();
        readonly_transaction(self.pool, move |conn| {
            Ok(dsl::whisper_filters
                .filter(dsl::entity.eq(entity))
                .order_by(dsl::created_at.asc())
                .load::<WhisperFilter>(conn)?)
        })
        .await
    }

    pub async fn delete(&self, filter_id: &str) -> DbResult<usize> {
        let filter_id = filter_id.to_string();
        do_with_transaction(self.pool, move |conn| {
            Ok(diesel::delete(dsl::whisper_filters.filter(dsl::filter_id.eq(filter_id)))
                .execute(conn)?)
        })
        .await
    }
}
