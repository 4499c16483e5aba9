use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::backend::Backend;
use diesel::deserialize::FromSql;
use diesel::serialize::{Output, ToSql};
use diesel::sql_types::{Text, Timestamp};
use diesel::sqlite::Sqlite;
use diesel::{deserialize, serialize};
use std::io::Write;

pub trait AdaptTimestamp {
    fn adapt(self) -> TimestampAdapter;
}

/// SQLite stores timestamps as text and drops a zero sub-second part, which
/// breaks `<=` comparisons between rows written at different precisions.
/// Every timestamp used in a range filter goes through this adapter, so the
/// stored text always has a fixed microsecond format.
#[derive(Clone, Debug, AsExpression)]
#[sql_type = "Timestamp"]
pub struct TimestampAdapter(pub NaiveDateTime);

impl FromSql<Timestamp, Sqlite> for TimestampAdapter {
    fn from_sql(value: Option<&<Sqlite as Backend>::RawValue>) -> deserialize::Result<Self> {
        Ok(NaiveDateTime::from_sql(value)?.adapt())
    }
}

impl ToSql<Timestamp, Sqlite> for TimestampAdapter {
    fn to_sql<W: Write>(&self, out: &mut Output<W, Sqlite>) -> serialize::Result {
        ToSql::<Text, Sqlite>::to_sql(&self.format(), out)
    }
}

impl TimestampAdapter {
    pub fn format(&self) -> String {
        self.0.format("%F %T.%6f").to_string()
    }
}

impl AdaptTimestamp for NaiveDateTime {
    fn adapt(self) -> TimestampAdapter {
        TimestampAdapter(self)
    }
}

impl AdaptTimestamp for DateTime<Utc> {
    fn adapt(self) -> TimestampAdapter {
        TimestampAdapter(self.naive_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_adapter_keeps_zero_microseconds() {
        let ts = NaiveDate::from_ymd(2026, 10, 19).and_hms(8, 15, 0);
        assert_eq!(ts.adapt().format(), "2026-10-19 08:15:00.000000");
    }
}
