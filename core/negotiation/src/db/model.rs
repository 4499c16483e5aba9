/// Stores a strum-backed enum as its string name.
macro_rules! text_field {
    ($t:ty) => {
        impl<DB> diesel::serialize::ToSql<diesel::sql_types::Text, DB> for $t
        where
            DB: diesel::backend::Backend,
            str: diesel::serialize::ToSql<diesel::sql_types::Text, DB>,
        {
            fn to_sql<W: std::io::Write>(
                &self,
                out: &mut diesel::serialize::Output<W, DB>,
            ) -> diesel::serialize::Result {
                let name: &str = self.as_ref();
                diesel::serialize::ToSql::<diesel::sql_types::Text, DB>::to_sql(name, out)
            }
        }

        impl<DB> diesel::deserialize::FromSql<diesel::sql_types::Text, DB> for $t
        where
            DB: diesel::backend::Backend,
            String: diesel::deserialize::FromSql<diesel::sql_types::Text, DB>,
        {
            fn from_sql(bytes: Option<&DB::RawValue>) -> diesel::deserialize::Result<Self> {
                let name = <String as diesel::deserialize::FromSql<diesel::sql_types::Text, DB>>::from_sql(
                    bytes,
                )?;
                Ok(name.parse::<$t>()?)
            }
        }
    };
}

mod attestation;
mod filter;
mod job;
mod negotiation;
mod records;

pub use attestation::{Attestation, AttestationRole, AttestationStatus};
pub use filter::WhisperFilter;
pub use job::{Job, JobState, NewJob};
pub use negotiation::{MessageType, Negotiation, NegotiationMsg};
pub use records::{
    JobDetailsFields, PersistRecord, StoreAttestationBid, StoreAwaitSubjectData, StoreJobDetails,
    StorePaymentAuthorization, StoreSolicitation, StoreStartAttestation,
};

text_field!(crate::protocol::AttestationType);
