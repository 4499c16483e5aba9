use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use attest_whisper::Topic;

use crate::crypto::to_topic;

/// Kinds of attestation the marketplace trades. The string name is what
/// gets hashed into a type's broadcast topic, the numeric id is what the
/// attestation contract and job details carry.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::EnumString,
    strum::Display,
    strum::AsRefStr,
    strum::EnumIter,
    AsExpression,
    FromSqlRow,
)]
#[strum(serialize_all = "kebab-case")]
#[serde(rename_all = "kebab-case")]
#[sql_type = "diesel::sql_types::Text"]
pub enum AttestationType {
    Phone,
    Email,
    Facebook,
    SanctionScreen,
    PepScreen,
    IdDocument,
    Google,
    Linkedin,
    Twitter,
    Payroll,
    Ssn,
    Criminal,
    Offense,
    Driving,
    Employment,
    Education,
    Drug,
    Bank,
    Utility,
}

impl AttestationType {
    pub fn id(self) -> i32 {
        match self {
            AttestationType::Phone => 0,
            AttestationType::Email => 1,
            AttestationType::Facebook => 2,
            AttestationType::SanctionScreen => 3,
            AttestationType::PepScreen => 4,
            AttestationType::IdDocument => 5,
            AttestationType::Google => 6,
            AttestationType::Linkedin => 7,
            AttestationType::Twitter => 8,
            AttestationType::Payroll => 9,
            AttestationType::Ssn => 10,
            AttestationType::Criminal => 11,
            AttestationType::Offense => 12,
            AttestationType::Driving => 13,
            AttestationType::Employment => 14,
            AttestationType::Education => 15,
            AttestationType::Drug => 16,
            AttestationType::Bank => 17,
            AttestationType::Utility => 18,
        }
    }

    pub fn from_id(id: i32) -> Option<AttestationType> {
        AttestationType::iter().find(|t| t.id() == id)
    }

    /// Broadcast topic solicitations for this type are posted on.
    pub fn topic(self) -> Topic {
        to_topic(self.as_ref())
    }

    pub fn from_topic(topic: &Topic) -> Option<AttestationType> {
        AttestationType::iter().find(|t| &t.topic() == topic)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_names_are_kebab_case() {
        assert_eq!(AttestationType::SanctionScreen.to_string(), "sanction-screen");
        assert_eq!(
            AttestationType::from_str("id-document").unwrap(),
            AttestationType::IdDocument
        );
        assert!(AttestationType::from_str("IdDocument").is_err());
    }

    #[test]
    fn test_ids_are_unique_and_round_trip() {
        let ids: Vec<i32> = AttestationType::iter().map(AttestationType::id).collect();
        assert_eq!(ids, (0..19).collect::<Vec<_>>());
        assert_eq!(AttestationType::from_id(17), Some(AttestationType::Bank));
        assert_eq!(AttestationType::from_id(19), None);
    }

    #[test]
    fn test_type_is_derived_from_its_topic() {
        for t in AttestationType::iter() {
            assert_eq!(AttestationType::from_topic(&t.topic()), Some(t));
        }
        assert_eq!(AttestationType::from_topic(&to_topic("ping")), None);
    }
}
