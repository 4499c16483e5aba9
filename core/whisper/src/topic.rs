use serde::{Deserialize, Serialize};
use std::convert::TryFrom;
use std::fmt;
use std::str::FromStr;

/// 4-byte Whisper topic, rendered as `0x` followed by 8 lower-case hex digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Topic([u8; 4]);

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("Invalid topic '{0}'. Expected 0x followed by 8 hex digits.")]
pub struct TopicParseError(pub String);

impl Topic {
    pub fn from_bytes(bytes: [u8; 4]) -> Self {
        Topic(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for Topic {
    type Err = TopicParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix("0x")
            .ok_or_else(|| TopicParseError(s.to_string()))?;
        let bytes = hex::decode(digits).map_err(|_| TopicParseError(s.to_string()))?;
        let bytes = <[u8; 4]>::try_from(bytes.as_slice()).map_err(|_| TopicParseError(s.to_string()))?;
        Ok(Topic(bytes))
    }
}

impl TryFrom<String> for Topic {
    type Error = TopicParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Topic::from_str(&value)
    }
}

impl From<Topic> for String {
    fn from(topic: Topic) -> Self {
        topic.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_topic_display_is_ten_characters() {
        let topic = Topic::from_bytes([0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(topic.to_string(), "0xdeadbeef");
        assert_eq!(topic.to_string().len(), 10);
    }

    #[test]
    fn test_topic_parse_accepts_mixed_case() {
        let topic: Topic = "0xDEADbeef".parse().unwrap();
        assert_eq!(topic.as_bytes(), &[0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_topic_parse_rejects_wrong_length() {
        assert!("0xdeadbe".parse::<Topic>().is_err());
        assert!("deadbeef".parse::<Topic>().is_err());
        assert!("0xdeadbeef00".parse::<Topic>().is_err());
    }
}
