use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::protocol::AttestationType;

lazy_static! {
    static ref PHONE: Regex = Regex::new(r"^\+?[0-9]{7,15}$").unwrap();
    static ref EMAIL: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    static ref DATE: Regex = Regex::new(r"^[0-9]{4}-[0-9]{2}-[0-9]{2}$").unwrap();
}

/// Checks subject data against the attestation types it is meant for.
///
/// With a single type id the data may be the bare value, otherwise it must
/// be an array with one entry per type id, in the same order.
pub fn validate_subject_data(data: &Value, type_ids: &[i32]) -> Result<(), String> {
    if type_ids.is_empty() {
        return Err("no attestation type ids".to_string());
    }
    let types = type_ids
        .iter()
        .map(|id| AttestationType::from_id(*id).ok_or_else(|| format!("unknown type id {}", id)))
        .collect::<Result<Vec<_>, _>>()?;

    let entries: Vec<&Value> = match data {
        Value::Array(items) => items.iter().collect(),
        single if types.len() == 1 => vec![single],
        _ => return Err(format!("expected an array of {} entries", types.len())),
    };
    if entries.len() != types.len() {
        return Err(format!(
            "{} data entries for {} type ids",
            entries.len(),
            types.len()
        ));
    }

    let errors: Vec<String> = types
        .iter()
        .zip(entries)
        .filter_map(|(t, entry)| validate_entry(*t, entry).err().map(|e| format!("{}: {}", t, e)))
        .collect();
    match errors.is_empty() {
        true => Ok(()),
        false => Err(errors.join(", ")),
    }
}

fn non_empty_str<'a>(value: &'a Value, field: &str) -> Result<&'a str, String> {
    match value.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s),
        _ => Err(format!("missing '{}'", field)),
    }
}

fn validate_entry(attestation_type: AttestationType, value: &Value) -> Result<(), String> {
    match attestation_type {
        AttestationType::Phone => {
            let phone: String = value
                .as_str()
                .ok_or("expected a string")?
                .chars()
                .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
                .collect();
            match PHONE.is_match(&phone) {
                true => Ok(()),
                false => Err("not a phone number".to_string()),
            }
        }
        AttestationType::Email => match value.as_str().map(|s| EMAIL.is_match(s)) {
            Some(true) => Ok(()),
            _ => Err("not an email address".to_string()),
        },
        AttestationType::SanctionScreen | AttestationType::PepScreen => {
            non_empty_str(value, "firstname")?;
            non_empty_str(value, "lastname")?;
            match DATE.is_match(non_empty_str(value, "birthdate")?) {
                true => Ok(()),
                false => Err("birthdate is not YYYY-MM-DD".to_string()),
            }
        }
        AttestationType::IdDocument => {
            non_empty_str(value, "country")?;
            non_empty_str(value, "document_type")?;
            Ok(())
        }
        AttestationType::Facebook
        | AttestationType::Google
        | AttestationType::Linkedin
        | AttestationType::Twitter => non_empty_str(value, "id").map(|_| ()),
        _ => match value {
            Value::String(s) if !s.trim().is_empty() => Ok(()),
            Value::Object(map) if !map.is_empty() => Ok(()),
            _ => Err("expected a non-empty string or object".to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_single_phone_value() {
        assert!(validate_subject_data(&json!("+1 (555) 123-4567"), &[0]).is_ok());
        assert!(validate_subject_data(&json!("call me"), &[0]).is_err());
    }

    #[test]
    fn test_entries_must_align_with_type_ids() {
        let data = json!(["alice@example.com", "+15551234567"]);
        assert!(validate_subject_data(&data, &[1, 0]).is_ok());
        assert!(validate_subject_data(&data, &[0, 1]).is_err());
        assert!(validate_subject_data(&data, &[1]).is_err());
    }

    #[test]
    fn test_screening_requires_name_and_birthdate() {
        let ok = json!({"firstname": "Ada", "lastname": "Lovelace", "birthdate": "1815-12-10"});
        let bad = json!({"firstname": "Ada", "birthdate": "10/12/1815"});
        assert!(validate_subject_data(&ok, &[3]).is_ok());
        let error = validate_subject_data(&bad, &[4]).unwrap_err();
        assert!(error.contains("pep-screen"));
    }

    #[test]
    fn test_unknown_or_missing_type_ids() {
        assert!(validate_subject_data(&json!("x"), &[]).is_err());
        assert!(validate_subject_data(&json!("x"), &[42]).is_err());
    }
}
