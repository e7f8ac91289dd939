//! Serde helpers for optional secrets: read the plain value, never write it back.

use secrecy::Secret;
use serde::{Deserialize, Deserializer, Serializer};

const REDACTED: &str = "[REDACTED]";

pub fn serialize<S>(secret: &Option<Secret<String>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match secret {
        Some(_) => serializer.serialize_some(REDACTED),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Secret<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.is_empty()).map(Secret::new))
}
