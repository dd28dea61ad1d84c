use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::error::TenantError;

/// Opaque tenant identifier. Either a UUID or a positive integer,
/// depending on how the deployment numbers its tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TenantId {
    Uuid(Uuid),
    Int(i64),
}

/// Which identifier shapes the resolver accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdFormat {
    Uuid,
    Integer,
    Any,
}

impl FromStr for IdFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "uuid" => Ok(IdFormat::Uuid),
            "integer" | "int" => Ok(IdFormat::Integer),
            "any" => Ok(IdFormat::Any),
            other => Err(format!("unknown tenant id format '{}'", other)),
        }
    }
}

impl TenantId {
    /// Parse a raw identifier according to the accepted format.
    /// Leading and trailing whitespace is ignored.
    pub fn parse(raw: &str, format: IdFormat) -> Result<Self, TenantError> {
        let value = raw.trim();
        let invalid = || TenantError::InvalidTenantIdentifier(value.to_string());

        match format {
            IdFormat::Uuid => Self::parse_uuid(value).ok_or_else(invalid),
            IdFormat::Integer => Self::parse_int(value).ok_or_else(invalid),
            IdFormat::Any => Self::parse_int(value)
                .or_else(|| Self::parse_uuid(value))
                .ok_or_else(invalid),
        }
    }

    /// Same as [`TenantId::parse`] for integer claims that arrive as JSON numbers
    pub fn from_int(value: i64, format: IdFormat) -> Result<Self, TenantError> {
        match format {
            IdFormat::Uuid => Err(TenantError::InvalidTenantIdentifier(value.to_string())),
            IdFormat::Integer | IdFormat::Any if value > 0 => Ok(TenantId::Int(value)),
            _ => Err(TenantError::InvalidTenantIdentifier(value.to_string())),
        }
    }

    fn parse_uuid(value: &str) -> Option<Self> {
        Uuid::parse_str(value)
            .ok()
            .filter(|u| !u.is_nil())
            .map(TenantId::Uuid)
    }

    fn parse_int(value: &str) -> Option<Self> {
        // Reject "+5" and "007" style spellings so one tenant has one textual form
        if value.is_empty() || value.starts_with('0') || !value.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        value.parse::<i64>().ok().filter(|n| *n > 0).map(TenantId::Int)
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TenantId::Uuid(u) => write!(f, "{}", u.hyphenated()),
            TenantId::Int(n) => write!(f, "{}", n),
        }
    }
}

impl FromStr for TenantId {
    type Err = TenantError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TenantId::parse(s, IdFormat::Any)
    }
}

impl From<Uuid> for TenantId {
    fn from(value: Uuid) -> Self {
        TenantId::Uuid(value)
    }
}

impl Serialize for TenantId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TenantId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integers_and_uuids_in_any_mode() {
        assert_eq!(TenantId::parse("42", IdFormat::Any).unwrap(), TenantId::Int(42));

        let u = Uuid::new_v4();
        assert_eq!(
            TenantId::parse(&u.to_string(), IdFormat::Any).unwrap(),
            TenantId::Uuid(u)
        );
    }

    #[test]
    fn respects_configured_format() {
        assert!(TenantId::parse("42", IdFormat::Uuid).is_err());
        assert!(TenantId::parse(&Uuid::new_v4().to_string(), IdFormat::Integer).is_err());
    }

    #[test]
    fn rejects_malformed_values() {
        for raw in ["", "   ", "0", "-3", "+7", "007", "T1", "tenant", "1.5"] {
            assert!(
                TenantId::parse(raw, IdFormat::Any).is_err(),
                "expected {:?} to be rejected",
                raw
            );
        }
        assert!(TenantId::parse(&Uuid::nil().to_string(), IdFormat::Any).is_err());
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(TenantId::parse("  17 ", IdFormat::Integer).unwrap(), TenantId::Int(17));
    }

    #[test]
    fn integer_claims_follow_format() {
        assert_eq!(TenantId::from_int(9, IdFormat::Any).unwrap(), TenantId::Int(9));
        assert!(TenantId::from_int(9, IdFormat::Uuid).is_err());
        assert!(TenantId::from_int(0, IdFormat::Integer).is_err());
    }

    #[test]
    fn serializes_as_string() {
        let json = serde_json::to_value(TenantId::Int(5)).unwrap();
        assert_eq!(json, serde_json::json!("5"));
        let back: TenantId = serde_json::from_value(json).unwrap();
        assert_eq!(back, TenantId::Int(5));
    }
}
