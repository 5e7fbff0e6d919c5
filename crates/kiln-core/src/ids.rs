//! Strongly-typed identifiers for jobs and leases.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier. Time-ordered (UUIDv7) so ids sort roughly by
/// creation, but ordering decisions use the store's sequence, not the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job_{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let uuid_str = s.strip_prefix("job_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(uuid_str)?))
    }
}

/// Credential proving ownership of a job's current lease.
///
/// Minted from random (v4) UUIDs: a token must not be guessable from the
/// job id or from previously issued tokens.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct LeaseToken(Uuid);

impl LeaseToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

// Tokens end up in logs; only a prefix is printed.
impl fmt::Debug for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let simple = self.0.simple().to_string();
        write!(f, "LeaseToken({}…)", &simple[..8])
    }
}

impl fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl std::str::FromStr for LeaseToken {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_display() {
        let id = JobId::new();
        assert!(id.to_string().starts_with("job_"));
    }

    #[test]
    fn test_job_id_parse() {
        let id = JobId::new();
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        let bare: JobId = id.as_uuid().to_string().parse().unwrap();
        assert_eq!(id, bare);
    }

    #[test]
    fn test_tokens_are_distinct() {
        assert_ne!(LeaseToken::generate(), LeaseToken::generate());
    }

    #[test]
    fn test_token_parse() {
        let token = LeaseToken::generate();
        let parsed: LeaseToken = token.to_string().parse().unwrap();
        assert_eq!(token, parsed);
    }

    #[test]
    fn test_token_debug_is_truncated() {
        let token = LeaseToken::generate();
        let debug = format!("{:?}", token);
        assert!(!debug.contains(&token.to_string()));
    }
}
