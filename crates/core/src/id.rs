//! Strongly-typed identifiers.

use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Prefix marking a division (tenant) subject in policy tuples.
pub const DIVISION_PREFIX: &str = "div:";

/// Identifier of a user account.
///
/// Users live in the relational store, which assigns sequential keys.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(u64);

impl UserId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for UserId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u64>()
            .map(Self)
            .map_err(|e| DomainError::invalid_id(format!("UserId: {e}")))
    }
}

/// Identifier of a division (the tenant a policy subject stands for).
///
/// Subjects are opaque to the policy layer; this type only guarantees the
/// canonical `div:<name>` rendering.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DivisionId(String);

impl DivisionId {
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DomainError::invalid_id("DivisionId: empty name"));
        }
        if name.starts_with(DIVISION_PREFIX) {
            return Err(DomainError::invalid_id(format!(
                "DivisionId: '{name}' is already prefixed"
            )));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The policy-tuple subject for this division.
    pub fn prefixed(&self) -> String {
        format!("{DIVISION_PREFIX}{}", self.0)
    }

    /// Parse a prefixed subject back into a division id.
    pub fn from_prefixed(subject: &str) -> Result<Self, DomainError> {
        let name = subject.strip_prefix(DIVISION_PREFIX).ok_or_else(|| {
            DomainError::invalid_id(format!("DivisionId: '{subject}' lacks '{DIVISION_PREFIX}'"))
        })?;
        Self::new(name)
    }
}

impl core::fmt::Display for DivisionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn division_prefix_round_trips() {
        let div = DivisionId::new("sales").unwrap();
        assert_eq!(div.prefixed(), "div:sales");
        assert_eq!(DivisionId::from_prefixed("div:sales").unwrap(), div);
    }

    #[test]
    fn division_rejects_empty_and_double_prefix() {
        assert!(DivisionId::new("  ").is_err());
        assert!(DivisionId::new("div:sales").is_err());
        assert!(DivisionId::from_prefixed("sales").is_err());
    }

    #[test]
    fn user_id_parses() {
        assert_eq!("42".parse::<UserId>().unwrap(), UserId::new(42));
        assert!(matches!("x".parse::<UserId>(), Err(DomainError::InvalidId(_))));
    }
}
