//! Authority primitives.
//!
//! Principal, Grant and RevocationEvent. Authority is data plus
//! enforcement: none of these records carries behavior, and a Grant can
//! only be minted by the authority guard — construction is crate-private
//! and a grant is impotent until the store has accepted it.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Longest accepted principal identifier.
pub const MAX_PRINCIPAL_ID_LEN: usize = 256;

/// An explicit actor identifier. No hierarchy, no implicit relationships.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Principal {
    principal_id: String,
}

impl Principal {
    pub fn new(principal_id: impl Into<String>) -> Result<Self, ValidationError> {
        let principal_id = principal_id.into();
        if principal_id.is_empty() {
            return Err(ValidationError::Principal(
                "principal_id is required".to_string(),
            ));
        }
        if principal_id.len() > MAX_PRINCIPAL_ID_LEN {
            return Err(ValidationError::Principal(format!(
                "principal_id too long (max {} chars): {}",
                MAX_PRINCIPAL_ID_LEN,
                principal_id.len()
            )));
        }
        Ok(Self { principal_id })
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }
}

/// Reason for revocation. Wire strings are load-bearing for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    ExplicitRevocation,
    SecurityViolation,
    PrincipalCompromised,
    GrantLeak,
    TimeLimitExceeded,
}

impl RevocationReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RevocationReason::ExplicitRevocation => "explicit_revocation",
            RevocationReason::SecurityViolation => "security_violation",
            RevocationReason::PrincipalCompromised => "principal_compromised",
            RevocationReason::GrantLeak => "grant_leak",
            RevocationReason::TimeLimitExceeded => "time_limit_exceeded",
        }
    }
}

/// Time-bound, principal-bound, use-bounded authorization for a capability.
///
/// Immutable once issued. Use counting lives in the authority store, not in
/// the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grant {
    grant_id: String,
    principal_id: String,
    capability_name: String,
    scope: String,
    /// Monotonic ns.
    issued_at: u64,
    /// Monotonic ns. Equal to `issued_at` only for born-expired grants.
    expires_at: u64,
    max_uses: Option<u32>,
    revocable: bool,
}

impl Grant {
    pub(crate) fn new(
        grant_id: impl Into<String>,
        principal_id: impl Into<String>,
        capability_name: impl Into<String>,
        scope: impl Into<String>,
        issued_at: u64,
        expires_at: u64,
        max_uses: Option<u32>,
        revocable: bool,
    ) -> Result<Self, ValidationError> {
        let grant = Self {
            grant_id: grant_id.into(),
            principal_id: principal_id.into(),
            capability_name: capability_name.into(),
            scope: scope.into(),
            issued_at,
            expires_at,
            max_uses,
            revocable,
        };
        if grant.grant_id.is_empty() {
            return Err(ValidationError::Grant("grant_id is required".to_string()));
        }
        if grant.principal_id.is_empty() {
            return Err(ValidationError::Grant("principal_id is required".to_string()));
        }
        if grant.capability_name.is_empty() {
            return Err(ValidationError::Grant(
                "capability_name is required".to_string(),
            ));
        }
        if grant.scope.is_empty() {
            return Err(ValidationError::Grant("scope is required".to_string()));
        }
        if grant.expires_at < grant.issued_at {
            return Err(ValidationError::Grant(format!(
                "issued_at ({}) must not be after expires_at ({})",
                grant.issued_at, grant.expires_at
            )));
        }
        if grant.max_uses == Some(0) {
            return Err(ValidationError::Grant("max_uses must be > 0".to_string()));
        }
        Ok(grant)
    }

    pub fn grant_id(&self) -> &str {
        &self.grant_id
    }

    pub fn principal_id(&self) -> &str {
        &self.principal_id
    }

    pub fn capability_name(&self) -> &str {
        &self.capability_name
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn issued_at(&self) -> u64 {
        self.issued_at
    }

    pub fn expires_at(&self) -> u64 {
        self.expires_at
    }

    pub fn max_uses(&self) -> Option<u32> {
        self.max_uses
    }

    pub fn revocable(&self) -> bool {
        self.revocable
    }

    pub fn is_expired(&self, now_ns: u64) -> bool {
        now_ns >= self.expires_at
    }
}

/// Terminal revocation record. Once present for a grant_id, that grant is
/// dead forever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationEvent {
    pub grant_id: String,
    pub revoked_by_principal: String,
    pub reason: RevocationReason,
    /// Monotonic ns.
    pub revoked_at: u64,
}

impl RevocationEvent {
    pub(crate) fn new(
        grant_id: impl Into<String>,
        revoked_by_principal: impl Into<String>,
        reason: RevocationReason,
        revoked_at: u64,
    ) -> Result<Self, ValidationError> {
        let event = Self {
            grant_id: grant_id.into(),
            revoked_by_principal: revoked_by_principal.into(),
            reason,
            revoked_at,
        };
        if event.grant_id.is_empty() {
            return Err(ValidationError::Revocation("grant_id is required".to_string()));
        }
        if event.revoked_by_principal.is_empty() {
            return Err(ValidationError::Revocation(
                "revoked_by_principal is required".to_string(),
            ));
        }
        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_id_bounds() {
        assert!(Principal::new("").is_err());
        assert!(Principal::new("a".repeat(257)).is_err());
        assert!(Principal::new("a".repeat(256)).is_ok());
    }

    #[test]
    fn revocation_reason_strings_are_bit_exact() {
        assert_eq!(
            RevocationReason::ExplicitRevocation.as_str(),
            "explicit_revocation"
        );
        assert_eq!(
            RevocationReason::PrincipalCompromised.as_str(),
            "principal_compromised"
        );
        assert_eq!(RevocationReason::GrantLeak.as_str(), "grant_leak");
    }

    #[test]
    fn grant_rejects_zero_max_uses() {
        let err = Grant::new("g1", "p1", "cap", "scope", 0, 100, Some(0), true).unwrap_err();
        assert!(matches!(err, ValidationError::Grant(_)));
    }

    #[test]
    fn grant_rejects_expiry_before_issue() {
        let err = Grant::new("g1", "p1", "cap", "scope", 100, 50, None, true).unwrap_err();
        assert!(matches!(err, ValidationError::Grant(_)));
    }

    #[test]
    fn born_expired_grant_is_constructible() {
        // A zero TTL yields issued_at == expires_at: valid record, already
        // expired at any now >= issued_at.
        let grant = Grant::new("g1", "p1", "cap", "scope", 100, 100, None, true).unwrap();
        assert!(grant.is_expired(100));
        assert!(grant.is_expired(101));
    }
}
