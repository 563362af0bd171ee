//! Per-file access control.
//!
//! Each file carries a set of allow/deny entries keyed by subject, where the
//! wildcard subject applies to every requester. Entries are evaluated as one
//! set and any matching deny wins over matching allows.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who an [`AclEntry`] applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum AclSubject {
    /// Every requester.
    Everyone,
    /// One specific user.
    User(Uuid),
}

impl AclSubject {
    /// Map a stored subject id back to a subject. The nil UUID is the wildcard.
    #[must_use]
    pub fn from_stored(id: Uuid) -> Self {
        if id.is_nil() {
            Self::Everyone
        } else {
            Self::User(id)
        }
    }

    /// Subject id as stored in `file_acl.subject_id`.
    #[must_use]
    pub const fn stored_id(self) -> Uuid {
        match self {
            Self::Everyone => Uuid::nil(),
            Self::User(id) => id,
        }
    }

    fn matches(self, requester: Uuid) -> bool {
        match self {
            Self::Everyone => true,
            Self::User(id) => id == requester,
        }
    }
}

/// A single allow/deny rule for a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclEntry {
    pub subject: AclSubject,
    pub allow: bool,
}

impl AclEntry {
    #[must_use]
    pub const fn allow(subject: AclSubject) -> Self {
        Self {
            subject,
            allow: true,
        }
    }

    #[must_use]
    pub const fn deny(subject: AclSubject) -> Self {
        Self {
            subject,
            allow: false,
        }
    }
}

/// Outcome of evaluating a file's ACL for one requester.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allowed,
    Denied,
    /// The file has no entries at all. The caller's default applies.
    Unrestricted,
}

impl Access {
    /// Collapse to a boolean using the caller's default for unrestricted files.
    #[must_use]
    pub const fn is_allowed(self, public_by_default: bool) -> bool {
        match self {
            Self::Allowed => true,
            Self::Denied => false,
            Self::Unrestricted => public_by_default,
        }
    }
}

/// Evaluate `entries` for `requester`.
///
/// Resolution order:
/// 1. No entries at all: [`Access::Unrestricted`]
/// 2. Any matching deny (wildcard or the requester): [`Access::Denied`]
/// 3. At least one matching allow: [`Access::Allowed`]
/// 4. Nothing matches: [`Access::Denied`]
pub fn evaluate(entries: &[AclEntry], requester: Uuid) -> Access {
    if entries.is_empty() {
        return Access::Unrestricted;
    }

    let mut allowed = false;
    for entry in entries.iter().filter(|e| e.subject.matches(requester)) {
        if !entry.allow {
            return Access::Denied;
        }
        allowed = true;
    }

    if allowed {
        Access::Allowed
    } else {
        Access::Denied
    }
}

/// Collapse duplicate subjects into one entry each. A deny for a subject wins
/// over an allow for the same subject.
pub fn normalize(entries: &[AclEntry]) -> Vec<AclEntry> {
    let mut out: Vec<AclEntry> = Vec::with_capacity(entries.len());
    for entry in entries {
        match out.iter_mut().find(|e| e.subject == entry.subject) {
            Some(existing) => existing.allow &= entry.allow,
            None => out.push(*entry),
        }
    }
    out
}

impl From<Uuid> for AclSubject {
    fn from(id: Uuid) -> Self {
        Self::from_stored(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_deny_overrides_user_allow() {
        let u1 = Uuid::now_v7();
        let entries = [
            AclEntry::deny(AclSubject::Everyone),
            AclEntry::allow(AclSubject::User(u1)),
        ];
        assert_eq!(evaluate(&entries, u1), Access::Denied);
    }

    #[test]
    fn test_user_deny_overrides_wildcard_allow() {
        let u1 = Uuid::now_v7();
        let u2 = Uuid::now_v7();
        let entries = [
            AclEntry::allow(AclSubject::Everyone),
            AclEntry::deny(AclSubject::User(u1)),
        ];
        assert_eq!(evaluate(&entries, u1), Access::Denied);
        assert_eq!(evaluate(&entries, u2), Access::Allowed);
    }

    #[test]
    fn test_order_does_not_matter() {
        let u1 = Uuid::now_v7();
        let a = [
            AclEntry::allow(AclSubject::User(u1)),
            AclEntry::deny(AclSubject::Everyone),
        ];
        let b = [
            AclEntry::deny(AclSubject::Everyone),
            AclEntry::allow(AclSubject::User(u1)),
        ];
        assert_eq!(evaluate(&a, u1), evaluate(&b, u1));
    }

    #[test]
    fn test_only_listed_users_allowed() {
        let u1 = Uuid::now_v7();
        let u2 = Uuid::now_v7();
        let entries = [AclEntry::allow(AclSubject::User(u1))];
        assert_eq!(evaluate(&entries, u1), Access::Allowed);
        assert_eq!(evaluate(&entries, u2), Access::Denied);
    }

    #[test]
    fn test_empty_acl_is_unrestricted() {
        let access = evaluate(&[], Uuid::now_v7());
        assert_eq!(access, Access::Unrestricted);
        assert!(access.is_allowed(true));
        assert!(!access.is_allowed(false));
    }

    #[test]
    fn test_nil_requester_only_matches_wildcard() {
        let entries = [AclEntry::allow(AclSubject::User(Uuid::now_v7()))];
        assert_eq!(evaluate(&entries, Uuid::nil()), Access::Denied);
    }

    #[test]
    fn test_normalize_keeps_deny() {
        let u1 = Uuid::now_v7();
        let entries = [
            AclEntry::allow(AclSubject::User(u1)),
            AclEntry::allow(AclSubject::Everyone),
            AclEntry::deny(AclSubject::User(u1)),
        ];
        let normalized = normalize(&entries);
        assert_eq!(normalized.len(), 2);
        assert_eq!(normalized[0], AclEntry::deny(AclSubject::User(u1)));
        assert_eq!(normalized[1], AclEntry::allow(AclSubject::Everyone));
    }

    #[test]
    fn test_stored_id_round_trip() {
        let u1 = Uuid::now_v7();
        assert_eq!(AclSubject::from(Uuid::nil()), AclSubject::Everyone);
        assert_eq!(AclSubject::Everyone.stored_id(), Uuid::nil());
        assert_eq!(AclSubject::from(u1), AclSubject::User(u1));
    }
}
