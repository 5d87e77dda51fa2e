//! Account service seam.
//!
//! Account management (creation, avatars, notification preferences) lives
//! outside this crate. The relay only needs two things from it: existence
//! checks for identities, and a capability check for mutating operations
//! on the HTTP surface. Both are injected, never global.

use async_trait::async_trait;
use courier_types::UserId;
use dashmap::DashMap;

/// Interface to the external account layer.
#[async_trait]
pub trait AccountService: Send + Sync {
    /// Whether `identity` refers to an existing account.
    ///
    /// The relay does not gate sends on this: messages may target unknown
    /// identities and simply never be delivered. Integrators that want
    /// stricter behavior can consult it themselves.
    async fn account_exists(&self, identity: &UserId) -> bool;

    /// Capability check for mutating operations performed on behalf of
    /// `identity` (message deletion, account-deletion cascade).
    async fn verify_credential(&self, identity: &UserId, credential: &str) -> bool;
}

/// Stand-in account service that accepts everything.
///
/// Used when the relay runs without a real account layer. Not an
/// authentication mechanism; see the deployment notes.
#[derive(Debug, Default)]
pub struct AllowAll;

#[async_trait]
impl AccountService for AllowAll {
    async fn account_exists(&self, _identity: &UserId) -> bool {
        true
    }

    async fn verify_credential(&self, _identity: &UserId, _credential: &str) -> bool {
        true
    }
}

/// In-memory identity → credential map.
///
/// Mirrors the shape of a real account backend closely enough for tests
/// and small deployments: a credential is valid only if it matches the
/// one registered for that exact identity.
#[derive(Debug, Default)]
pub struct StaticAccounts {
    credentials: DashMap<UserId, String>,
}

impl StaticAccounts {
    /// Create an empty account set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an identity with its credential, replacing any prior one.
    pub fn insert(&self, identity: UserId, credential: impl Into<String>) {
        self.credentials.insert(identity, credential.into());
    }

    /// Remove an identity.
    pub fn remove(&self, identity: &UserId) {
        self.credentials.remove(identity);
    }
}

#[async_trait]
impl AccountService for StaticAccounts {
    async fn account_exists(&self, identity: &UserId) -> bool {
        self.credentials.contains_key(identity)
    }

    async fn verify_credential(&self, identity: &UserId, credential: &str) -> bool {
        self.credentials
            .get(identity)
            .is_some_and(|stored| stored.value() == credential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_accepts_anything() {
        let accounts = AllowAll;
        assert!(accounts.account_exists(&UserId::new("anyone")).await);
        assert!(accounts.verify_credential(&UserId::new("anyone"), "").await);
    }

    #[tokio::test]
    async fn static_accounts_match_exact_credential() {
        let accounts = StaticAccounts::new();
        let alice = UserId::new("alice");
        accounts.insert(alice.clone(), "install-123");

        assert!(accounts.account_exists(&alice).await);
        assert!(accounts.verify_credential(&alice, "install-123").await);
        assert!(!accounts.verify_credential(&alice, "wrong").await);
        assert!(!accounts.verify_credential(&UserId::new("bob"), "install-123").await);
    }

    #[tokio::test]
    async fn removed_account_no_longer_verifies() {
        let accounts = StaticAccounts::new();
        let alice = UserId::new("alice");
        accounts.insert(alice.clone(), "cred");
        accounts.remove(&alice);

        assert!(!accounts.account_exists(&alice).await);
        assert!(!accounts.verify_credential(&alice, "cred").await);
    }
}
