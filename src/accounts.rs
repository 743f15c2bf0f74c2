//! L8: the Account Registry. A multi-account credential store, with one
//! account "active" at a time. Tokens are injected into outbound requests
//! at the exact moment a request is prepared, never stored on the HTTP
//! Fetcher, and never logged.

use std::sync::Mutex;

use dashmap::DashMap;

use crate::error::{Error, Result};
pub use crate::models::Account;

pub struct AccountRegistry {
    accounts: DashMap<String, Account>,
    active: Mutex<Option<String>>,
}

impl AccountRegistry {
    pub fn new(accounts: Vec<Account>, active_id: Option<String>) -> Self {
        let table = DashMap::new();
        for account in accounts {
            table.insert(account.id.clone(), account);
        }
        AccountRegistry {
            accounts: table,
            active: Mutex::new(active_id),
        }
    }

    pub fn list_accounts(&self) -> Vec<Account> {
        self.accounts.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get(&self, id: &str) -> Option<Account> {
        self.accounts.get(id).map(|e| e.value().clone())
    }

    pub fn get_active(&self) -> Option<Account> {
        let active = self.active.lock().unwrap().clone()?;
        self.get(&active)
    }

    pub fn set_active(&self, id: &str) -> Result<()> {
        if !self.accounts.contains_key(id) {
            return Err(Error::UnknownAccount {
                account_id: id.to_string(),
            });
        }
        *self.active.lock().unwrap() = Some(id.to_string());
        Ok(())
    }

    /// Resolve the account to use for a write operation: the explicit
    /// `account_id` if given, else the active account. Fails
    /// `WriteNotEnabled` if neither is available.
    pub fn resolve_for_write(&self, account_id: Option<&str>) -> Result<Account> {
        match account_id {
            Some(id) => self.get(id).ok_or_else(|| Error::UnknownAccount {
                account_id: id.to_string(),
            }),
            None => self.get_active().ok_or(Error::WriteNotEnabled),
        }
    }

    /// Build the `Authorization: Bearer ...` header value for `account`,
    /// at the exact point of use so the token never lives anywhere but the
    /// outgoing request.
    pub fn bearer_header(account: &Account) -> http::HeaderValue {
        let mut value = http::HeaderValue::from_str(&format!("Bearer {}", account.token))
            .expect("bearer header value is always valid ASCII");
        value.set_sensitive(true);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(id: &str, token: &str) -> Account {
        Account {
            id: id.to_string(),
            instance: "example.test".to_string(),
            token: token.to_string(),
            username: None,
            scopes: vec![],
        }
    }

    #[test]
    fn set_active_then_get_active_round_trips() {
        let registry = AccountRegistry::new(vec![account("a", "T1"), account("b", "T2")], None);
        registry.set_active("b").unwrap();
        assert_eq!(registry.get_active().unwrap().id, "b");
    }

    #[test]
    fn set_active_rejects_unknown_account() {
        let registry = AccountRegistry::new(vec![account("a", "T1")], None);
        assert!(registry.set_active("missing").is_err());
    }

    #[test]
    fn resolve_for_write_prefers_explicit_account() {
        let registry = AccountRegistry::new(
            vec![account("a", "T1"), account("b", "T2")],
            Some("a".to_string()),
        );
        let resolved = registry.resolve_for_write(Some("b")).unwrap();
        assert_eq!(resolved.id, "b");
        // active account is untouched
        assert_eq!(registry.get_active().unwrap().id, "a");
    }

    #[test]
    fn resolve_for_write_fails_when_nothing_configured() {
        let registry = AccountRegistry::new(vec![], None);
        assert!(matches!(
            registry.resolve_for_write(None),
            Err(Error::WriteNotEnabled)
        ));
    }

    #[test]
    fn bearer_header_is_marked_sensitive() {
        let header = AccountRegistry::bearer_header(&account("a", "secret-token"));
        assert!(header.is_sensitive());
        assert_eq!(header.to_str().unwrap(), "Bearer secret-token");
    }
}
