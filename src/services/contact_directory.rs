use std::collections::HashSet;
use std::sync::RwLock;

use crate::error::AppResult;

/// Read-only view of the contact directory used for consistency checks.
pub trait ContactDirectory: Send + Sync {
    fn contact_exists(&self, contact_id: &str) -> AppResult<bool>;
}

#[derive(Debug, Default)]
pub struct StaticContactDirectory {
    contacts: RwLock<HashSet<String>>,
}

impl StaticContactDirectory {
    pub fn new<I, S>(contacts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            contacts: RwLock::new(contacts.into_iter().map(Into::into).collect()),
        }
    }

    pub fn insert(&self, contact_id: impl Into<String>) {
        if let Ok(mut guard) = self.contacts.write() {
            guard.insert(contact_id.into());
        }
    }

    pub fn remove(&self, contact_id: &str) {
        if let Ok(mut guard) = self.contacts.write() {
            guard.remove(contact_id);
        }
    }
}

impl ContactDirectory for StaticContactDirectory {
    fn contact_exists(&self, contact_id: &str) -> AppResult<bool> {
        Ok(self
            .contacts
            .read()
            .map(|guard| guard.contains(contact_id))
            .unwrap_or(false))
    }
}
