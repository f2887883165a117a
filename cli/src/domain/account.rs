use std::fmt;

use testbay_common::AccountEntry;

use crate::domain::pool::Reservable;

/// A test account checked out of the account pool for one role instance.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub username: String,
    pub credential: String,
}

impl Account {
    #[must_use]
    pub fn new(username: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            credential: credential.into(),
        }
    }
}

impl From<&AccountEntry> for Account {
    fn from(entry: &AccountEntry) -> Self {
        Self::new(entry.username.clone(), entry.credential.clone())
    }
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("credential", &"<redacted>")
            .finish()
    }
}

impl Reservable for Account {
    fn resource_id(&self) -> &str {
        &self.username
    }
}
