//! Session identity and the admin passphrase gate.

use super::models::Settings;
use crate::error::{MenuError, Result};
use crate::types::Timestamp;

/// Who a sync session runs as.
///
/// Identity only gates whether a session may start; it does not scope data.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Principal {
    Anonymous,
    /// Caller-supplied identity token.
    Token(String),
}

impl Principal {
    /// Use the token when one is supplied, anonymous otherwise.
    pub fn from_token(token: Option<&str>) -> Self {
        match token {
            Some(token) if !token.is_empty() => Principal::Token(token.to_string()),
            _ => Principal::Anonymous,
        }
    }

    pub fn authenticate(&self) -> Result<()> {
        match self {
            Principal::Anonymous => Ok(()),
            Principal::Token(token) if token.trim().is_empty() => {
                Err(MenuError::Unauthenticated("blank identity token".into()))
            }
            Principal::Token(_) => Ok(()),
        }
    }
}

/// Proof that the admin passphrase was entered.
///
/// A UI convenience, not a security boundary: the passphrase is stored in
/// the settings document and writes are not checked against a session.
#[derive(Clone, Debug)]
pub struct AdminSession {
    granted_at: Timestamp,
}

impl AdminSession {
    /// Compare `passphrase` with the configured admin passphrase.
    pub fn login(passphrase: &str, settings: &Settings) -> Result<Self> {
        if passphrase != settings.admin_password {
            tracing::debug!("admin passphrase rejected");
            return Err(MenuError::PassphraseMismatch);
        }
        Ok(Self {
            granted_at: Timestamp::now(),
        })
    }

    pub fn granted_at(&self) -> Timestamp {
        self.granted_at
    }
}
