use crate::keys;
use crate::minter::{end_user_session_token, operator_session_token, PasswordHasher};
use crate::store::{EndUser, Operator};

/// Identifiers of a principal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrincipalId {
    pub account_id: i64,
    pub application_id: Option<i64>,
    pub user_id: i64,
}

/// Anything that can hold a session
#[derive(Debug, Clone, PartialEq)]
pub enum Principal {
    Operator(Operator),
    EndUser(EndUser),
}

impl Principal {
    pub fn identify(&self) -> PrincipalId {
        match self {
            Principal::Operator(op) => PrincipalId {
                account_id: op.account_id,
                application_id: None,
                user_id: op.id,
            },
            Principal::EndUser(user) => PrincipalId {
                account_id: user.account_id,
                application_id: Some(user.application_id),
                user_id: user.id,
            },
        }
    }

    pub fn enabled(&self) -> bool {
        match self {
            Principal::Operator(op) => op.enabled,
            Principal::EndUser(user) => user.enabled,
        }
    }

    /// Check a plain-text password against the stored hash
    pub fn compare_secret(&self, hasher: &PasswordHasher, plain: &str) -> bool {
        let stored = match self {
            Principal::Operator(op) => op.password.as_deref(),
            Principal::EndUser(user) => user.password.as_deref(),
        };
        stored.is_some_and(|hash| hasher.verify(plain, hash))
    }

    pub fn session_key(&self) -> String {
        let id = self.identify();
        match id.application_id {
            Some(app) => keys::end_user_session(id.account_id, app, id.user_id),
            None => keys::operator_session(id.account_id, id.user_id),
        }
    }

    pub fn mint_session_token(&self) -> String {
        let id = self.identify();
        match id.application_id {
            Some(app) => end_user_session_token(id.account_id, app, id.user_id),
            None => operator_session_token(id.account_id, id.user_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Principal::Operator(_) => "operator",
            Principal::EndUser(_) => "user",
        }
    }
}
