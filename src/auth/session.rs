/// Login, refresh and logout
///
/// One live session per principal: the session key holds the current token and a new
/// login overwrites it, which invalidates every token handed out before.
use super::principal::Principal;
use crate::error::{TapglueError, TapglueResult};
use crate::kv::KvStore;
use crate::store::{EndUser, EntityStore, Operator};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use validator::{Validate, ValidationError};

/// Login payload; exactly one of email and user name must be set
#[derive(Debug, Clone, Default, Deserialize, Validate)]
#[validate(schema(function = "one_identity"))]
pub struct Credentials {
    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub user_name: Option<String>,

    #[validate(length(min = 1, message = "password must not be empty"))]
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|v| !v.is_empty())
    }

    fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref().filter(|v| !v.is_empty())
    }
}

fn one_identity(credentials: &Credentials) -> Result<(), ValidationError> {
    match (credentials.email(), credentials.user_name()) {
        (Some(_), Some(_)) | (None, None) => {
            let mut error = ValidationError::new("identity");
            error.message = Some("exactly one of email and user name must be provided".into());
            Err(error)
        }
        _ => Ok(()),
    }
}

fn bad_credentials() -> TapglueError {
    TapglueError::Unauthorized("invalid credentials".to_string())
}

#[derive(Clone)]
pub struct SessionManager {
    kv: Arc<dyn KvStore>,
    store: EntityStore,
    operator_ttl_secs: u64,
    end_user_ttl_secs: u64,
}

impl SessionManager {
    pub fn new(store: EntityStore, operator_ttl_secs: u64, end_user_ttl_secs: u64) -> Self {
        Self {
            kv: store.kv().clone(),
            store,
            operator_ttl_secs,
            end_user_ttl_secs,
        }
    }

    fn ttl_of(&self, principal: &Principal) -> u64 {
        match principal {
            Principal::Operator(_) => self.operator_ttl_secs,
            Principal::EndUser(_) => self.end_user_ttl_secs,
        }
    }

    pub async fn login_operator(&self, credentials: &Credentials) -> TapglueResult<(Operator, String)> {
        let op = self
            .store
            .find_operator(credentials.email(), credentials.user_name())
            .await?
            .ok_or_else(bad_credentials)?;

        let token = self
            .authenticate(&Principal::Operator(op.clone()), &credentials.password)
            .await?;
        let op = self.store.touch_operator_login(&op).await?;
        Ok((op, token))
    }

    pub async fn login_end_user(
        &self,
        account_id: i64,
        application_id: i64,
        credentials: &Credentials,
    ) -> TapglueResult<(EndUser, String)> {
        let user = self
            .store
            .find_end_user(account_id, application_id, credentials.email(), credentials.user_name())
            .await?
            .ok_or_else(bad_credentials)?;

        let token = self
            .authenticate(&Principal::EndUser(user.clone()), &credentials.password)
            .await?;
        let user = self.store.touch_end_user_login(&user).await?;
        Ok((user, token))
    }

    async fn authenticate(&self, principal: &Principal, password: &str) -> TapglueResult<String> {
        if !principal.enabled() {
            return Err(bad_credentials());
        }
        if !principal.compare_secret(self.store.hasher(), password) {
            let id = principal.identify();
            info!(kind = principal.kind(), account_id = id.account_id, user_id = id.user_id, "login rejected");
            return Err(bad_credentials());
        }
        self.open(principal).await
    }

    /// Mint a token and store it as the principal's only session
    pub async fn open(&self, principal: &Principal) -> TapglueResult<String> {
        let token = principal.mint_session_token();
        let key = principal.session_key();

        self.kv.set(&key, &token).await?;
        let expiry = self.kv.expire(&key, self.ttl_of(principal)).await;
        if !matches!(expiry, Ok(true)) {
            // A session without a TTL would never expire; take it back
            if let Err(e) = self.kv.del(&[key.clone()]).await {
                warn!(key = %key, "failed to drop session without ttl: {}", e);
            }
            return Err(match expiry {
                Err(e) => e.into(),
                Ok(_) => TapglueError::Internal(format!("session {} vanished before expire", key)),
            });
        }

        let id = principal.identify();
        info!(kind = principal.kind(), account_id = id.account_id, user_id = id.user_id, "session opened");
        Ok(token)
    }

    /// Check a presented token against the stored session
    pub async fn verify(&self, principal: &Principal, presented: &str) -> TapglueResult<()> {
        match self.kv.get(&principal.session_key()).await? {
            Some(stored) if super::signature::secrets_match(&stored, presented) => Ok(()),
            Some(_) => Err(TapglueError::Unauthorized("session mismatch".to_string())),
            None => Err(TapglueError::Unauthorized("session expired".to_string())),
        }
    }

    /// Swap a live token for a fresh one
    pub async fn refresh(&self, principal: &Principal, presented: &str) -> TapglueResult<String> {
        self.verify(principal, presented).await?;
        self.open(principal).await
    }

    pub async fn logout(&self, principal: &Principal, presented: &str) -> TapglueResult<()> {
        self.verify(principal, presented).await?;
        self.kv.del(&[principal.session_key()]).await?;
        let id = principal.identify();
        info!(kind = principal.kind(), account_id = id.account_id, user_id = id.user_id, "session closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::store;
    use crate::store::Account;

    async fn operator(store: &EntityStore) -> Operator {
        let account = store
            .create_account(Account {
                name: "acme".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        store
            .create_operator(
                account.id,
                Operator {
                    user_name: "olivia".into(),
                    email: "olivia@example.com".into(),
                    password: Some("hunter22".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    fn by_email(password: &str) -> Credentials {
        Credentials {
            email: Some("olivia@example.com".into()),
            user_name: None,
            password: password.into(),
        }
    }

    #[tokio::test]
    async fn test_second_login_invalidates_first() {
        let store = store();
        operator(&store).await;
        let sessions = SessionManager::new(store, 60, 60);

        let (op, t1) = sessions.login_operator(&by_email("hunter22")).await.unwrap();
        let (_, t2) = sessions.login_operator(&by_email("hunter22")).await.unwrap();
        assert_ne!(t1, t2);
        assert!(op.last_login.is_some());

        let principal = Principal::Operator(op);
        match sessions.verify(&principal, &t1).await {
            Err(TapglueError::Unauthorized(msg)) => assert_eq!(msg, "session mismatch"),
            other => panic!("unexpected {:?}", other),
        }
        sessions.verify(&principal, &t2).await.unwrap();
    }

    #[tokio::test]
    async fn test_bad_password_and_unknown_user() {
        let store = store();
        operator(&store).await;
        let sessions = SessionManager::new(store, 60, 60);

        assert!(matches!(
            sessions.login_operator(&by_email("wrong")).await,
            Err(TapglueError::Unauthorized(_))
        ));
        let unknown = Credentials {
            email: None,
            user_name: Some("nobody".into()),
            password: "hunter22".into(),
        };
        assert!(matches!(
            sessions.login_operator(&unknown).await,
            Err(TapglueError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_and_logout() {
        let store = store();
        operator(&store).await;
        let sessions = SessionManager::new(store, 60, 60);

        let (op, token) = sessions.login_operator(&by_email("hunter22")).await.unwrap();
        let principal = Principal::Operator(op);

        let fresh = sessions.refresh(&principal, &token).await.unwrap();
        assert!(sessions.verify(&principal, &token).await.is_err());

        assert!(sessions.logout(&principal, &token).await.is_err());
        sessions.logout(&principal, &fresh).await.unwrap();
        match sessions.verify(&principal, &fresh).await {
            Err(TapglueError::Unauthorized(msg)) => assert_eq!(msg, "session expired"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_session_expires() {
        let store = store();
        operator(&store).await;
        let sessions = SessionManager::new(store, 30, 30);

        let (op, token) = sessions.login_operator(&by_email("hunter22")).await.unwrap();
        let principal = Principal::Operator(op);
        tokio::time::advance(std::time::Duration::from_secs(31)).await;
        assert!(sessions.verify(&principal, &token).await.is_err());
    }

    #[test]
    fn test_credentials_need_one_identity() {
        let both = Credentials {
            email: Some("a@b.c".into()),
            user_name: Some("ab".into()),
            password: "x".into(),
        };
        assert!(both.validate().is_err());
        assert!(Credentials { password: "x".into(), ..Default::default() }.validate().is_err());
        assert!(by_email("x").validate().is_ok());
    }
}
