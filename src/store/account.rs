/// Account records and the account token index
use super::{encode, read_record, EntityStore, IndexOwner};
use crate::error::{TapglueError, TapglueResult};
use crate::keys;
use crate::minter;
use crate::store::models::Account;
use chrono::Utc;
use tracing::{info, warn};

impl EntityStore {
    pub async fn create_account(&self, mut account: Account) -> TapglueResult<Account> {
        let now = Utc::now();
        account.id = self.ids.account_id().await?;
        account.auth_token = minter::account_auth_token(account.id, now);
        account.enabled = true;
        account.created_at = now;
        account.updated_at = now;

        let key = keys::account(account.id);
        if !self.kv.set_nx(&key, &encode(&account)?).await? {
            return Err(TapglueError::Conflict("account".to_string()));
        }

        self.write_index(&keys::token(&account.auth_token), account_owner(account.id))
            .await?;

        info!(account_id = account.id, "account created");
        Ok(account)
    }

    pub async fn read_account(&self, account_id: i64) -> TapglueResult<Account> {
        read_record(self.kv.as_ref(), &keys::account(account_id), "account").await
    }

    /// Replace an account; the token and creation time cannot change
    pub async fn update_account(&self, existing: &Account, mut updated: Account) -> TapglueResult<Account> {
        updated.id = existing.id;
        updated.auth_token = existing.auth_token.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();

        let key = keys::account(existing.id);
        if !self.kv.set_xx(&key, &encode(&updated)?).await? {
            return Err(TapglueError::NotFound("account not found".to_string()).for_mutation());
        }

        let token_key = keys::token(&existing.auth_token);
        match (existing.enabled, updated.enabled) {
            (true, false) => self.drop_keys(vec![token_key]).await?,
            (false, true) => self.write_index(&token_key, account_owner(existing.id)).await?,
            _ => {}
        }

        Ok(updated)
    }

    /// Remove an account and logically disable what it owns
    pub async fn delete_account(&self, account: &Account) -> TapglueResult<()> {
        let key = keys::account(account.id);
        if self.kv.del(&[key]).await? == 0 {
            return Err(TapglueError::NotFound("account not found".to_string()));
        }

        self.drop_keys(vec![keys::token(&account.auth_token)]).await?;

        for application in self.list_applications(account.id).await? {
            if application.enabled {
                let disabled = crate::store::Application {
                    enabled: false,
                    ..application.clone()
                };
                if let Err(e) = self.update_application(&application, disabled).await {
                    warn!(account_id = account.id, application_id = application.id, "failed to disable application: {}", e);
                }
            }
        }

        for operator in self.list_operators(account.id).await? {
            if operator.enabled {
                let disabled = crate::store::Operator {
                    enabled: false,
                    password: None,
                    ..operator.clone()
                };
                if let Err(e) = self.update_operator(&operator, disabled).await {
                    warn!(account_id = account.id, operator_id = operator.id, "failed to disable operator: {}", e);
                }
            }
            self.drop_keys(vec![keys::operator_session(account.id, operator.id)])
                .await?;
        }

        info!(account_id = account.id, "account deleted");
        Ok(())
    }
}

fn account_owner(account_id: i64) -> IndexOwner {
    IndexOwner {
        account_id,
        application_id: None,
        user_id: None,
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TapglueError;
    use crate::store::test_support::store;
    use crate::store::{Account, Application};

    fn account() -> Account {
        Account {
            name: "Tapglue".into(),
            description: "test account".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_read_account() {
        let store = store();
        let created = store.create_account(account()).await.unwrap();

        assert_eq!(created.id, 1);
        assert!(created.enabled);
        assert!(!created.auth_token.is_empty());
        assert_eq!(created.created_at, created.updated_at);

        let read = store.read_account(created.id).await.unwrap();
        assert_eq!(read, created);

        let owner = store.token_owner(&created.auth_token).await.unwrap().unwrap();
        assert_eq!(owner.account_id, created.id);
        assert_eq!(owner.application_id, None);
    }

    #[tokio::test]
    async fn test_update_keeps_token() {
        let store = store();
        let created = store.create_account(account()).await.unwrap();

        let updated = store
            .update_account(
                &created,
                Account {
                    name: "Renamed".into(),
                    auth_token: "forged".into(),
                    enabled: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.auth_token, created.auth_token);
        assert_eq!(updated.created_at, created.created_at);
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn test_update_missing_account_is_internal() {
        let store = store();
        let ghost = Account {
            id: 99,
            ..account()
        };
        let err = store.update_account(&ghost, ghost.clone()).await.unwrap_err();
        assert!(matches!(err, TapglueError::Internal(_)));
    }

    #[tokio::test]
    async fn test_delete_account_disables_applications() {
        let store = store();
        let acc = store.create_account(account()).await.unwrap();
        let app = store
            .create_application(
                acc.id,
                Application {
                    name: "App".into(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        store.delete_account(&acc).await.unwrap();

        assert!(matches!(
            store.read_account(acc.id).await,
            Err(TapglueError::NotFound(_))
        ));
        assert!(store.token_owner(&acc.auth_token).await.unwrap().is_none());
        assert!(store.token_owner(&app.auth_token).await.unwrap().is_none());
        assert!(!store.read_application(acc.id, app.id).await.unwrap().enabled);
    }
}
