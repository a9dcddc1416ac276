/// Application records and the application token index
use super::{encode, read_record, read_records, EntityStore, IndexOwner};
use crate::error::{TapglueError, TapglueResult};
use crate::keys;
use crate::minter;
use crate::store::models::Application;
use chrono::Utc;
use tracing::info;

fn owner(app: &Application) -> IndexOwner {
    IndexOwner {
        account_id: app.account_id,
        application_id: Some(app.id),
        user_id: None,
    }
}

impl EntityStore {
    pub async fn create_application(&self, account_id: i64, mut app: Application) -> TapglueResult<Application> {
        let now = Utc::now();
        app.id = self.ids.application_id(account_id).await?;
        app.account_id = account_id;
        app.auth_token = minter::application_auth_token(account_id, app.id, now);
        app.enabled = true;
        app.created_at = now;
        app.updated_at = now;

        let key = keys::application(account_id, app.id);
        if !self.kv.set_nx(&key, &encode(&app)?).await? {
            return Err(TapglueError::Conflict("application".to_string()));
        }

        self.kv
            .lpush(&keys::applications(account_id), &key)
            .await
            .map_err(|e| super::partial_write(&key, e.into()))?;
        self.write_index(&keys::token(&app.auth_token), owner(&app)).await?;

        info!(account_id, application_id = app.id, "application created");
        Ok(app)
    }

    pub async fn read_application(&self, account_id: i64, application_id: i64) -> TapglueResult<Application> {
        read_record(
            self.kv.as_ref(),
            &keys::application(account_id, application_id),
            "application",
        )
        .await
    }

    /// Applications of an account, most recent first
    pub async fn list_applications(&self, account_id: i64) -> TapglueResult<Vec<Application>> {
        let members = self.kv.lrange(&keys::applications(account_id)).await?;
        read_records(self.kv.as_ref(), &members).await
    }

    /// Replace an application; its token cannot change
    pub async fn update_application(&self, existing: &Application, mut updated: Application) -> TapglueResult<Application> {
        updated.id = existing.id;
        updated.account_id = existing.account_id;
        updated.auth_token = existing.auth_token.clone();
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();

        let key = keys::application(existing.account_id, existing.id);
        if !self.kv.set_xx(&key, &encode(&updated)?).await? {
            return Err(TapglueError::NotFound("application not found".to_string()).for_mutation());
        }

        let list = keys::applications(existing.account_id);
        let token_key = keys::token(&existing.auth_token);
        match (existing.enabled, updated.enabled) {
            (true, false) => {
                self.kv
                    .lrem(&list, &key)
                    .await
                    .map_err(|e| super::partial_write(&list, e.into()))?;
                self.drop_keys(vec![token_key]).await?;
            }
            (false, true) => {
                self.kv.lrem(&list, &key).await?;
                self.kv
                    .lpush(&list, &key)
                    .await
                    .map_err(|e| super::partial_write(&list, e.into()))?;
                self.write_index(&token_key, owner(&updated)).await?;
            }
            _ => {}
        }

        Ok(updated)
    }

    pub async fn delete_application(&self, app: &Application) -> TapglueResult<()> {
        let key = keys::application(app.account_id, app.id);
        if self.kv.del(&[key.clone()]).await? == 0 {
            return Err(TapglueError::NotFound("application not found".to_string()));
        }

        self.kv
            .lrem(&keys::applications(app.account_id), &key)
            .await
            .map_err(|e| super::partial_write(&key, e.into()))?;
        self.drop_keys(vec![keys::token(&app.auth_token)]).await?;

        info!(account_id = app.account_id, application_id = app.id, "application deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TapglueError;
    use crate::store::test_support::store;
    use crate::store::Application;

    fn app(name: &str) -> Application {
        Application {
            name: name.to_string(),
            description: "mobile app".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_enables_and_indexes_token() {
        let store = store();
        let created = store.create_application(3, app("Photos")).await.unwrap();

        assert!(created.enabled);
        assert_eq!(created.account_id, 3);
        let owner = store.token_owner(&created.auth_token).await.unwrap().unwrap();
        assert_eq!(owner.account_id, 3);
        assert_eq!(owner.application_id, Some(created.id));
    }

    #[tokio::test]
    async fn test_list_yields_distinct_records() {
        let store = store();
        store.create_application(1, app("One")).await.unwrap();
        store.create_application(1, app("Two")).await.unwrap();
        store.create_application(1, app("Three")).await.unwrap();

        let names: Vec<String> = store
            .list_applications(1)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Three", "Two", "One"]);
    }

    #[tokio::test]
    async fn test_disable_and_reenable() {
        let store = store();
        let created = store.create_application(1, app("Toggle")).await.unwrap();

        let disabled = store
            .update_application(&created, Application { enabled: false, ..created.clone() })
            .await
            .unwrap();
        assert!(store.list_applications(1).await.unwrap().is_empty());
        assert!(store.token_owner(&created.auth_token).await.unwrap().is_none());

        store
            .update_application(&disabled, Application { enabled: true, ..disabled.clone() })
            .await
            .unwrap();
        assert_eq!(store.list_applications(1).await.unwrap().len(), 1);
        assert!(store.token_owner(&created.auth_token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_then_read_is_not_found() {
        let store = store();
        let created = store.create_application(1, app("Gone")).await.unwrap();
        store.delete_application(&created).await.unwrap();

        assert!(matches!(
            store.read_application(1, created.id).await,
            Err(TapglueError::NotFound(_))
        ));
        assert!(matches!(
            store.delete_application(&created).await,
            Err(TapglueError::NotFound(_))
        ));
    }
}
