/// Operator records and their installation-wide email/username indexes
use super::{encode, non_empty, read_record, read_records, EntityStore, IndexOwner};
use crate::error::{TapglueError, TapglueResult};
use crate::keys;
use crate::store::models::Operator;
use chrono::Utc;
use tracing::info;

fn owner(op: &Operator) -> IndexOwner {
    IndexOwner {
        account_id: op.account_id,
        application_id: None,
        user_id: Some(op.id),
    }
}

fn index_keys(op: &Operator) -> Vec<String> {
    let mut indexes = Vec::with_capacity(2);
    if !op.email.is_empty() {
        indexes.push(keys::operator_by_email(&op.email));
    }
    if !op.user_name.is_empty() {
        indexes.push(keys::operator_by_username(&op.user_name));
    }
    indexes
}

impl EntityStore {
    /// Create an operator; `password` must hold the plain text
    pub async fn create_operator(&self, account_id: i64, mut op: Operator) -> TapglueResult<Operator> {
        let plain = non_empty(&op.password)
            .ok_or_else(|| TapglueError::BadRequest("user password is required".to_string()))?
            .to_string();

        self.ensure_operator_identity_free(&op, None).await?;

        let now = Utc::now();
        op.id = self.ids.operator_id(account_id).await?;
        op.account_id = account_id;
        op.password = Some(self.hasher.hash(&plain));
        op.enabled = true;
        op.last_login = None;
        op.created_at = now;
        op.updated_at = now;

        let key = keys::operator(account_id, op.id);
        if !self.kv.set_nx(&key, &encode(&op)?).await? {
            return Err(TapglueError::Conflict("user".to_string()));
        }

        self.kv
            .lpush(&keys::operators(account_id), &key)
            .await
            .map_err(|e| super::partial_write(&key, e.into()))?;
        for index in index_keys(&op) {
            self.write_index(&index, owner(&op)).await?;
        }

        info!(account_id, operator_id = op.id, "operator created");
        Ok(op)
    }

    pub async fn read_operator(&self, account_id: i64, operator_id: i64) -> TapglueResult<Operator> {
        read_record(self.kv.as_ref(), &keys::operator(account_id, operator_id), "user").await
    }

    /// Operators of an account, most recent first
    pub async fn list_operators(&self, account_id: i64) -> TapglueResult<Vec<Operator>> {
        let members = self.kv.lrange(&keys::operators(account_id)).await?;
        read_records(self.kv.as_ref(), &members).await
    }

    /// Replace an operator; an empty password keeps the stored hash
    pub async fn update_operator(&self, existing: &Operator, mut updated: Operator) -> TapglueResult<Operator> {
        updated.id = existing.id;
        updated.account_id = existing.account_id;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        updated.password = match non_empty(&updated.password) {
            Some(plain) => Some(self.hasher.hash(plain)),
            None => existing.password.clone(),
        };

        self.ensure_operator_identity_free(&updated, Some(existing)).await?;

        let key = keys::operator(existing.account_id, existing.id);
        if !self.kv.set_xx(&key, &encode(&updated)?).await? {
            return Err(TapglueError::NotFound("user not found".to_string()).for_mutation());
        }

        self.reindex_operator(existing, &updated, &key).await?;
        Ok(updated)
    }

    async fn reindex_operator(&self, existing: &Operator, updated: &Operator, key: &str) -> TapglueResult<()> {
        let list = keys::operators(existing.account_id);
        let old_indexes = if existing.enabled { index_keys(existing) } else { Vec::new() };
        let new_indexes = if updated.enabled { index_keys(updated) } else { Vec::new() };

        let stale: Vec<String> = old_indexes
            .iter()
            .filter(|k| !new_indexes.contains(k))
            .cloned()
            .collect();
        self.drop_keys(stale).await?;

        for index in new_indexes.iter().filter(|k| !old_indexes.contains(k)) {
            self.write_index(index, owner(updated)).await?;
        }

        match (existing.enabled, updated.enabled) {
            (true, false) => {
                self.kv
                    .lrem(&list, key)
                    .await
                    .map_err(|e| super::partial_write(&list, e.into()))?;
                self.drop_keys(vec![keys::operator_session(existing.account_id, existing.id)])
                    .await?;
            }
            (false, true) => {
                self.kv.lrem(&list, key).await?;
                self.kv
                    .lpush(&list, key)
                    .await
                    .map_err(|e| super::partial_write(&list, e.into()))?;
            }
            _ => {}
        }
        Ok(())
    }

    pub async fn delete_operator(&self, op: &Operator) -> TapglueResult<()> {
        let key = keys::operator(op.account_id, op.id);
        if self.kv.del(&[key.clone()]).await? == 0 {
            return Err(TapglueError::NotFound("user not found".to_string()));
        }

        self.kv
            .lrem(&keys::operators(op.account_id), &key)
            .await
            .map_err(|e| super::partial_write(&key, e.into()))?;

        let mut derived = index_keys(op);
        derived.push(keys::operator_session(op.account_id, op.id));
        self.drop_keys(derived).await?;

        info!(account_id = op.account_id, operator_id = op.id, "operator deleted");
        Ok(())
    }

    /// Look up an operator by email or username
    pub async fn find_operator(&self, email: Option<&str>, user_name: Option<&str>) -> TapglueResult<Option<Operator>> {
        let index = match (email, user_name) {
            (Some(email), _) => keys::operator_by_email(email),
            (None, Some(user_name)) => keys::operator_by_username(user_name),
            (None, None) => return Ok(None),
        };

        let Some(owner) = self.index_owner(&index).await? else {
            return Ok(None);
        };
        let Some(operator_id) = owner.user_id else {
            return Ok(None);
        };

        // Index entries are hints; the primary may be gone
        match self.read_operator(owner.account_id, operator_id).await {
            Ok(op) => Ok(Some(op)),
            Err(TapglueError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stamp a successful login
    pub async fn touch_operator_login(&self, op: &Operator) -> TapglueResult<Operator> {
        let mut stamped = op.clone();
        stamped.last_login = Some(Utc::now());
        let key = keys::operator(op.account_id, op.id);
        if !self.kv.set_xx(&key, &encode(&stamped)?).await? {
            return Err(TapglueError::NotFound("user not found".to_string()).for_mutation());
        }
        Ok(stamped)
    }

    async fn ensure_operator_identity_free(&self, op: &Operator, existing: Option<&Operator>) -> TapglueResult<()> {
        let changed = |new: &str, old: Option<&str>| !new.is_empty() && Some(new) != old;

        if changed(&op.email, existing.map(|e| e.email.as_str())) {
            if let Some(other) = self.index_owner(&keys::operator_by_email(&op.email)).await? {
                if other.user_id != existing.map(|e| e.id) {
                    return Err(TapglueError::Conflict("user email".to_string()));
                }
            }
        }

        if changed(&op.user_name, existing.map(|e| e.user_name.as_str())) {
            if let Some(other) = self.index_owner(&keys::operator_by_username(&op.user_name)).await? {
                if other.user_id != existing.map(|e| e.id) {
                    return Err(TapglueError::Conflict("user name".to_string()));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::error::TapglueError;
    use crate::keys;
    use crate::store::test_support::store;
    use crate::store::Operator;

    fn operator(name: &str) -> Operator {
        Operator {
            user_name: name.to_string(),
            email: format!("{}@example.com", name),
            password: Some("secret-pass".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_hashes_password_and_indexes() {
        let store = store();
        let op = store.create_operator(1, operator("alice")).await.unwrap();

        assert_eq!(op.account_id, 1);
        assert!(op.enabled);
        let hash = op.password.clone().unwrap();
        assert_ne!(hash, "secret-pass");
        assert!(store.hasher().verify("secret-pass", &hash));

        let by_email = store.find_operator(Some("alice@example.com"), None).await.unwrap();
        assert_eq!(by_email.unwrap().id, op.id);
        let by_name = store.find_operator(None, Some("alice")).await.unwrap();
        assert_eq!(by_name.unwrap().id, op.id);
    }

    #[tokio::test]
    async fn test_create_requires_password() {
        let store = store();
        let err = store
            .create_operator(
                1,
                Operator {
                    password: None,
                    ..operator("bob")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TapglueError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_email_unique_across_accounts() {
        let store = store();
        store.create_operator(1, operator("carol")).await.unwrap();
        let err = store
            .create_operator(
                2,
                Operator {
                    user_name: "other".into(),
                    ..operator("carol")
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TapglueError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_list_is_most_recent_first() {
        let store = store();
        store.create_operator(1, operator("first")).await.unwrap();
        store.create_operator(1, operator("second")).await.unwrap();

        let names: Vec<String> = store
            .list_operators(1)
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.user_name)
            .collect();
        assert_eq!(names, vec!["second", "first"]);
    }

    #[tokio::test]
    async fn test_update_moves_indexes_and_keeps_hash() {
        let store = store();
        let op = store.create_operator(1, operator("dave")).await.unwrap();

        let updated = store
            .update_operator(
                &op,
                Operator {
                    email: "dave@new.example.com".into(),
                    password: Some(String::new()),
                    ..op.clone()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.password, op.password);
        assert!(store
            .find_operator(Some("dave@example.com"), None)
            .await
            .unwrap()
            .is_none());
        assert_eq!(
            store
                .find_operator(Some("dave@new.example.com"), None)
                .await
                .unwrap()
                .unwrap()
                .id,
            op.id
        );
    }

    #[tokio::test]
    async fn test_update_with_same_values_is_noop() {
        let store = store();
        let op = store.create_operator(1, operator("erin")).await.unwrap();
        let again = store
            .update_operator(&op, Operator { password: None, ..op.clone() })
            .await
            .unwrap();
        assert_eq!(again.email, op.email);
        assert_eq!(again.password, op.password);
        assert!(store.find_operator(None, Some("erin")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_disable_drops_from_list_and_indexes() {
        let store = store();
        let op = store.create_operator(1, operator("frank")).await.unwrap();
        store
            .update_operator(&op, Operator { enabled: false, password: None, ..op.clone() })
            .await
            .unwrap();

        assert!(store.list_operators(1).await.unwrap().is_empty());
        assert!(store.find_operator(None, Some("frank")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_removes_everything() {
        let store = store();
        let op = store.create_operator(1, operator("gina")).await.unwrap();
        store
            .kv()
            .set(&keys::operator_session(1, op.id), "token")
            .await
            .unwrap();

        store.delete_operator(&op).await.unwrap();

        assert!(matches!(
            store.read_operator(1, op.id).await,
            Err(TapglueError::NotFound(_))
        ));
        assert!(store.list_operators(1).await.unwrap().is_empty());
        assert!(store.find_operator(Some("gina@example.com"), None).await.unwrap().is_none());
        assert!(!store.kv().exists(&keys::operator_session(1, op.id)).await.unwrap());
    }
}
