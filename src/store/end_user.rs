/// End-user records and their per-application email, username and social indexes
use super::{encode, non_empty, read_record, read_records, EntityStore, IndexOwner};
use crate::error::{TapglueError, TapglueResult};
use crate::keys;
use crate::store::models::EndUser;
use chrono::Utc;
use tracing::info;

fn owner(user: &EndUser) -> IndexOwner {
    IndexOwner {
        account_id: user.account_id,
        application_id: Some(user.application_id),
        user_id: Some(user.id),
    }
}

/// Lookup keys a user contributes, each paired with the label used in conflicts
fn index_keys(user: &EndUser) -> Vec<(String, &'static str)> {
    let (a, b) = (user.account_id, user.application_id);
    let mut indexes = Vec::new();
    if let Some(email) = user.email() {
        indexes.push((keys::end_user_by_email(a, b, email), "user email"));
    }
    if let Some(user_name) = user.user_name() {
        indexes.push((keys::end_user_by_username(a, b, user_name), "user name"));
    }
    let mut socials: Vec<(&String, &String)> = user
        .social_ids
        .iter()
        .filter(|(_, id)| !id.is_empty())
        .collect();
    socials.sort();
    for (platform, external_id) in socials {
        indexes.push((keys::by_social(a, b, platform, external_id), "social id"));
    }
    indexes
}

impl EntityStore {
    /// Create an end-user; `password` must hold the plain text
    pub async fn create_end_user(&self, account_id: i64, application_id: i64, mut user: EndUser) -> TapglueResult<EndUser> {
        let plain = non_empty(&user.password)
            .ok_or_else(|| TapglueError::BadRequest("user password is required".to_string()))?
            .to_string();

        user.account_id = account_id;
        user.application_id = application_id;
        self.ensure_end_user_identity_free(&user, None).await?;

        let now = Utc::now();
        user.id = self.ids.end_user_id(account_id, application_id).await?;
        user.password = Some(self.hasher.hash(&plain));
        user.enabled = true;
        user.last_login = None;
        user.created_at = now;
        user.updated_at = now;

        let key = keys::end_user(account_id, application_id, user.id);
        if !self.kv.set_nx(&key, &encode(&user)?).await? {
            return Err(TapglueError::Conflict("user".to_string()));
        }

        self.kv
            .lpush(&keys::end_users(account_id, application_id), &key)
            .await
            .map_err(|e| super::partial_write(&key, e.into()))?;
        for (index, _) in index_keys(&user) {
            self.write_index(&index, owner(&user)).await?;
        }

        info!(account_id, application_id, user_id = user.id, "end-user created");
        Ok(user)
    }

    pub async fn read_end_user(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<EndUser> {
        read_record(
            self.kv.as_ref(),
            &keys::end_user(account_id, application_id, user_id),
            "user",
        )
        .await
    }

    /// End-users of an application, most recent first
    pub async fn list_end_users(&self, account_id: i64, application_id: i64) -> TapglueResult<Vec<EndUser>> {
        let members = self
            .kv
            .lrange(&keys::end_users(account_id, application_id))
            .await?;
        read_records(self.kv.as_ref(), &members).await
    }

    /// Bulk-read end-users by their stored keys
    pub async fn read_end_users_by_key(&self, user_keys: &[String]) -> TapglueResult<Vec<EndUser>> {
        read_records(self.kv.as_ref(), user_keys).await
    }

    /// Replace an end-user; an empty password keeps the stored hash
    pub async fn update_end_user(&self, existing: &EndUser, mut updated: EndUser) -> TapglueResult<EndUser> {
        updated.id = existing.id;
        updated.account_id = existing.account_id;
        updated.application_id = existing.application_id;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();
        updated.password = match non_empty(&updated.password) {
            Some(plain) => Some(self.hasher.hash(plain)),
            None => existing.password.clone(),
        };

        self.ensure_end_user_identity_free(&updated, Some(existing)).await?;

        let key = keys::end_user(existing.account_id, existing.application_id, existing.id);
        if !self.kv.set_xx(&key, &encode(&updated)?).await? {
            return Err(TapglueError::NotFound("user not found".to_string()).for_mutation());
        }

        let old_indexes: Vec<String> = if existing.enabled {
            index_keys(existing).into_iter().map(|(k, _)| k).collect()
        } else {
            Vec::new()
        };
        let new_indexes: Vec<String> = if updated.enabled {
            index_keys(&updated).into_iter().map(|(k, _)| k).collect()
        } else {
            Vec::new()
        };

        let stale: Vec<String> = old_indexes
            .iter()
            .filter(|k| !new_indexes.contains(k))
            .cloned()
            .collect();
        self.drop_keys(stale).await?;
        for index in new_indexes.iter().filter(|k| !old_indexes.contains(k)) {
            self.write_index(index, owner(&updated)).await?;
        }

        let list = keys::end_users(existing.account_id, existing.application_id);
        match (existing.enabled, updated.enabled) {
            (true, false) => {
                self.kv
                    .lrem(&list, &key)
                    .await
                    .map_err(|e| super::partial_write(&list, e.into()))?;
                self.drop_keys(vec![keys::end_user_session(
                    existing.account_id,
                    existing.application_id,
                    existing.id,
                )])
                .await?;
            }
            (false, true) => {
                self.kv.lrem(&list, &key).await?;
                self.kv
                    .lpush(&list, &key)
                    .await
                    .map_err(|e| super::partial_write(&list, e.into()))?;
            }
            _ => {}
        }

        Ok(updated)
    }

    pub async fn delete_end_user(&self, user: &EndUser) -> TapglueResult<()> {
        let key = keys::end_user(user.account_id, user.application_id, user.id);
        if self.kv.del(&[key.clone()]).await? == 0 {
            return Err(TapglueError::NotFound("user not found".to_string()));
        }

        self.kv
            .lrem(&keys::end_users(user.account_id, user.application_id), &key)
            .await
            .map_err(|e| super::partial_write(&key, e.into()))?;

        let mut derived: Vec<String> = index_keys(user).into_iter().map(|(k, _)| k).collect();
        derived.push(keys::end_user_session(user.account_id, user.application_id, user.id));
        self.drop_keys(derived).await?;

        info!(
            account_id = user.account_id,
            application_id = user.application_id,
            user_id = user.id,
            "end-user deleted"
        );
        Ok(())
    }

    /// Look up an end-user by email or username within one application
    pub async fn find_end_user(
        &self,
        account_id: i64,
        application_id: i64,
        email: Option<&str>,
        user_name: Option<&str>,
    ) -> TapglueResult<Option<EndUser>> {
        let index = match (email, user_name) {
            (Some(email), _) => keys::end_user_by_email(account_id, application_id, email),
            (None, Some(user_name)) => keys::end_user_by_username(account_id, application_id, user_name),
            (None, None) => return Ok(None),
        };
        self.end_user_from_index(&index).await
    }

    /// Look up an end-user by an external social-platform id
    pub async fn find_end_user_by_social(
        &self,
        account_id: i64,
        application_id: i64,
        platform: &str,
        external_id: &str,
    ) -> TapglueResult<Option<EndUser>> {
        let index = keys::by_social(account_id, application_id, platform, external_id);
        self.end_user_from_index(&index).await
    }

    async fn end_user_from_index(&self, index: &str) -> TapglueResult<Option<EndUser>> {
        let Some(owner) = self.index_owner(index).await? else {
            return Ok(None);
        };
        let (Some(application_id), Some(user_id)) = (owner.application_id, owner.user_id) else {
            return Ok(None);
        };

        match self.read_end_user(owner.account_id, application_id, user_id).await {
            Ok(user) => Ok(Some(user)),
            Err(TapglueError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Stamp a successful login
    pub async fn touch_end_user_login(&self, user: &EndUser) -> TapglueResult<EndUser> {
        let mut stamped = user.clone();
        stamped.last_login = Some(Utc::now());
        let key = keys::end_user(user.account_id, user.application_id, user.id);
        if !self.kv.set_xx(&key, &encode(&stamped)?).await? {
            return Err(TapglueError::NotFound("user not found".to_string()).for_mutation());
        }
        Ok(stamped)
    }

    async fn ensure_end_user_identity_free(&self, user: &EndUser, existing: Option<&EndUser>) -> TapglueResult<()> {
        let current: Vec<String> = existing
            .map(|e| index_keys(e).into_iter().map(|(k, _)| k).collect())
            .unwrap_or_default();

        for (index, label) in index_keys(user) {
            if current.contains(&index) {
                continue;
            }
            if let Some(other) = self.index_owner(&index).await? {
                if other.user_id != existing.map(|e| e.id) {
                    return Err(TapglueError::Conflict(label.to_string()));
                }
            }
        }
        Ok(())
    }
}
