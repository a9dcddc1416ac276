/// Entity store
///
/// CRUD for accounts, operators, applications and end-users, with their secondary
/// indexes (by-email, by-username, by-social, by-token). Writes go primary record
/// first, then each index, with no rollback: a failed index write surfaces as an
/// internal error and leaves the primary in place.
mod account;
mod application;
mod end_user;
pub mod models;
mod operator;

pub use models::{
    Account, Application, Connection, ConnectionState, EndUser, Event, EventObject, Image, Operator,
    Participant,
};

use crate::error::{TapglueError, TapglueResult};
use crate::kv::KvStore;
use crate::minter::{IdMinter, PasswordHasher};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Owner recorded in a lookup index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexOwner {
    pub account_id: i64,
    pub application_id: Option<i64>,
    pub user_id: Option<i64>,
}

impl IndexOwner {
    fn fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("acc", self.account_id.to_string())];
        if let Some(app) = self.application_id {
            fields.push(("app", app.to_string()));
        }
        if let Some(usr) = self.user_id {
            fields.push(("usr", usr.to_string()));
        }
        fields
    }

    fn from_fields(fields: &HashMap<String, String>) -> Option<Self> {
        let parse = |name: &str| fields.get(name).and_then(|v| v.parse::<i64>().ok());
        Some(Self {
            account_id: parse("acc")?,
            application_id: parse("app"),
            user_id: parse("usr"),
        })
    }
}

/// Shared entry point to entity records
#[derive(Clone)]
pub struct EntityStore {
    kv: Arc<dyn KvStore>,
    ids: IdMinter,
    hasher: PasswordHasher,
}

impl EntityStore {
    pub fn new(kv: Arc<dyn KvStore>, hasher: PasswordHasher) -> Self {
        Self {
            ids: IdMinter::new(kv.clone()),
            kv,
            hasher,
        }
    }

    pub fn kv(&self) -> &Arc<dyn KvStore> {
        &self.kv
    }

    pub fn ids(&self) -> &IdMinter {
        &self.ids
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Resolve an auth token to the account or application that owns it
    pub async fn token_owner(&self, token: &str) -> TapglueResult<Option<IndexOwner>> {
        let fields = self.kv.hgetall(&crate::keys::token(token)).await?;
        Ok(IndexOwner::from_fields(&fields))
    }

    async fn index_owner(&self, key: &str) -> TapglueResult<Option<IndexOwner>> {
        let fields = self.kv.hgetall(key).await?;
        Ok(IndexOwner::from_fields(&fields))
    }

    async fn write_index(&self, key: &str, owner: IndexOwner) -> TapglueResult<()> {
        self.kv
            .hset_multiple(key, &owner.fields())
            .await
            .map_err(|e| partial_write(key, e.into()))
    }

    async fn drop_keys(&self, keys: Vec<String>) -> TapglueResult<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.kv
            .del(&keys)
            .await
            .map(|_| ())
            .map_err(|e| partial_write(&keys[0], e.into()))
    }
}

/// Serialize a record for storage
pub(crate) fn encode<T: Serialize>(value: &T) -> TapglueResult<String> {
    serde_json::to_string(value).map_err(|e| TapglueError::Internal(format!("encode failed: {}", e)))
}

/// Decode a stored record
pub(crate) fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> TapglueResult<T> {
    serde_json::from_str(raw).map_err(|source| TapglueError::Corrupt {
        key: key.to_string(),
        source,
    })
}

/// Read and decode one record; absent keys are NotFound
pub(crate) async fn read_record<T: DeserializeOwned>(
    kv: &dyn KvStore,
    key: &str,
    what: &str,
) -> TapglueResult<T> {
    match kv.get(key).await? {
        Some(raw) => decode(key, &raw),
        None => Err(TapglueError::NotFound(format!("{} not found", what))),
    }
}

/// Bulk-read records in key order, one fresh record per element
///
/// Keys come from indexes and lists, which may point at primaries that are already
/// gone; those are skipped.
pub(crate) async fn read_records<T: DeserializeOwned>(
    kv: &dyn KvStore,
    keys: &[String],
) -> TapglueResult<Vec<T>> {
    if keys.is_empty() {
        return Ok(Vec::new());
    }

    let raw = kv.mget(keys).await?;
    let mut records = Vec::with_capacity(raw.len());
    for (key, value) in keys.iter().zip(raw) {
        match value {
            Some(json) => records.push(decode(key, &json)?),
            None => warn!("dangling reference to {}", key),
        }
    }
    Ok(records)
}

/// Index write that failed after the primary record was committed
pub(crate) fn partial_write(key: &str, cause: TapglueError) -> TapglueError {
    TapglueError::Internal(format!("partial write at {}: {}", key, cause))
}

/// Treat empty strings like absent values
pub(crate) fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::kv::MemoryStore;

    pub fn store() -> EntityStore {
        EntityStore::new(
            Arc::new(MemoryStore::new()),
            PasswordHasher::new("test-pepper-0123456789"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn test_read_records_skips_dangling_keys() {
        let kv = MemoryStore::new();
        kv.set("a", r#"{"name":"first"}"#).await.unwrap();
        kv.set("c", r#"{"name":"third"}"#).await.unwrap();

        let keys = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let accounts: Vec<Account> = read_records(&kv, &keys).await.unwrap();

        let names: Vec<&str> = accounts.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["first", "third"]);
    }

    #[tokio::test]
    async fn test_read_record_errors() {
        let kv = MemoryStore::new();
        let missing: TapglueResult<Account> = read_record(&kv, "nope", "account").await;
        assert!(matches!(missing, Err(TapglueError::NotFound(_))));

        kv.set("bad", "{not json").await.unwrap();
        let corrupt: TapglueResult<Account> = read_record(&kv, "bad", "account").await;
        assert!(matches!(corrupt, Err(TapglueError::Corrupt { .. })));
    }

    #[test]
    fn test_index_owner_fields() {
        let owner = IndexOwner {
            account_id: 1,
            application_id: Some(2),
            user_id: None,
        };
        let map: HashMap<String, String> = owner
            .fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(IndexOwner::from_fields(&map), Some(owner));
        assert_eq!(IndexOwner::from_fields(&HashMap::new()), None);
    }
}
