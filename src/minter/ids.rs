/// Monotonic 64-bit identifiers per scope
use crate::error::TapglueResult;
use crate::keys;
use crate::kv::KvStore;
use std::sync::Arc;

/// Allocates IDs from per-scope counters
#[derive(Clone)]
pub struct IdMinter {
    store: Arc<dyn KvStore>,
}

impl IdMinter {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    pub async fn account_id(&self) -> TapglueResult<i64> {
        Ok(self.store.incr(&keys::account_ids()).await?)
    }

    pub async fn operator_id(&self, account_id: i64) -> TapglueResult<i64> {
        Ok(self.store.incr(&keys::operator_ids(account_id)).await?)
    }

    pub async fn application_id(&self, account_id: i64) -> TapglueResult<i64> {
        Ok(self.store.incr(&keys::application_ids(account_id)).await?)
    }

    pub async fn end_user_id(&self, account_id: i64, application_id: i64) -> TapglueResult<i64> {
        Ok(self
            .store
            .incr(&keys::end_user_ids(account_id, application_id))
            .await?)
    }

    pub async fn event_id(&self, account_id: i64, application_id: i64) -> TapglueResult<i64> {
        Ok(self
            .store
            .incr(&keys::event_ids(account_id, application_id))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn test_ids_are_monotonic_per_scope() {
        let minter = IdMinter::new(Arc::new(MemoryStore::new()));

        assert_eq!(minter.account_id().await.unwrap(), 1);
        assert_eq!(minter.account_id().await.unwrap(), 2);

        assert_eq!(minter.end_user_id(1, 1).await.unwrap(), 1);
        assert_eq!(minter.end_user_id(1, 1).await.unwrap(), 2);
        // Separate application, separate counter
        assert_eq!(minter.end_user_id(1, 2).await.unwrap(), 1);

        assert_eq!(minter.event_id(1, 1).await.unwrap(), 1);
        assert_eq!(minter.operator_id(1).await.unwrap(), 1);
        assert_eq!(minter.application_id(1).await.unwrap(), 1);
    }
}
