/// Geo, object and location indexes over events
use crate::error::TapglueResult;
use crate::keys;
use crate::kv::KvStore;
use crate::store::{partial_write, Event};
use std::sync::Arc;

/// Index entries an event contributes; disabled events contribute none
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexEntries {
    /// (latitude, longitude)
    pub geo: Option<(f64, f64)>,
    pub object: Option<String>,
    pub location: Option<String>,
}

impl IndexEntries {
    pub fn of(event: &Event) -> Self {
        if !event.enabled {
            return Self::default();
        }
        Self {
            geo: event.coordinates(),
            object: event.object_id().map(str::to_string),
            location: event.location().map(str::to_string),
        }
    }
}

#[derive(Clone)]
pub struct EventIndexer {
    kv: Arc<dyn KvStore>,
}

impl EventIndexer {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn add(&self, account_id: i64, application_id: i64, event_key: &str, entries: &IndexEntries) -> TapglueResult<()> {
        self.apply(account_id, application_id, event_key, &IndexEntries::default(), entries)
            .await
    }

    pub async fn remove(&self, account_id: i64, application_id: i64, event_key: &str, entries: &IndexEntries) -> TapglueResult<()> {
        self.apply(account_id, application_id, event_key, entries, &IndexEntries::default())
            .await
    }

    /// Move an event from its old index entries to its new ones, touching only what changed
    pub async fn apply(
        &self,
        account_id: i64,
        application_id: i64,
        event_key: &str,
        old: &IndexEntries,
        new: &IndexEntries,
    ) -> TapglueResult<()> {
        let (a, b) = (account_id, application_id);

        if old.geo != new.geo {
            let geo_key = keys::geo(a, b);
            if old.geo.is_some() {
                self.kv
                    .geo_remove(&geo_key, event_key)
                    .await
                    .map_err(|e| partial_write(&geo_key, e.into()))?;
            }
            if let Some((lat, lon)) = new.geo {
                self.kv
                    .geo_add(&geo_key, lon, lat, event_key)
                    .await
                    .map_err(|e| partial_write(&geo_key, e.into()))?;
            }
        }

        if old.object != new.object {
            if let Some(object_id) = &old.object {
                let set = keys::object(a, b, object_id);
                self.kv
                    .srem(&set, event_key)
                    .await
                    .map_err(|e| partial_write(&set, e.into()))?;
            }
            if let Some(object_id) = &new.object {
                let set = keys::object(a, b, object_id);
                self.kv
                    .sadd(&set, event_key)
                    .await
                    .map_err(|e| partial_write(&set, e.into()))?;
            }
        }

        if old.location != new.location {
            if let Some(label) = &old.location {
                let set = keys::location(a, b, label);
                self.kv
                    .srem(&set, event_key)
                    .await
                    .map_err(|e| partial_write(&set, e.into()))?;
            }
            if let Some(label) = &new.location {
                let set = keys::location(a, b, label);
                self.kv
                    .sadd(&set, event_key)
                    .await
                    .map_err(|e| partial_write(&set, e.into()))?;
            }
        }

        Ok(())
    }

    /// Event keys within `radius_m` meters, nearest first
    pub async fn near(&self, account_id: i64, application_id: i64, latitude: f64, longitude: f64, radius_m: f64) -> TapglueResult<Vec<String>> {
        Ok(self
            .kv
            .geo_radius(&keys::geo(account_id, application_id), longitude, latitude, radius_m)
            .await?)
    }

    pub async fn by_object(&self, account_id: i64, application_id: i64, object_id: &str) -> TapglueResult<Vec<String>> {
        Ok(self
            .kv
            .smembers(&keys::object(account_id, application_id, object_id))
            .await?)
    }

    pub async fn by_location(&self, account_id: i64, application_id: i64, label: &str) -> TapglueResult<Vec<String>> {
        Ok(self
            .kv
            .smembers(&keys::location(account_id, application_id, label))
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;
    use crate::store::EventObject;

    fn event(lat: f64, lon: f64, object: &str, location: &str) -> Event {
        Event {
            verb: "like".into(),
            latitude: lat,
            longitude: lon,
            object: Some(EventObject {
                id: object.into(),
                kind: "article".into(),
                ..Default::default()
            }),
            location: Some(location.into()),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_entries_of_disabled_event_are_empty() {
        let mut e = event(1.0, 2.0, "o", "l");
        assert_eq!(IndexEntries::of(&e).object.as_deref(), Some("o"));
        e.enabled = false;
        assert_eq!(IndexEntries::of(&e), IndexEntries::default());
    }

    #[tokio::test]
    async fn test_add_and_remove() {
        let indexer = EventIndexer::new(Arc::new(MemoryStore::new()));
        let entries = IndexEntries::of(&event(52.52, 13.30, "article-1", "berlin"));

        indexer.add(1, 1, "ev1", &entries).await.unwrap();
        assert_eq!(indexer.near(1, 1, 52.52, 13.30, 100.0).await.unwrap(), vec!["ev1"]);
        assert_eq!(indexer.by_object(1, 1, "article-1").await.unwrap(), vec!["ev1"]);
        assert_eq!(indexer.by_location(1, 1, "berlin").await.unwrap(), vec!["ev1"]);

        indexer.remove(1, 1, "ev1", &entries).await.unwrap();
        assert!(indexer.near(1, 1, 52.52, 13.30, 100.0).await.unwrap().is_empty());
        assert!(indexer.by_object(1, 1, "article-1").await.unwrap().is_empty());
        assert!(indexer.by_location(1, 1, "berlin").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_apply_moves_changed_entries_only() {
        let indexer = EventIndexer::new(Arc::new(MemoryStore::new()));
        let old = IndexEntries::of(&event(52.52, 13.30, "article-1", "berlin"));
        let new = IndexEntries::of(&event(48.85, 2.35, "article-1", "paris"));

        indexer.add(1, 1, "ev1", &old).await.unwrap();
        indexer.apply(1, 1, "ev1", &old, &new).await.unwrap();

        assert!(indexer.near(1, 1, 52.52, 13.30, 1000.0).await.unwrap().is_empty());
        assert_eq!(indexer.near(1, 1, 48.85, 2.35, 1000.0).await.unwrap(), vec!["ev1"]);
        assert_eq!(indexer.by_object(1, 1, "article-1").await.unwrap(), vec!["ev1"]);
        assert!(indexer.by_location(1, 1, "berlin").await.unwrap().is_empty());
        assert_eq!(indexer.by_location(1, 1, "paris").await.unwrap(), vec!["ev1"]);
    }
}
