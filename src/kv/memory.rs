/// In-process backend for the key/value seam
///
/// Mirrors the observable Redis semantics the core depends on: DECR creates missing
/// counters at zero, SET clears a pending expiry, empty collections disappear, sorted
/// sets break score ties by member in reverse order and geo distances use Redis' earth
/// radius.
use super::{KvResult, KvStore, StoreError};
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::time::{Duration, Instant};

/// Earth radius used by Redis geo commands, in meters
const EARTH_RADIUS_M: f64 = 6372797.560856;

#[derive(Debug, Clone)]
enum Value {
    Str(String),
    List(VecDeque<String>),
    ZSet(HashMap<String, f64>),
    Set(BTreeSet<String>),
    Hash(HashMap<String, String>),
    /// member -> (longitude, latitude)
    Geo(HashMap<String, (f64, f64)>),
}

impl Value {
    fn is_empty(&self) -> bool {
        match self {
            Value::Str(_) => false,
            Value::List(l) => l.is_empty(),
            Value::ZSet(z) => z.is_empty(),
            Value::Set(s) => s.is_empty(),
            Value::Hash(h) => h.is_empty(),
            Value::Geo(g) => g.is_empty(),
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

#[derive(Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    /// Live entry for a key, evicting it first when its TTL has passed
    fn live(&mut self, key: &str) -> Option<&mut Entry> {
        let now = Instant::now();
        if self.entries.get(key).map(|e| e.is_expired(now)).unwrap_or(false) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn live_value(&mut self, key: &str) -> Option<&Value> {
        self.live(key).map(|e| &e.value)
    }

    /// Existing value of the expected kind, or a fresh one
    fn value_or_insert(
        &mut self,
        key: &str,
        fresh: fn() -> Value,
        matches: fn(&Value) -> bool,
    ) -> KvResult<&mut Value> {
        if self.live(key).is_none() {
            self.entries.insert(key.to_string(), Entry::new(fresh()));
        }
        match self.entries.get_mut(key) {
            Some(entry) if matches(&entry.value) => Ok(&mut entry.value),
            _ => Err(StoreError::WrongType(key.to_string())),
        }
    }

    fn drop_if_empty(&mut self, key: &str) {
        if self.entries.get(key).map(|e| e.value.is_empty()).unwrap_or(false) {
            self.entries.remove(key);
        }
    }

    fn add_to_counter(&mut self, key: &str, delta: i64) -> KvResult<i64> {
        let current = match self.live(key) {
            None => 0,
            Some(Entry {
                value: Value::Str(s),
                ..
            }) => s
                .parse::<i64>()
                .map_err(|_| StoreError::NotAnInteger(key.to_string()))?,
            Some(_) => return Err(StoreError::WrongType(key.to_string())),
        };
        let next = current + delta;
        match self.live(key) {
            // INCR/DECR keep the existing TTL
            Some(entry) => entry.value = Value::Str(next.to_string()),
            None => {
                self.entries
                    .insert(key.to_string(), Entry::new(Value::Str(next.to_string())));
            }
        }
        Ok(next)
    }
}

/// Process-local store
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Keyspace>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> KvResult<MutexGuard<'_, Keyspace>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn wrong_type(key: &str) -> StoreError {
    StoreError::WrongType(key.to_string())
}

/// Great-circle distance in meters between two (longitude, latitude) points
fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lat1r, lat2r) = (lat1.to_radians(), lat2.to_radians());
    let u = ((lat2r - lat1r) / 2.0).sin();
    let v = ((lon2 - lon1).to_radians() / 2.0).sin();
    2.0 * EARTH_RADIUS_M * (u * u + lat1r.cos() * lat2r.cos() * v * v).sqrt().asin()
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> KvResult<Option<String>> {
        let mut ks = self.lock()?;
        match ks.live_value(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s.clone())),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn mget(&self, keys: &[String]) -> KvResult<Vec<Option<String>>> {
        let mut ks = self.lock()?;
        Ok(keys
            .iter()
            .map(|key| match ks.live_value(key) {
                // MGET reports non-string keys as missing
                Some(Value::Str(s)) => Some(s.clone()),
                _ => None,
            })
            .collect())
    }

    async fn set(&self, key: &str, value: &str) -> KvResult<()> {
        let mut ks = self.lock()?;
        ks.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str) -> KvResult<bool> {
        let mut ks = self.lock()?;
        if ks.live(key).is_some() {
            return Ok(false);
        }
        ks.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
        Ok(true)
    }

    async fn set_xx(&self, key: &str, value: &str) -> KvResult<bool> {
        let mut ks = self.lock()?;
        if ks.live(key).is_none() {
            return Ok(false);
        }
        ks.entries
            .insert(key.to_string(), Entry::new(Value::Str(value.to_string())));
        Ok(true)
    }

    async fn set_nx_ex(&self, key: &str, value: &str, ttl_secs: u64) -> KvResult<bool> {
        let mut ks = self.lock()?;
        if ks.live(key).is_some() {
            return Ok(false);
        }
        ks.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Str(value.to_string()),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_secs)),
            },
        );
        Ok(true)
    }

    async fn del(&self, keys: &[String]) -> KvResult<u64> {
        let mut ks = self.lock()?;
        let mut removed = 0;
        for key in keys {
            if ks.live(key).is_some() {
                ks.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn exists(&self, key: &str) -> KvResult<bool> {
        let mut ks = self.lock()?;
        Ok(ks.live(key).is_some())
    }

    async fn incr(&self, key: &str) -> KvResult<i64> {
        self.lock()?.add_to_counter(key, 1)
    }

    async fn decr(&self, key: &str) -> KvResult<i64> {
        self.lock()?.add_to_counter(key, -1)
    }

    async fn expire(&self, key: &str, ttl_secs: u64) -> KvResult<bool> {
        let mut ks = self.lock()?;
        match ks.live(key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_secs));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn ttl(&self, key: &str) -> KvResult<i64> {
        let mut ks = self.lock()?;
        let now = Instant::now();
        Ok(match ks.live(key) {
            None => -2,
            Some(Entry {
                expires_at: None, ..
            }) => -1,
            Some(Entry {
                expires_at: Some(at),
                ..
            }) => {
                let remaining = at.saturating_duration_since(now);
                // Round up like Redis does for partial seconds
                remaining.as_millis().div_ceil(1000) as i64
            }
        })
    }

    async fn lpush(&self, key: &str, value: &str) -> KvResult<()> {
        let mut ks = self.lock()?;
        match ks.value_or_insert(key, || Value::List(VecDeque::new()), |v| {
            matches!(v, Value::List(_))
        })? {
            Value::List(list) => list.push_front(value.to_string()),
            _ => return Err(wrong_type(key)),
        }
        Ok(())
    }

    async fn lrem(&self, key: &str, value: &str) -> KvResult<u64> {
        let mut ks = self.lock()?;
        let removed = match ks.live(key) {
            None => return Ok(0),
            Some(Entry {
                value: Value::List(list),
                ..
            }) => {
                let before = list.len();
                list.retain(|item| item != value);
                (before - list.len()) as u64
            }
            Some(_) => return Err(wrong_type(key)),
        };
        ks.drop_if_empty(key);
        Ok(removed)
    }

    async fn lrange(&self, key: &str) -> KvResult<Vec<String>> {
        let mut ks = self.lock()?;
        match ks.live_value(key) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> KvResult<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut ks = self.lock()?;
        match ks.value_or_insert(key, || Value::ZSet(HashMap::new()), |v| {
            matches!(v, Value::ZSet(_))
        })? {
            Value::ZSet(zset) => {
                for (score, member) in members {
                    zset.insert(member.clone(), *score);
                }
            }
            _ => return Err(wrong_type(key)),
        }
        Ok(())
    }

    async fn zrem(&self, key: &str, members: &[String]) -> KvResult<u64> {
        let mut ks = self.lock()?;
        let removed = match ks.live(key) {
            None => return Ok(0),
            Some(Entry {
                value: Value::ZSet(zset),
                ..
            }) => members
                .iter()
                .filter(|m| zset.remove(m.as_str()).is_some())
                .count() as u64,
            Some(_) => return Err(wrong_type(key)),
        };
        ks.drop_if_empty(key);
        Ok(removed)
    }

    async fn zrevrange_with_scores(&self, key: &str) -> KvResult<Vec<(String, f64)>> {
        let mut ks = self.lock()?;
        match ks.live_value(key) {
            None => Ok(Vec::new()),
            Some(Value::ZSet(zset)) => {
                let mut items: Vec<(String, f64)> =
                    zset.iter().map(|(m, s)| (m.clone(), *s)).collect();
                items.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
                Ok(items)
            }
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn zscore(&self, key: &str, member: &str) -> KvResult<Option<f64>> {
        let mut ks = self.lock()?;
        match ks.live_value(key) {
            None => Ok(None),
            Some(Value::ZSet(zset)) => Ok(zset.get(member).copied()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn sadd(&self, key: &str, member: &str) -> KvResult<()> {
        let mut ks = self.lock()?;
        match ks.value_or_insert(key, || Value::Set(BTreeSet::new()), |v| {
            matches!(v, Value::Set(_))
        })? {
            Value::Set(set) => {
                set.insert(member.to_string());
            }
            _ => return Err(wrong_type(key)),
        }
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> KvResult<()> {
        let mut ks = self.lock()?;
        match ks.live(key) {
            None => return Ok(()),
            Some(Entry {
                value: Value::Set(set),
                ..
            }) => {
                set.remove(member);
            }
            Some(_) => return Err(wrong_type(key)),
        }
        ks.drop_if_empty(key);
        Ok(())
    }

    async fn smembers(&self, key: &str) -> KvResult<Vec<String>> {
        let mut ks = self.lock()?;
        match ks.live_value(key) {
            None => Ok(Vec::new()),
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn hset_multiple(&self, key: &str, fields: &[(&str, String)]) -> KvResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut ks = self.lock()?;
        match ks.value_or_insert(key, || Value::Hash(HashMap::new()), |v| {
            matches!(v, Value::Hash(_))
        })? {
            Value::Hash(hash) => {
                for (field, value) in fields {
                    hash.insert(field.to_string(), value.clone());
                }
            }
            _ => return Err(wrong_type(key)),
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> KvResult<HashMap<String, String>> {
        let mut ks = self.lock()?;
        match ks.live_value(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(wrong_type(key)),
        }
    }

    async fn geo_add(&self, key: &str, longitude: f64, latitude: f64, member: &str) -> KvResult<()> {
        let mut ks = self.lock()?;
        match ks.value_or_insert(key, || Value::Geo(HashMap::new()), |v| {
            matches!(v, Value::Geo(_))
        })? {
            Value::Geo(points) => {
                points.insert(member.to_string(), (longitude, latitude));
            }
            _ => return Err(wrong_type(key)),
        }
        Ok(())
    }

    async fn geo_remove(&self, key: &str, member: &str) -> KvResult<()> {
        let mut ks = self.lock()?;
        match ks.live(key) {
            None => return Ok(()),
            Some(Entry {
                value: Value::Geo(points),
                ..
            }) => {
                points.remove(member);
            }
            Some(_) => return Err(wrong_type(key)),
        }
        ks.drop_if_empty(key);
        Ok(())
    }

    async fn geo_radius(
        &self,
        key: &str,
        longitude: f64,
        latitude: f64,
        radius_m: f64,
    ) -> KvResult<Vec<String>> {
        let mut ks = self.lock()?;
        let points = match ks.live_value(key) {
            None => return Ok(Vec::new()),
            Some(Value::Geo(points)) => points,
            Some(_) => return Err(wrong_type(key)),
        };

        let mut hits: Vec<(f64, &String)> = points
            .iter()
            .map(|(member, (lon, lat))| (haversine_m(longitude, latitude, *lon, *lat), member))
            .filter(|(distance, _)| *distance <= radius_m)
            .collect();
        hits.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(b.1)));

        Ok(hits.into_iter().map(|(_, member)| member.clone()).collect())
    }

    async fn ping(&self) -> KvResult<()> {
        self.lock().map(|_| ())
    }
}
