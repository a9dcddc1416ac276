/// Event timelines and follower feeds
///
/// Every enabled event sits in its author's `events` sorted set and in the `feed` sorted
/// set of each follower captured at write time, scored by creation time in unix
/// seconds. Disabling or deleting an event takes it back out of both, and out of the
/// geo/object/location indexes.
mod fanout;
mod indexer;

pub use fanout::{FanoutJob, FanoutOp, FanoutQueue, FanoutWorker};
pub use indexer::{EventIndexer, IndexEntries};

use crate::error::{TapglueError, TapglueResult};
use crate::keys;
use crate::kv::KvStore;
use crate::minter::IdMinter;
use crate::store::{encode, partial_write, read_record, read_records, Event};
use chrono::Utc;
use std::cmp::Reverse;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Default number of follower feeds written inline per event
pub const DEFAULT_INLINE_FANOUT: usize = 10_000;

#[derive(Clone)]
pub struct FeedEngine {
    kv: Arc<dyn KvStore>,
    ids: IdMinter,
    indexer: EventIndexer,
    queue: Option<FanoutQueue>,
    inline_bound: usize,
}

fn score_of(event: &Event) -> f64 {
    event.created_at.timestamp() as f64
}

fn event_key(event: &Event) -> String {
    keys::event(event.account_id, event.application_id, event.user_id, event.id)
}

impl FeedEngine {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            ids: IdMinter::new(kv.clone()),
            indexer: EventIndexer::new(kv.clone()),
            kv,
            queue: None,
            inline_bound: DEFAULT_INLINE_FANOUT,
        }
    }

    /// Queue fan-out beyond `inline_bound` followers to a background worker
    pub fn with_fanout_queue(mut self, queue: FanoutQueue, inline_bound: usize) -> Self {
        self.queue = Some(queue);
        self.inline_bound = inline_bound;
        self
    }

    pub fn indexer(&self) -> &EventIndexer {
        &self.indexer
    }

    /// Feed keys of everyone currently following `user_id`
    async fn follower_feeds(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<Vec<String>> {
        let followers = self
            .kv
            .zrevrange_with_scores(&keys::followers(account_id, application_id, user_id))
            .await?;
        Ok(followers
            .into_iter()
            .map(|(user_key, _)| keys::feed_of(&user_key))
            .collect())
    }

    /// Apply an event to follower feeds, inline up to the bound and queued past it
    async fn fan_out(&self, event_key: &str, mut feeds: Vec<String>, op: FanoutOp) -> TapglueResult<()> {
        if let Some(queue) = &self.queue {
            if feeds.len() > self.inline_bound {
                let rest = feeds.split_off(self.inline_bound);
                let job = FanoutJob {
                    event_key: event_key.to_string(),
                    feeds: rest,
                    op,
                };
                if let Err(job) = queue.try_enqueue(job) {
                    warn!(event = %event_key, feeds = job.feeds.len(), "fan-out queue unavailable, writing inline");
                    feeds.extend(job.feeds);
                } else {
                    debug!(event = %event_key, "queued fan-out remainder");
                }
            }
        }

        for feed in &feeds {
            let result = match op {
                FanoutOp::Insert { score } => self.kv.zadd(feed, &[(score, event_key.to_string())]).await,
                FanoutOp::Remove => self.kv.zrem(feed, &[event_key.to_string()]).await.map(|_| ()),
            };
            result.map_err(|e| partial_write(feed, e.into()))?;
        }
        Ok(())
    }

    /// Store a new event, index it and push it into every follower feed
    pub async fn write_event(&self, account_id: i64, application_id: i64, user_id: i64, mut event: Event) -> TapglueResult<Event> {
        let now = Utc::now();
        event.id = self.ids.event_id(account_id, application_id).await?;
        event.account_id = account_id;
        event.application_id = application_id;
        event.user_id = user_id;
        event.enabled = true;
        event.created_at = now;
        event.updated_at = now;

        let key = event_key(&event);
        if !self.kv.set_nx(&key, &encode(&event)?).await? {
            return Err(TapglueError::Conflict("event".to_string()));
        }

        let score = score_of(&event);
        let timeline = keys::user_events(account_id, application_id, user_id);
        self.kv
            .zadd(&timeline, &[(score, key.clone())])
            .await
            .map_err(|e| partial_write(&timeline, e.into()))?;

        self.indexer
            .add(account_id, application_id, &key, &IndexEntries::of(&event))
            .await?;

        let feeds = self.follower_feeds(account_id, application_id, user_id).await?;
        let fanned = feeds.len();
        self.fan_out(&key, feeds, FanoutOp::Insert { score }).await?;

        info!(account_id, application_id, user_id, event_id = event.id, followers = fanned, "event written");
        Ok(event)
    }

    pub async fn read_event(&self, account_id: i64, application_id: i64, user_id: i64, event_id: i64) -> TapglueResult<Event> {
        read_record(
            self.kv.as_ref(),
            &keys::event(account_id, application_id, user_id, event_id),
            "event",
        )
        .await
    }

    /// Replace an event, moving it between timelines and indexes as its state changes
    pub async fn update_event(&self, existing: &Event, mut updated: Event) -> TapglueResult<Event> {
        updated.id = existing.id;
        updated.account_id = existing.account_id;
        updated.application_id = existing.application_id;
        updated.user_id = existing.user_id;
        updated.created_at = existing.created_at;
        updated.updated_at = Utc::now();

        let key = event_key(existing);
        if !self.kv.set_xx(&key, &encode(&updated)?).await? {
            return Err(TapglueError::NotFound("event not found".to_string()).for_mutation());
        }

        let (a, b, u) = (existing.account_id, existing.application_id, existing.user_id);
        let score = score_of(existing);
        let timeline = keys::user_events(a, b, u);

        match (existing.enabled, updated.enabled) {
            (true, false) => {
                self.kv
                    .zrem(&timeline, &[key.clone()])
                    .await
                    .map_err(|e| partial_write(&timeline, e.into()))?;
                let feeds = self.follower_feeds(a, b, u).await?;
                self.fan_out(&key, feeds, FanoutOp::Remove).await?;
            }
            (false, true) => {
                self.kv
                    .zadd(&timeline, &[(score, key.clone())])
                    .await
                    .map_err(|e| partial_write(&timeline, e.into()))?;
                let feeds = self.follower_feeds(a, b, u).await?;
                self.fan_out(&key, feeds, FanoutOp::Insert { score }).await?;
            }
            _ => {}
        }

        self.indexer
            .apply(a, b, &key, &IndexEntries::of(existing), &IndexEntries::of(&updated))
            .await?;

        Ok(updated)
    }

    /// Remove an event from storage, timelines and indexes
    pub async fn delete_event(&self, event: &Event) -> TapglueResult<()> {
        let key = event_key(event);
        if self.kv.del(&[key.clone()]).await? == 0 {
            return Err(TapglueError::NotFound("event not found".to_string()));
        }

        let (a, b, u) = (event.account_id, event.application_id, event.user_id);
        let timeline = keys::user_events(a, b, u);
        self.kv
            .zrem(&timeline, &[key.clone()])
            .await
            .map_err(|e| partial_write(&timeline, e.into()))?;

        let feeds = self.follower_feeds(a, b, u).await?;
        self.fan_out(&key, feeds, FanoutOp::Remove).await?;

        self.indexer
            .remove(a, b, &key, &IndexEntries::of(event))
            .await?;

        info!(account_id = a, application_id = b, user_id = u, event_id = event.id, "event deleted");
        Ok(())
    }

    async fn events_in(&self, sorted_set: &str) -> TapglueResult<Vec<Event>> {
        let members: Vec<String> = self
            .kv
            .zrevrange_with_scores(sorted_set)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        Ok(newest_first(read_records(self.kv.as_ref(), &members).await?))
    }

    /// The user's own events, newest first
    pub async fn user_events(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<Vec<Event>> {
        self.events_in(&keys::user_events(account_id, application_id, user_id))
            .await
    }

    /// Events fanned out to the user from the people they follow, newest first
    pub async fn combined_feed(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<Vec<Event>> {
        self.events_in(&keys::feed(account_id, application_id, user_id))
            .await
    }

    /// Copy every event of `followed_id` into the feed of `follower_id`
    pub async fn backfill(&self, account_id: i64, application_id: i64, follower_id: i64, followed_id: i64) -> TapglueResult<()> {
        let entries: Vec<(f64, String)> = self
            .kv
            .zrevrange_with_scores(&keys::user_events(account_id, application_id, followed_id))
            .await?
            .into_iter()
            .map(|(member, score)| (score, member))
            .collect();

        let feed = keys::feed(account_id, application_id, follower_id);
        self.kv
            .zadd(&feed, &entries)
            .await
            .map_err(|e| partial_write(&feed, e.into()))?;

        debug!(account_id, application_id, follower_id, followed_id, events = entries.len(), "feed back-filled");
        Ok(())
    }

    /// Take every event of `followed_id` out of the feed of `follower_id`
    pub async fn purge(&self, account_id: i64, application_id: i64, follower_id: i64, followed_id: i64) -> TapglueResult<()> {
        let members: Vec<String> = self
            .kv
            .zrevrange_with_scores(&keys::user_events(account_id, application_id, followed_id))
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect();

        let feed = keys::feed(account_id, application_id, follower_id);
        self.kv
            .zrem(&feed, &members)
            .await
            .map_err(|e| partial_write(&feed, e.into()))?;

        debug!(account_id, application_id, follower_id, followed_id, events = members.len(), "feed purged");
        Ok(())
    }

    /// Events within `radius_m` meters of a point, nearest first
    pub async fn search_geo(&self, account_id: i64, application_id: i64, latitude: f64, longitude: f64, radius_m: f64) -> TapglueResult<Vec<Event>> {
        if radius_m < 0.0 || !radius_m.is_finite() {
            return Err(TapglueError::BadRequest("radius must be a non-negative number".to_string()));
        }
        let found = self
            .indexer
            .near(account_id, application_id, latitude, longitude, radius_m)
            .await?;
        read_records(self.kv.as_ref(), &found).await
    }

    /// Events about an object, newest first
    pub async fn search_object(&self, account_id: i64, application_id: i64, object_id: &str) -> TapglueResult<Vec<Event>> {
        let found = self.indexer.by_object(account_id, application_id, object_id).await?;
        Ok(newest_first(read_records(self.kv.as_ref(), &found).await?))
    }

    /// Events at a location label, newest first
    pub async fn search_location(&self, account_id: i64, application_id: i64, label: &str) -> TapglueResult<Vec<Event>> {
        let found = self.indexer.by_location(account_id, application_id, label).await?;
        Ok(newest_first(read_records(self.kv.as_ref(), &found).await?))
    }
}

/// Sorted-set order breaks score ties on member bytes; re-rank by write second, then id
fn newest_first(mut events: Vec<Event>) -> Vec<Event> {
    events.sort_by_key(|e| Reverse((e.created_at.timestamp(), e.id)));
    events
}
