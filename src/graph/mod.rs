/// Connection graph between end-users
///
/// An edge U->V moves through pending, confirmed and disabled. While it is confirmed V
/// is in U's `following` set and U is in V's `followers` set (both sorted sets scored by
/// confirmation time, so repeated confirms never duplicate), and V's events are
/// mirrored into U's feed.
use crate::error::{TapglueError, TapglueResult};
use crate::feed::FeedEngine;
use crate::keys;
use crate::kv::KvStore;
use crate::store::{encode, partial_write, read_record, Connection, ConnectionState, EndUser, EntityStore};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct ConnectionEngine {
    kv: Arc<dyn KvStore>,
    store: EntityStore,
    feed: FeedEngine,
}

fn edge_key(conn: &Connection) -> String {
    keys::connection(conn.account_id, conn.application_id, conn.user_from_id, conn.user_to_id)
}

impl ConnectionEngine {
    pub fn new(store: EntityStore, feed: FeedEngine) -> Self {
        Self {
            kv: store.kv().clone(),
            store,
            feed,
        }
    }

    async fn ensure_user(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<EndUser> {
        self.store
            .read_end_user(account_id, application_id, user_id)
            .await
            .map_err(|e| match e {
                TapglueError::NotFound(_) => TapglueError::NotFound(format!("user {} does not exist", user_id)),
                other => other,
            })
    }

    /// Create an edge; an edge created enabled is confirmed right away
    pub async fn write(&self, account_id: i64, application_id: i64, mut conn: Connection) -> TapglueResult<Connection> {
        if conn.user_from_id == conn.user_to_id {
            return Err(TapglueError::BadRequest("user cannot connect to itself".to_string()));
        }
        self.ensure_user(account_id, application_id, conn.user_from_id).await?;
        self.ensure_user(account_id, application_id, conn.user_to_id).await?;

        let confirm = conn.enabled;
        let now = Utc::now();
        conn.account_id = account_id;
        conn.application_id = application_id;
        conn.enabled = false;
        conn.confirmed_at = None;
        conn.created_at = now;
        conn.updated_at = now;

        let key = edge_key(&conn);
        if !self.kv.set_nx(&key, &encode(&conn)?).await? {
            return Err(TapglueError::Conflict("connection".to_string()));
        }

        let outgoing = keys::user_connections(account_id, application_id, conn.user_from_id);
        self.kv.lrem(&outgoing, &key).await?;
        self.kv
            .lpush(&outgoing, &key)
            .await
            .map_err(|e| partial_write(&outgoing, e.into()))?;

        debug!(account_id, application_id, from = conn.user_from_id, to = conn.user_to_id, "connection created");

        if confirm {
            return self.confirm(&conn).await;
        }
        Ok(conn)
    }

    /// Confirm an existing edge, link both users and back-fill the follower's feed
    pub async fn confirm(&self, existing: &Connection) -> TapglueResult<Connection> {
        let now = Utc::now();
        let conn = Connection {
            enabled: true,
            confirmed_at: Some(now),
            updated_at: now,
            ..existing.clone()
        };

        let key = edge_key(&conn);
        if !self.kv.set_xx(&key, &encode(&conn)?).await? {
            return Err(TapglueError::NotFound("connection not found".to_string()).for_mutation());
        }

        self.link(&conn, now).await?;
        info!(
            account_id = conn.account_id,
            application_id = conn.application_id,
            from = conn.user_from_id,
            to = conn.user_to_id,
            "connection confirmed"
        );
        Ok(conn)
    }

    /// Replace an edge and apply the state transition it implies
    pub async fn update(&self, existing: &Connection, mut updated: Connection) -> TapglueResult<Connection> {
        updated.account_id = existing.account_id;
        updated.application_id = existing.application_id;
        updated.user_from_id = existing.user_from_id;
        updated.user_to_id = existing.user_to_id;
        updated.created_at = existing.created_at;
        updated.confirmed_at = existing.confirmed_at;
        updated.updated_at = Utc::now();

        let was_linked = existing.state() == ConnectionState::Confirmed;
        if updated.enabled && updated.confirmed_at.is_none() {
            updated.confirmed_at = Some(updated.updated_at);
        }
        let is_linked = updated.state() == ConnectionState::Confirmed;

        let key = edge_key(existing);
        if !self.kv.set_xx(&key, &encode(&updated)?).await? {
            return Err(TapglueError::NotFound("connection not found".to_string()).for_mutation());
        }

        match (was_linked, is_linked) {
            (true, false) => self.unlink(&updated).await?,
            (false, true) => self.link(&updated, updated.updated_at).await?,
            _ => {}
        }
        Ok(updated)
    }

    pub async fn read(&self, account_id: i64, application_id: i64, user_from_id: i64, user_to_id: i64) -> TapglueResult<Connection> {
        read_record(
            self.kv.as_ref(),
            &keys::connection(account_id, application_id, user_from_id, user_to_id),
            "connection",
        )
        .await
    }

    /// Remove an edge along with the follow links and feed entries it produced
    pub async fn delete(&self, account_id: i64, application_id: i64, user_from_id: i64, user_to_id: i64) -> TapglueResult<()> {
        let conn = self.read(account_id, application_id, user_from_id, user_to_id).await?;
        let key = edge_key(&conn);
        self.kv.del(&[key.clone()]).await?;

        let outgoing = keys::user_connections(account_id, application_id, user_from_id);
        self.kv
            .lrem(&outgoing, &key)
            .await
            .map_err(|e| partial_write(&outgoing, e.into()))?;

        self.unlink(&conn).await?;
        info!(account_id, application_id, from = user_from_id, to = user_to_id, "connection deleted");
        Ok(())
    }

    async fn link(&self, conn: &Connection, at: DateTime<Utc>) -> TapglueResult<()> {
        let (a, b) = (conn.account_id, conn.application_id);
        let score = at.timestamp() as f64;

        let following = keys::following(a, b, conn.user_from_id);
        self.kv
            .zadd(&following, &[(score, keys::end_user(a, b, conn.user_to_id))])
            .await
            .map_err(|e| partial_write(&following, e.into()))?;

        let followers = keys::followers(a, b, conn.user_to_id);
        self.kv
            .zadd(&followers, &[(score, keys::end_user(a, b, conn.user_from_id))])
            .await
            .map_err(|e| partial_write(&followers, e.into()))?;

        self.feed
            .backfill(a, b, conn.user_from_id, conn.user_to_id)
            .await
    }

    async fn unlink(&self, conn: &Connection) -> TapglueResult<()> {
        let (a, b) = (conn.account_id, conn.application_id);

        let following = keys::following(a, b, conn.user_from_id);
        self.kv
            .zrem(&following, &[keys::end_user(a, b, conn.user_to_id)])
            .await
            .map_err(|e| partial_write(&following, e.into()))?;

        let followers = keys::followers(a, b, conn.user_to_id);
        self.kv
            .zrem(&followers, &[keys::end_user(a, b, conn.user_from_id)])
            .await
            .map_err(|e| partial_write(&followers, e.into()))?;

        self.feed.purge(a, b, conn.user_from_id, conn.user_to_id).await
    }

    async fn users_in(&self, set: &str) -> TapglueResult<Vec<EndUser>> {
        let members: Vec<String> = self
            .kv
            .zrevrange_with_scores(set)
            .await?
            .into_iter()
            .map(|(member, _)| member)
            .collect();
        Ok(self
            .store
            .read_end_users_by_key(&members)
            .await?
            .iter()
            .map(EndUser::public)
            .collect())
    }

    /// Users `user_id` follows, most recently confirmed first
    pub async fn list_following(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<Vec<EndUser>> {
        self.users_in(&keys::following(account_id, application_id, user_id))
            .await
    }

    /// Users following `user_id`, most recently confirmed first
    pub async fn list_followers(&self, account_id: i64, application_id: i64, user_id: i64) -> TapglueResult<Vec<EndUser>> {
        self.users_in(&keys::followers(account_id, application_id, user_id))
            .await
    }

    /// Connect `user` both ways with every known user behind the given external ids
    ///
    /// Unknown ids and users already connected from `user` are skipped; existing
    /// disabled edges stay disabled.
    pub async fn social_connect(&self, user: &EndUser, platform: &str, external_ids: &[String]) -> TapglueResult<Vec<EndUser>> {
        let (a, b) = (user.account_id, user.application_id);
        let mut seen = HashSet::new();
        let mut connected = Vec::new();

        for external_id in external_ids {
            if external_id.is_empty() || !seen.insert(external_id.as_str()) {
                continue;
            }

            let Some(other) = self
                .store
                .find_end_user_by_social(a, b, platform, external_id)
                .await?
            else {
                continue;
            };
            if other.id == user.id {
                continue;
            }
            if self.kv.exists(&keys::connection(a, b, user.id, other.id)).await? {
                continue;
            }

            self.write(a, b, Self::confirmed_edge(user.id, other.id)).await?;
            if !self.kv.exists(&keys::connection(a, b, other.id, user.id)).await? {
                self.write(a, b, Self::confirmed_edge(other.id, user.id)).await?;
            }
            connected.push(other.public());
        }

        info!(account_id = a, application_id = b, user_id = user.id, platform, connected = connected.len(), "social connect");
        Ok(connected)
    }

    fn confirmed_edge(from: i64, to: i64) -> Connection {
        Connection {
            user_from_id: from,
            user_to_id: to,
            enabled: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::store;
    use crate::store::Event;
    use std::collections::HashMap;

    struct Fixture {
        graph: ConnectionEngine,
        feed: FeedEngine,
        store: EntityStore,
    }

    fn fixture() -> Fixture {
        let store = store();
        let feed = FeedEngine::new(store.kv().clone());
        Fixture {
            graph: ConnectionEngine::new(store.clone(), feed.clone()),
            feed,
            store,
        }
    }

    async fn user(store: &EntityStore, name: &str, facebook: Option<&str>) -> EndUser {
        let mut social_ids = HashMap::new();
        if let Some(fb) = facebook {
            social_ids.insert("facebook".to_string(), fb.to_string());
        }
        store
            .create_end_user(
                1,
                1,
                EndUser {
                    user_name: Some(name.to_string()),
                    password: Some("password".into()),
                    social_ids,
                    ..Default::default()
                },
            )
            .await
            .unwrap()
    }

    fn edge(from: i64, to: i64, enabled: bool) -> Connection {
        Connection {
            user_from_id: from,
            user_to_id: to,
            enabled,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_pending_then_confirm() {
        let f = fixture();
        let u1 = user(&f.store, "u1", None).await;
        let u2 = user(&f.store, "u2", None).await;

        let pending = f.graph.write(1, 1, edge(u1.id, u2.id, false)).await.unwrap();
        assert_eq!(pending.state(), ConnectionState::Pending);
        assert!(f.graph.list_following(1, 1, u1.id).await.unwrap().is_empty());

        let confirmed = f.graph.confirm(&pending).await.unwrap();
        assert_eq!(confirmed.state(), ConnectionState::Confirmed);

        let following = f.graph.list_following(1, 1, u1.id).await.unwrap();
        assert_eq!(following.len(), 1);
        assert_eq!(following[0].id, u2.id);
        assert!(following[0].password.is_none());

        let followers = f.graph.list_followers(1, 1, u2.id).await.unwrap();
        assert_eq!(followers[0].id, u1.id);
    }

    #[tokio::test]
    async fn test_self_edge_and_duplicates_rejected() {
        let f = fixture();
        let u1 = user(&f.store, "u1", None).await;
        let u2 = user(&f.store, "u2", None).await;

        assert!(matches!(
            f.graph.write(1, 1, edge(u1.id, u1.id, true)).await,
            Err(TapglueError::BadRequest(_))
        ));

        f.graph.write(1, 1, edge(u1.id, u2.id, true)).await.unwrap();
        assert!(matches!(
            f.graph.write(1, 1, edge(u1.id, u2.id, true)).await,
            Err(TapglueError::Conflict(_))
        ));
        // The reverse direction is an independent edge
        f.graph.write(1, 1, edge(u2.id, u1.id, true)).await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_user_rejected() {
        let f = fixture();
        let u1 = user(&f.store, "u1", None).await;
        assert!(matches!(
            f.graph.write(1, 1, edge(u1.id, 42, false)).await,
            Err(TapglueError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_reconfirm_does_not_duplicate() {
        let f = fixture();
        let u1 = user(&f.store, "u1", None).await;
        let u2 = user(&f.store, "u2", None).await;

        let conn = f.graph.write(1, 1, edge(u1.id, u2.id, true)).await.unwrap();
        f.graph.confirm(&conn).await.unwrap();
        f.graph.confirm(&conn).await.unwrap();

        assert_eq!(f.graph.list_following(1, 1, u1.id).await.unwrap().len(), 1);
        assert_eq!(f.graph.list_followers(1, 1, u2.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_confirm_backfills_and_disable_purges() {
        let f = fixture();
        let u1 = user(&f.store, "u1", None).await;
        let u2 = user(&f.store, "u2", None).await;

        let earlier = f
            .feed
            .write_event(1, 1, u2.id, Event { verb: "post".into(), ..Default::default() })
            .await
            .unwrap();

        let conn = f.graph.write(1, 1, edge(u1.id, u2.id, true)).await.unwrap();
        assert_eq!(f.feed.combined_feed(1, 1, u1.id).await.unwrap(), vec![earlier]);

        let disabled = f
            .graph
            .update(&conn, Connection { enabled: false, ..conn.clone() })
            .await
            .unwrap();
        assert_eq!(disabled.state(), ConnectionState::Disabled);
        assert!(f.feed.combined_feed(1, 1, u1.id).await.unwrap().is_empty());
        assert!(f.graph.list_following(1, 1, u1.id).await.unwrap().is_empty());

        f.graph
            .update(&disabled, Connection { enabled: true, ..disabled.clone() })
            .await
            .unwrap();
        assert_eq!(f.feed.combined_feed(1, 1, u1.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unlinks() {
        let f = fixture();
        let u1 = user(&f.store, "u1", None).await;
        let u2 = user(&f.store, "u2", None).await;
        f.graph.write(1, 1, edge(u1.id, u2.id, true)).await.unwrap();
        f.feed
            .write_event(1, 1, u2.id, Event { verb: "post".into(), ..Default::default() })
            .await
            .unwrap();

        f.graph.delete(1, 1, u1.id, u2.id).await.unwrap();

        assert!(f.feed.combined_feed(1, 1, u1.id).await.unwrap().is_empty());
        assert!(f.graph.list_followers(1, 1, u2.id).await.unwrap().is_empty());
        assert!(matches!(
            f.graph.read(1, 1, u1.id, u2.id).await,
            Err(TapglueError::NotFound(_))
        ));
        assert!(f
            .store
            .kv()
            .lrange(&keys::user_connections(1, 1, u1.id))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_social_connect() {
        let f = fixture();
        let mut known = Vec::new();
        for fb in ["fb1", "fb2", "fb3", "fb4"] {
            known.push(user(&f.store, &format!("user-{}", fb), Some(fb)).await);
        }
        let newcomer = user(&f.store, "newcomer", None).await;

        let ids = vec!["fb2".to_string(), "fb4".to_string(), "fb9".to_string(), "fb2".to_string()];
        let connected = f.graph.social_connect(&newcomer, "facebook", &ids).await.unwrap();

        let mut got: Vec<i64> = connected.iter().map(|u| u.id).collect();
        got.sort();
        assert_eq!(got, vec![known[1].id, known[3].id]);

        for other in [&known[1], &known[3]] {
            let there = f.graph.read(1, 1, newcomer.id, other.id).await.unwrap();
            let back = f.graph.read(1, 1, other.id, newcomer.id).await.unwrap();
            assert_eq!(there.state(), ConnectionState::Confirmed);
            assert_eq!(back.state(), ConnectionState::Confirmed);
        }

        // Already connected users are skipped on a second run
        let again = f.graph.social_connect(&newcomer, "facebook", &ids).await.unwrap();
        assert!(again.is_empty());
    }
}
