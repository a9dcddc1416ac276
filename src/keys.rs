/// Key layout for every entity, index and list kept in the store
///
/// All functions are pure. Free-form segments (emails, usernames, object ids, location
/// labels, external social ids, tokens) are base64url-encoded without padding, so every
/// key is printable ASCII and free of separators coming from user input.
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

/// Encode a free-form key segment
pub fn segment(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(raw.as_bytes())
}

// ----- id counters -----

pub fn account_ids() -> String {
    "ids:account".to_string()
}

pub fn operator_ids(account_id: i64) -> String {
    format!("ids:acc:{}:users", account_id)
}

pub fn application_ids(account_id: i64) -> String {
    format!("ids:acc:{}:apps", account_id)
}

pub fn end_user_ids(account_id: i64, application_id: i64) -> String {
    format!("ids:acc:{}:app:{}:users", account_id, application_id)
}

pub fn event_ids(account_id: i64, application_id: i64) -> String {
    format!("ids:acc:{}:app:{}:events", account_id, application_id)
}

// ----- accounts and operators -----

pub fn account(account_id: i64) -> String {
    format!("account:{}", account_id)
}

/// List of operator keys
pub fn operators(account_id: i64) -> String {
    format!("account:{}:users", account_id)
}

pub fn operator(account_id: i64, operator_id: i64) -> String {
    format!("account:{}:user:{}", account_id, operator_id)
}

/// List of application keys
pub fn applications(account_id: i64) -> String {
    format!("account:{}:applications", account_id)
}

// ----- applications and end-users -----

pub fn application(account_id: i64, application_id: i64) -> String {
    format!("acc:{}:app:{}", account_id, application_id)
}

/// List of end-user keys
pub fn end_users(account_id: i64, application_id: i64) -> String {
    format!("acc:{}:app:{}:users", account_id, application_id)
}

pub fn end_user(account_id: i64, application_id: i64, user_id: i64) -> String {
    format!("acc:{}:app:{}:user:{}", account_id, application_id, user_id)
}

/// Sorted set of the user's own event keys
pub fn user_events(account_id: i64, application_id: i64, user_id: i64) -> String {
    format!("{}:events", end_user(account_id, application_id, user_id))
}

/// List of the user's outgoing edge keys
pub fn user_connections(account_id: i64, application_id: i64, user_id: i64) -> String {
    format!("{}:connections", end_user(account_id, application_id, user_id))
}

/// Users this user follows
pub fn following(account_id: i64, application_id: i64, user_id: i64) -> String {
    format!("{}:following", end_user(account_id, application_id, user_id))
}

/// Users following this user
pub fn followers(account_id: i64, application_id: i64, user_id: i64) -> String {
    format!("{}:followers", end_user(account_id, application_id, user_id))
}

/// Sorted set of event keys fanned out to this user
pub fn feed(account_id: i64, application_id: i64, user_id: i64) -> String {
    feed_of(&end_user(account_id, application_id, user_id))
}

/// Feed key for a stored end-user key
pub fn feed_of(user_key: &str) -> String {
    format!("{}:feed", user_key)
}

/// Directed edge from `user_from_id` to `user_to_id`
pub fn connection(account_id: i64, application_id: i64, user_from_id: i64, user_to_id: i64) -> String {
    format!(
        "{}:connection:{}",
        end_user(account_id, application_id, user_from_id),
        user_to_id
    )
}

// ----- events and their indexes -----

pub fn event(account_id: i64, application_id: i64, user_id: i64, event_id: i64) -> String {
    format!("acc:{}:app:{}:event:{}:{}", account_id, application_id, user_id, event_id)
}

pub fn geo(account_id: i64, application_id: i64) -> String {
    format!("acc:{}:app:{}:geo", account_id, application_id)
}

pub fn object(account_id: i64, application_id: i64, object_id: &str) -> String {
    format!("acc:{}:app:{}:object:{}", account_id, application_id, segment(object_id))
}

pub fn location(account_id: i64, application_id: i64, label: &str) -> String {
    format!("acc:{}:app:{}:location:{}", account_id, application_id, segment(label))
}

// ----- lookup indexes -----

/// Operator emails are unique across the installation
pub fn operator_by_email(email: &str) -> String {
    format!("by-email:{}", segment(email))
}

pub fn operator_by_username(username: &str) -> String {
    format!("by-username:{}", segment(username))
}

pub fn end_user_by_email(account_id: i64, application_id: i64, email: &str) -> String {
    format!("by-email:{}:{}:{}", account_id, application_id, segment(email))
}

pub fn end_user_by_username(account_id: i64, application_id: i64, username: &str) -> String {
    format!("by-username:{}:{}:{}", account_id, application_id, segment(username))
}

/// Platform names are case-insensitive; external ids are not
pub fn by_social(account_id: i64, application_id: i64, platform: &str, external_id: &str) -> String {
    format!(
        "by-social:{}:{}:{}:{}",
        account_id,
        application_id,
        segment(&platform.to_lowercase()),
        segment(external_id)
    )
}

pub fn token(token: &str) -> String {
    format!("tokens:{}", segment(token))
}

// ----- sessions and quotas -----

pub fn operator_session(account_id: i64, operator_id: i64) -> String {
    format!("session:acc:{}:{}", account_id, operator_id)
}

pub fn end_user_session(account_id: i64, application_id: i64, user_id: i64) -> String {
    format!("session:app:{}:{}:{}", account_id, application_id, user_id)
}

pub fn rate_limit(scope: &str, limitee: &str, window_secs: u64) -> String {
    format!("ratelimit:{}:{}:{}", scope, limitee, window_secs)
}
