/// Auth and session tokens
///
/// Every token is base64url over a colon-separated tuple that starts with the owning
/// principal's identifiers and ends in random material.
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use chrono::{DateTime, Utc};
use rand::{distributions::Alphanumeric, Rng};

const RANDOM_LEN: usize = 32;
const SESSION_SUFFIX: &str = "v1";

/// Random alphanumeric string
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn nanos(at: DateTime<Utc>) -> i64 {
    at.timestamp_nanos_opt().unwrap_or_else(|| at.timestamp_micros() * 1000)
}

fn encode(parts: &[String]) -> String {
    URL_SAFE.encode(parts.join(":"))
}

fn decode(token: &str) -> Option<Vec<String>> {
    let raw = URL_SAFE.decode(token.as_bytes()).ok()?;
    let text = String::from_utf8(raw).ok()?;
    Some(text.split(':').map(str::to_string).collect())
}

/// API secret of an account
pub fn account_auth_token(account_id: i64, created_at: DateTime<Utc>) -> String {
    encode(&[
        account_id.to_string(),
        nanos(created_at).to_string(),
        random_string(RANDOM_LEN),
    ])
}

/// API secret of an application
pub fn application_auth_token(account_id: i64, application_id: i64, created_at: DateTime<Utc>) -> String {
    encode(&[
        account_id.to_string(),
        application_id.to_string(),
        nanos(created_at).to_string(),
        random_string(RANDOM_LEN),
    ])
}

pub fn operator_session_token(account_id: i64, operator_id: i64) -> String {
    encode(&[
        account_id.to_string(),
        operator_id.to_string(),
        nanos(Utc::now()).to_string(),
        random_string(RANDOM_LEN),
        SESSION_SUFFIX.to_string(),
    ])
}

pub fn end_user_session_token(account_id: i64, application_id: i64, user_id: i64) -> String {
    encode(&[
        account_id.to_string(),
        application_id.to_string(),
        user_id.to_string(),
        nanos(Utc::now()).to_string(),
        random_string(RANDOM_LEN),
        SESSION_SUFFIX.to_string(),
    ])
}

/// (account_id, operator_id) embedded in an operator session token
pub fn parse_operator_session_token(token: &str) -> Option<(i64, i64)> {
    let parts = decode(token)?;
    if parts.len() != 5 || parts[4] != SESSION_SUFFIX {
        return None;
    }
    Some((parts[0].parse().ok()?, parts[1].parse().ok()?))
}

/// (account_id, application_id, user_id) embedded in an end-user session token
pub fn parse_end_user_session_token(token: &str) -> Option<(i64, i64, i64)> {
    let parts = decode(token)?;
    if parts.len() != 6 || parts[5] != SESSION_SUFFIX {
        return None;
    }
    Some((
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let s = random_string(32);
        assert_eq!(s.len(), 32);
        assert!(s.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(s, random_string(32));
    }

    #[test]
    fn test_account_token_layout() {
        let created = Utc::now();
        let token = account_auth_token(42, created);
        let parts = decode(&token).unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0], "42");
        assert_eq!(parts[1], nanos(created).to_string());
        assert_eq!(parts[2].len(), 32);
    }

    #[test]
    fn test_application_token_layout() {
        let token = application_auth_token(4, 2, Utc::now());
        let parts = decode(&token).unwrap();
        assert_eq!(&parts[..2], &["4".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_session_tokens_embed_principal() {
        let token = operator_session_token(3, 8);
        assert_eq!(parse_operator_session_token(&token), Some((3, 8)));
        assert_eq!(parse_end_user_session_token(&token), None);

        let token = end_user_session_token(3, 5, 13);
        assert_eq!(parse_end_user_session_token(&token), Some((3, 5, 13)));
        assert_eq!(parse_operator_session_token(&token), None);
    }

    #[test]
    fn test_sessions_are_distinct() {
        assert_ne!(operator_session_token(1, 1), operator_session_token(1, 1));
    }

    #[test]
    fn test_garbage_tokens_rejected() {
        assert_eq!(parse_operator_session_token("not base64 at all!"), None);
        assert_eq!(parse_end_user_session_token(""), None);
    }
}
