/// Entity records
///
/// The same types are decoded from request bodies, stored as JSON and written back in
/// responses. Users carry their password hash in `password` at rest; responses go
/// through `public()` which strips it.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::{Validate, ValidationError};

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Image {
    #[validate(url)]
    pub url: String,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<String>,
}

/// Tenant
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct Account {
    #[serde(default)]
    pub id: i64,

    #[validate(length(min = 3, max = 40, message = "account name must be between 3 and 40 characters"))]
    #[serde(default)]
    pub name: String,

    #[validate(length(max = 100, message = "account description must be at most 100 characters"))]
    #[serde(default)]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_token: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

/// Human user operating an account
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct Operator {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub account_id: i64,

    #[validate(length(min = 2, max = 40, message = "user name must be between 2 and 40 characters"))]
    #[serde(default)]
    pub user_name: String,

    #[validate(email(message = "user email is not valid"))]
    #[serde(default)]
    pub email: String,

    /// Plain text on input, hash at rest
    #[validate(custom(function = "password_length"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[validate(length(min = 2, max = 40, message = "user first name must be between 2 and 40 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[validate(length(min = 2, max = 40, message = "user last name must be between 2 and 40 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[validate(url(message = "user url is not a valid url"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub activated: bool,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Operator {
    /// Copy safe to put on the wire
    pub fn public(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }
}

/// Mobile application registered under an account
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct Application {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub account_id: i64,

    #[validate(length(min = 2, max = 40, message = "application name must be between 2 and 40 characters"))]
    #[serde(default)]
    pub name: String,

    #[validate(length(max = 100, message = "application description must be at most 100 characters"))]
    #[serde(default)]
    pub description: String,

    #[validate(url(message = "application url is not a valid url"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub auth_token: String,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

/// Empty keeps the stored hash on update; create rejects it separately
fn password_length(password: &str) -> Result<(), ValidationError> {
    let len = password.chars().count();
    if !password.is_empty() && !(4..=60).contains(&len) {
        let mut err = ValidationError::new("length");
        err.message = Some("user password must be between 4 and 60 characters".into());
        return Err(err);
    }
    Ok(())
}

fn end_user_identity(user: &EndUser) -> Result<(), ValidationError> {
    let empty = |v: &Option<String>| v.as_deref().map(str::is_empty).unwrap_or(true);
    if empty(&user.user_name) && empty(&user.email) {
        let mut err = ValidationError::new("identity");
        err.message = Some("user email and username are both empty".into());
        return Err(err);
    }
    Ok(())
}

/// Mobile end-user of an application
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
#[validate(schema(function = "end_user_identity", skip_on_field_errors = false))]
pub struct EndUser {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub account_id: i64,

    #[serde(default)]
    pub application_id: i64,

    #[validate(length(min = 2, max = 40, message = "user name must be between 2 and 40 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,

    #[validate(email(message = "user email is not valid"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Plain text on input, hash at rest
    #[validate(custom(function = "password_length"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_id: Option<String>,

    /// Platform name to external id
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub social_ids: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub device_ids: Vec<String>,

    #[validate(length(min = 2, max = 40, message = "user first name must be between 2 and 40 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,

    #[validate(length(min = 2, max = 40, message = "user last name must be between 2 and 40 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,

    #[validate(url(message = "user url is not a valid url"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub activated: bool,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl EndUser {
    pub fn public(&self) -> Self {
        Self {
            password: None,
            ..self.clone()
        }
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().filter(|e| !e.is_empty())
    }

    pub fn user_name(&self) -> Option<&str> {
        self.user_name.as_deref().filter(|u| !u.is_empty())
    }
}

/// Lifecycle state of a directed edge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Pending,
    Confirmed,
    Disabled,
}

/// Directed follow edge between two end-users of one application
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default)]
    pub account_id: i64,

    #[serde(default)]
    pub application_id: i64,

    #[serde(default)]
    pub user_from_id: i64,

    #[serde(default)]
    pub user_to_id: i64,

    #[serde(default)]
    pub enabled: bool,

    /// Absent until the edge is confirmed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    pub fn state(&self) -> ConnectionState {
        match (self.confirmed_at, self.enabled) {
            (None, _) => ConnectionState::Pending,
            (Some(_), true) => ConnectionState::Confirmed,
            (Some(_), false) => ConnectionState::Disabled,
        }
    }
}

/// Thing an event is about
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct EventObject {
    #[validate(length(min = 1, max = 200, message = "object id must be between 1 and 200 characters"))]
    #[serde(default)]
    pub id: String,

    #[serde(rename = "type", default)]
    pub kind: String,

    #[validate(url(message = "object url is not a valid url"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Language code to localized name
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub display_names: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct Participant {
    #[serde(default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<Image>,
}

/// Unit of activity authored by an end-user
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, Validate)]
pub struct Event {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub account_id: i64,

    #[serde(default)]
    pub application_id: i64,

    #[serde(default)]
    pub user_id: i64,

    #[validate(length(min = 1, max = 20, message = "verb must be between 1 and 20 characters"))]
    #[serde(default)]
    pub verb: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,

    #[validate(length(max = 200, message = "location must be at most 200 characters"))]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,

    #[validate(range(min = -90.0, max = 90.0, message = "latitude is out of range"))]
    #[serde(default)]
    pub latitude: f64,

    #[validate(range(min = -180.0, max = 180.0, message = "longitude is out of range"))]
    #[serde(default)]
    pub longitude: f64,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<EventObject>,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<EventObject>,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<EventObject>,

    #[validate(nested)]
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participants: Vec<Participant>,

    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub created_at: DateTime<Utc>,

    #[serde(default)]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl Event {
    /// Coordinates when the event is geo-tagged
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        if self.latitude == 0.0 && self.longitude == 0.0 {
            None
        } else {
            Some((self.latitude, self.longitude))
        }
    }

    pub fn object_id(&self) -> Option<&str> {
        self.object
            .as_ref()
            .map(|o| o.id.as_str())
            .filter(|id| !id.is_empty())
    }

    pub fn location(&self) -> Option<&str> {
        self.location.as_deref().filter(|l| !l.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_public_strips_password() {
        let op = Operator {
            user_name: "ops".into(),
            password: Some("hash".into()),
            ..Default::default()
        };
        let json = serde_json::to_value(op.public()).unwrap();
        assert!(json.get("password").is_none());
        assert_eq!(json["user_name"], "ops");
    }

    #[test]
    fn test_empty_password_passes_validation() {
        let mut user = EndUser {
            user_name: Some("alice".into()),
            password: Some(String::new()),
            ..Default::default()
        };
        assert!(user.validate().is_ok());

        user.password = Some("abc".into());
        let errors = user.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("password"));

        let op = Operator {
            user_name: "ops".into(),
            email: "ops@example.com".into(),
            password: Some(String::new()),
            ..Default::default()
        };
        assert!(op.validate().is_ok());
    }

    #[test]
    fn test_end_user_requires_identity() {
        let user = EndUser::default();
        assert!(user.validate().is_err());

        let user = EndUser {
            email: Some("u@example.com".into()),
            ..Default::default()
        };
        assert!(user.validate().is_ok());
    }

    #[test]
    fn test_end_user_field_rules() {
        let user = EndUser {
            user_name: Some("x".into()),
            email: Some("not-an-email".into()),
            ..Default::default()
        };
        let errors = user.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("user_name"));
        assert!(fields.contains_key("email"));
    }

    #[test]
    fn test_connection_state() {
        let mut conn = Connection::default();
        assert_eq!(conn.state(), ConnectionState::Pending);

        conn.enabled = true;
        conn.confirmed_at = Some(Utc::now());
        assert_eq!(conn.state(), ConnectionState::Confirmed);

        conn.enabled = false;
        assert_eq!(conn.state(), ConnectionState::Disabled);
    }

    #[test]
    fn test_pending_connection_omits_confirmed_at() {
        let json = serde_json::to_value(Connection::default()).unwrap();
        assert!(json.get("confirmed_at").is_none());
    }

    #[test]
    fn test_event_decodes_wire_shape() {
        let event: Event = serde_json::from_str(
            r#"{
                "verb": "like",
                "location": "berlin",
                "latitude": 52.52,
                "longitude": 13.3,
                "object": {"id": "article-1", "type": "article", "display_names": {"en": "article", "de": "Artikel"}}
            }"#,
        )
        .unwrap();

        assert!(event.validate().is_ok());
        assert_eq!(event.object_id(), Some("article-1"));
        assert_eq!(event.location(), Some("berlin"));
        assert_eq!(event.coordinates(), Some((52.52, 13.3)));
        assert_eq!(event.object.unwrap().display_names["de"], "Artikel");
    }

    #[test]
    fn test_event_without_coordinates() {
        let event = Event {
            verb: "post".into(),
            ..Default::default()
        };
        assert_eq!(event.coordinates(), None);
        assert_eq!(event.location(), None);
    }

    #[test]
    fn test_event_latitude_range() {
        let event = Event {
            verb: "post".into(),
            latitude: 120.0,
            ..Default::default()
        };
        assert!(event.validate().is_err());
    }
}
