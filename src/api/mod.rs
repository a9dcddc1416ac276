/// API routes and handlers
///
/// The same route table is mounted under every API version. Each route carries the
/// auth guard of its level; the request context is built around all of them.
pub mod account;
pub mod application;
pub mod connection;
pub mod end_user;
pub mod event;
pub mod operator;
pub mod public;

use crate::auth::middleware as guard;
use crate::context::AppContext;
use crate::error::{TapglueError, TapglueResult};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path},
    http::request::Parts,
    middleware::from_fn_with_state,
    routing::{get, post},
    Router,
};
use serde::{de::DeserializeOwned, Serialize};

/// Path parameters whose rejection uses the error envelope
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for Params<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Send,
{
    type Rejection = TapglueError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<T>::from_request_parts(parts, state)
            .await
            .map(|Path(value)| Params(value))
            .map_err(|e| TapglueError::BadRequest(e.body_text()))
    }
}

/// Reject bodies that name a different record than the URL
pub(crate) fn ensure_same_id(path_id: i64, body_id: i64, what: &str) -> TapglueResult<()> {
    if body_id != 0 && body_id != path_id {
        return Err(TapglueError::BadRequest(format!("{} id mismatch", what)));
    }
    Ok(())
}

/// Body of every login and refresh response
#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub id: i64,
    pub account_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application_id: Option<i64>,
    pub session_token: String,
}

/// Build the versioned resource routes
pub fn routes(ctx: &AppContext) -> Router<AppContext> {
    let account_signed = from_fn_with_state(ctx.clone(), guard::account_signed);
    let account_session = from_fn_with_state(ctx.clone(), guard::account_session);
    let application_signed = from_fn_with_state(ctx.clone(), guard::application_signed);
    let application_session = from_fn_with_state(ctx.clone(), guard::application_session);

    const APP: &str = "/account/:account_id/application/:application_id";
    const USER: &str = "/account/:account_id/application/:application_id/user/:user_id";

    Router::new()
        // Accounts
        .route("/accounts", post(account::create))
        .route(
            "/account/:account_id",
            get(account::read)
                .put(account::update)
                .delete(account::delete)
                .route_layer(account_session.clone()),
        )
        // Operators
        .route("/account/user/login", post(operator::login))
        .route(
            "/account/:account_id/users",
            post(operator::create)
                .route_layer(account_signed)
                .merge(get(operator::list).route_layer(account_session.clone())),
        )
        .route(
            "/account/:account_id/user/refreshSession",
            post(operator::refresh).route_layer(account_session.clone()),
        )
        .route(
            "/account/:account_id/user/:user_id",
            get(operator::read)
                .put(operator::update)
                .delete(operator::delete)
                .route_layer(account_session.clone()),
        )
        .route(
            "/account/:account_id/user/:user_id/logout",
            post(operator::logout).route_layer(account_session.clone()),
        )
        // Applications
        .route(
            "/account/:account_id/applications",
            get(application::list)
                .post(application::create)
                .route_layer(account_session.clone()),
        )
        .route(
            APP,
            get(application::read)
                .put(application::update)
                .delete(application::delete)
                .route_layer(account_session.clone()),
        )
        // End-users
        .route(
            &format!("{}/users", APP),
            post(end_user::create)
                .route_layer(application_signed.clone())
                .merge(get(end_user::list).route_layer(account_session)),
        )
        .route(
            &format!("{}/user/login", APP),
            post(end_user::login).route_layer(application_signed),
        )
        .route(
            USER,
            get(end_user::read)
                .put(end_user::update)
                .delete(end_user::delete)
                .route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/refreshSession", USER),
            post(end_user::refresh).route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/logout", USER),
            post(end_user::logout).route_layer(application_session.clone()),
        )
        // Connections
        .route(
            &format!("{}/connections", USER),
            get(connection::following)
                .post(connection::create)
                .route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/followers", USER),
            get(connection::followers).route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/connection/confirm", USER),
            post(connection::confirm).route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/connection/:user_to_id", USER),
            get(connection::read)
                .put(connection::update)
                .delete(connection::delete)
                .route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/connections/social/:platform", USER),
            post(connection::social).route_layer(application_session.clone()),
        )
        // Events
        .route(
            &format!("{}/events", USER),
            get(event::list)
                .post(event::create)
                .route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/event/:event_id", USER),
            get(event::read)
                .put(event::update)
                .delete(event::delete)
                .route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/connections/events", USER),
            get(event::feed).route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/events/geo/:latitude/:longitude/:radius", APP),
            get(event::search_geo).route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/events/object/:object_id", APP),
            get(event::search_object).route_layer(application_session.clone()),
        )
        .route(
            &format!("{}/events/location/:location", APP),
            get(event::search_location).route_layer(application_session),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_same_id() {
        assert!(ensure_same_id(4, 0, "user").is_ok());
        assert!(ensure_same_id(4, 4, "user").is_ok());
        match ensure_same_id(4, 5, "user") {
            Err(TapglueError::BadRequest(msg)) => assert_eq!(msg, "user id mismatch"),
            other => panic!("unexpected {:?}", other),
        }
    }
}
