/// Events, timelines, feeds and event searches
use super::{end_user::UserPath, ensure_same_id, Params};
use crate::auth::Authenticated;
use crate::context::AppContext;
use crate::error::ApiResult;
use crate::request::RequestContext;
use crate::store::Event;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct EventPath {
    pub user_id: i64,
    pub event_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct GeoPath {
    pub latitude: f64,
    pub longitude: f64,
    pub radius: f64,
}

#[derive(Debug, Deserialize)]
pub struct ObjectPath {
    pub object_id: String,
}

#[derive(Debug, Deserialize)]
pub struct LocationPath {
    pub location: String,
}

pub async fn create(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let event: Event = rc.decode()?;
    ensure_same_id(user.id, event.user_id, "user")?;

    let event = ctx
        .feed
        .write_event(user.account_id, user.application_id, user.id, event)
        .await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn read(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<EventPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let event = ctx
        .feed
        .read_event(app.account_id, app.id, path.user_id, path.event_id)
        .await?;
    Ok(Json(event))
}

pub async fn update(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<EventPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let existing = ctx
        .feed
        .read_event(user.account_id, user.application_id, user.id, path.event_id)
        .await?;
    let updated: Event = rc.decode_onto(&existing)?;
    ensure_same_id(path.event_id, updated.id, "event")?;
    ensure_same_id(user.id, updated.user_id, "user")?;

    let event = ctx.feed.update_event(&existing, updated).await?;
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<EventPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let event = ctx
        .feed
        .read_event(user.account_id, user.application_id, user.id, path.event_id)
        .await?;
    ctx.feed.delete_event(&event).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Timeline of the path user, newest first
pub async fn list(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let events = ctx
        .feed
        .user_events(app.account_id, app.id, path.user_id)
        .await?;
    Ok(Json(events))
}

/// Combined feed of everyone the session user follows
pub async fn feed(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let events = ctx
        .feed
        .combined_feed(user.account_id, user.application_id, user.id)
        .await?;
    Ok(Json(events))
}

pub async fn search_geo(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<GeoPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let events = ctx
        .feed
        .search_geo(app.account_id, app.id, path.latitude, path.longitude, path.radius)
        .await?;
    Ok(Json(events))
}

pub async fn search_object(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ObjectPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let events = ctx
        .feed
        .search_object(app.account_id, app.id, &path.object_id)
        .await?;
    Ok(Json(events))
}

pub async fn search_location(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<LocationPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let events = ctx
        .feed
        .search_location(app.account_id, app.id, &path.location)
        .await?;
    Ok(Json(events))
}
