/// Connections between end-users of one application
use super::{end_user::UserPath, Params};
use crate::auth::Authenticated;
use crate::context::AppContext;
use crate::error::{ApiResult, TapglueError};
use crate::request::RequestContext;
use crate::store::Connection;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

const SOCIAL_PLATFORMS: [&str; 4] = ["facebook", "twitter", "gplus", "abook"];

#[derive(Debug, Deserialize)]
pub struct ConnectionPath {
    pub user_id: i64,
    pub user_to_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SocialPath {
    pub user_id: i64,
    pub platform: String,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    pub user_to_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct SocialConnectRequest {
    #[serde(default)]
    pub user_from_id: i64,
    #[serde(default)]
    pub platform: String,
    #[serde(default)]
    pub connection_ids: Vec<String>,
}

fn from_mismatch(path_user: i64, body_user: i64) -> Result<(), TapglueError> {
    super::ensure_same_id(path_user, body_user, "user")
}

pub async fn create(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let mut conn: Connection = rc.decode_unchecked()?;
    from_mismatch(user.id, conn.user_from_id)?;
    conn.user_from_id = user.id;

    let conn = ctx
        .graph
        .write(user.account_id, user.application_id, conn)
        .await?;
    Ok((StatusCode::CREATED, Json(conn)))
}

pub async fn read(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ConnectionPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let conn = ctx
        .graph
        .read(user.account_id, user.application_id, user.id, path.user_to_id)
        .await?;
    Ok(Json(conn))
}

pub async fn update(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ConnectionPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let existing = ctx
        .graph
        .read(user.account_id, user.application_id, user.id, path.user_to_id)
        .await?;
    let updated: Connection = rc.decode_onto_unchecked(&existing)?;
    from_mismatch(user.id, updated.user_from_id)?;
    super::ensure_same_id(path.user_to_id, updated.user_to_id, "user")?;

    let conn = ctx.graph.update(&existing, updated).await?;
    Ok((StatusCode::CREATED, Json(conn)))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ConnectionPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    ctx.graph
        .delete(user.account_id, user.application_id, user.id, path.user_to_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn confirm(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let request: ConfirmRequest = rc.decode_unchecked()?;

    let existing = ctx
        .graph
        .read(user.account_id, user.application_id, user.id, request.user_to_id)
        .await?;
    let conn = ctx.graph.confirm(&existing).await?;
    Ok((StatusCode::CREATED, Json(conn)))
}

/// Users the path user follows
pub async fn following(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let users = ctx
        .graph
        .list_following(app.account_id, app.id, path.user_id)
        .await?;
    Ok(Json(users))
}

pub async fn followers(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let users = ctx
        .graph
        .list_followers(app.account_id, app.id, path.user_id)
        .await?;
    Ok(Json(users))
}

pub async fn social(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<SocialPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let platform = path.platform.to_lowercase();
    if !SOCIAL_PLATFORMS.contains(&platform.as_str()) {
        return Err(TapglueError::NotFound("platform not found".to_string()).into());
    }

    let request: SocialConnectRequest = rc.decode_unchecked()?;
    from_mismatch(user.id, request.user_from_id)?;
    if !request.platform.is_empty() && request.platform.to_lowercase() != platform {
        return Err(TapglueError::BadRequest("platform mismatch".to_string()).into());
    }

    let users = ctx
        .graph
        .social_connect(user, &platform, &request.connection_ids)
        .await?;
    Ok((StatusCode::CREATED, Json(users)))
}
