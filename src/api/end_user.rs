/// End-user resource and end-user sessions
use super::{application::ApplicationPath, ensure_same_id, Params, SessionResponse};
use crate::auth::{Authenticated, Credentials, Principal};
use crate::context::AppContext;
use crate::error::ApiResult;
use crate::request::RequestContext;
use crate::store::EndUser;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct UserPath {
    pub user_id: i64,
}

fn session_response(user: &EndUser, token: String) -> SessionResponse {
    SessionResponse {
        id: user.id,
        account_id: user.account_id,
        application_id: Some(user.application_id),
        session_token: token,
    }
}

pub async fn create(State(ctx): State<AppContext>, auth: Authenticated, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let user: EndUser = rc.decode()?;
    ensure_same_id(app.id, user.application_id, "application")?;

    let user = ctx.store.create_end_user(app.account_id, app.id, user).await?;
    Ok((StatusCode::CREATED, Json(user.public())))
}

/// Every user of an application; an operator concern
pub async fn list(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ApplicationPath>,
) -> ApiResult<impl IntoResponse> {
    let account = auth.account()?;
    let app = ctx.store.read_application(account.id, path.application_id).await?;
    let users = ctx.store.list_end_users(account.id, app.id).await?;
    Ok(Json(users.iter().map(EndUser::public).collect::<Vec<_>>()))
}

pub async fn read(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let me = auth.end_user()?;
    if me.id == path.user_id {
        return Ok(Json(me.public()));
    }
    let user = ctx
        .store
        .read_end_user(me.account_id, me.application_id, path.user_id)
        .await?;
    Ok(Json(user.public()))
}

pub async fn update(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let existing = auth.require_self(path.user_id)?;
    let updated: EndUser = rc.decode_onto(&existing.public())?;
    ensure_same_id(existing.id, updated.id, "user")?;

    let user = ctx.store.update_end_user(existing, updated).await?;
    Ok((StatusCode::CREATED, Json(user.public())))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    ctx.store.delete_end_user(user).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn login(State(ctx): State<AppContext>, auth: Authenticated, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let app = auth.application()?;
    let credentials: Credentials = rc.decode()?;
    let (user, token) = ctx
        .sessions
        .login_end_user(app.account_id, app.id, &credentials)
        .await?;
    Ok((StatusCode::CREATED, Json(session_response(&user, token))))
}

pub async fn refresh(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    let token = ctx
        .sessions
        .refresh(&Principal::EndUser(user.clone()), auth.session_token()?)
        .await?;
    Ok((StatusCode::CREATED, Json(session_response(user, token))))
}

pub async fn logout(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<UserPath>,
) -> ApiResult<impl IntoResponse> {
    let user = auth.require_self(path.user_id)?;
    ctx.sessions
        .logout(&Principal::EndUser(user.clone()), auth.session_token()?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
