/// Operator resource and operator sessions
use super::{ensure_same_id, Params, SessionResponse};
use crate::auth::{Authenticated, Credentials, Principal};
use crate::context::AppContext;
use crate::error::{ApiResult, TapglueError};
use crate::request::RequestContext;
use crate::store::Operator;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct OperatorPath {
    pub user_id: i64,
}

fn session_response(op: &Operator, token: String) -> SessionResponse {
    SessionResponse {
        id: op.id,
        account_id: op.account_id,
        application_id: None,
        session_token: token,
    }
}

pub async fn create(State(ctx): State<AppContext>, auth: Authenticated, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let account = auth.account()?;
    let op: Operator = rc.decode()?;
    ensure_same_id(account.id, op.account_id, "account")?;

    let op = ctx.store.create_operator(account.id, op).await?;
    Ok((StatusCode::CREATED, Json(op.public())))
}

pub async fn list(State(ctx): State<AppContext>, auth: Authenticated) -> ApiResult<impl IntoResponse> {
    let operators = ctx.store.list_operators(auth.account()?.id).await?;
    Ok(Json(operators.iter().map(Operator::public).collect::<Vec<_>>()))
}

pub async fn read(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<OperatorPath>,
) -> ApiResult<impl IntoResponse> {
    let op = ctx.store.read_operator(auth.account()?.id, path.user_id).await?;
    Ok(Json(op.public()))
}

pub async fn update(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<OperatorPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let account = auth.account()?;
    let existing = ctx.store.read_operator(account.id, path.user_id).await?;
    // Merge onto the public view so the stored hash is never fed back as a new password
    let updated: Operator = rc.decode_onto(&existing.public())?;
    ensure_same_id(path.user_id, updated.id, "user")?;
    ensure_same_id(account.id, updated.account_id, "account")?;

    let op = ctx.store.update_operator(&existing, updated).await?;
    Ok((StatusCode::CREATED, Json(op.public())))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<OperatorPath>,
) -> ApiResult<impl IntoResponse> {
    let op = ctx.store.read_operator(auth.account()?.id, path.user_id).await?;
    ctx.store.delete_operator(&op).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn login(State(ctx): State<AppContext>, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let credentials: Credentials = rc.decode()?;
    let (op, token) = ctx.sessions.login_operator(&credentials).await?;
    Ok((StatusCode::CREATED, Json(session_response(&op, token))))
}

pub async fn refresh(State(ctx): State<AppContext>, auth: Authenticated) -> ApiResult<impl IntoResponse> {
    let op = auth.operator()?;
    let token = ctx
        .sessions
        .refresh(&Principal::Operator(op.clone()), auth.session_token()?)
        .await?;
    Ok((StatusCode::CREATED, Json(session_response(op, token))))
}

pub async fn logout(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<OperatorPath>,
) -> ApiResult<impl IntoResponse> {
    let op = auth.operator()?;
    if op.id != path.user_id {
        return Err(TapglueError::Forbidden("session does not belong to this user".to_string()).into());
    }
    ctx.sessions
        .logout(&Principal::Operator(op.clone()), auth.session_token()?)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
