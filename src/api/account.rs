/// Account resource
use super::ensure_same_id;
use crate::auth::Authenticated;
use crate::context::AppContext;
use crate::error::ApiResult;
use crate::request::RequestContext;
use crate::store::Account;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

pub async fn create(State(ctx): State<AppContext>, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let account: Account = rc.decode()?;
    let account = ctx.store.create_account(account).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn read(auth: Authenticated) -> ApiResult<impl IntoResponse> {
    Ok(Json(auth.account()?.clone()))
}

pub async fn update(State(ctx): State<AppContext>, auth: Authenticated, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let existing = auth.account()?;
    let updated: Account = rc.decode_onto(existing)?;
    ensure_same_id(existing.id, updated.id, "account")?;

    let account = ctx.store.update_account(existing, updated).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

pub async fn delete(State(ctx): State<AppContext>, auth: Authenticated) -> ApiResult<impl IntoResponse> {
    ctx.store.delete_account(auth.account()?).await?;
    Ok(StatusCode::NO_CONTENT)
}
