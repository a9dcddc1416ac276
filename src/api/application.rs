/// Application resource, managed by operators
use super::{ensure_same_id, Params};
use crate::auth::Authenticated;
use crate::context::AppContext;
use crate::error::ApiResult;
use crate::request::RequestContext;
use crate::store::Application;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct ApplicationPath {
    pub application_id: i64,
}

pub async fn create(State(ctx): State<AppContext>, auth: Authenticated, rc: RequestContext) -> ApiResult<impl IntoResponse> {
    let account = auth.account()?;
    let app: Application = rc.decode()?;
    ensure_same_id(account.id, app.account_id, "account")?;

    let app = ctx.store.create_application(account.id, app).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn list(State(ctx): State<AppContext>, auth: Authenticated) -> ApiResult<impl IntoResponse> {
    Ok(Json(ctx.store.list_applications(auth.account()?.id).await?))
}

pub async fn read(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ApplicationPath>,
) -> ApiResult<impl IntoResponse> {
    let app = ctx
        .store
        .read_application(auth.account()?.id, path.application_id)
        .await?;
    Ok(Json(app))
}

pub async fn update(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ApplicationPath>,
    rc: RequestContext,
) -> ApiResult<impl IntoResponse> {
    let account = auth.account()?;
    let existing = ctx.store.read_application(account.id, path.application_id).await?;
    let updated: Application = rc.decode_onto(&existing)?;
    ensure_same_id(path.application_id, updated.id, "application")?;
    ensure_same_id(account.id, updated.account_id, "account")?;

    let app = ctx.store.update_application(&existing, updated).await?;
    Ok((StatusCode::CREATED, Json(app)))
}

pub async fn delete(
    State(ctx): State<AppContext>,
    auth: Authenticated,
    Params(path): Params<ApplicationPath>,
) -> ApiResult<impl IntoResponse> {
    let app = ctx
        .store
        .read_application(auth.account()?.id, path.application_id)
        .await?;
    ctx.store.delete_application(&app).await?;
    Ok(StatusCode::NO_CONTENT)
}
