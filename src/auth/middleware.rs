/// Route-level authentication
///
/// Each middleware resolves the principals of one auth level and stores them on the
/// request as [`Authenticated`]. Version 0.1 requests are signed; later versions pass
/// the owner's auth token in `x-tapglue-app-key`.
use super::principal::Principal;
use super::signature::{
    decode_id, digest, secrets_match, SignedRequest, HEADER_APP_KEY, HEADER_DATE, HEADER_ID,
    HEADER_PAYLOAD_HASH, HEADER_SESSION, HEADER_SIGNATURE,
};
use crate::context::AppContext;
use crate::error::{TapglueError, TapglueResult};
use crate::minter::{parse_end_user_session_token, parse_operator_session_token};
use crate::rate_limit::{limitee_of, Quota};
use crate::request::RequestContext;
use crate::store::{Account, Application, EndUser, Operator};
use axum::{
    async_trait,
    extract::{FromRequestParts, Path, Request, State},
    http::{request::Parts, HeaderMap, HeaderValue},
    middleware::Next,
    response::Response,
};
use std::collections::HashMap;
use tracing::debug;

/// Principals resolved for the current request
#[derive(Debug, Clone, Default)]
pub struct Authenticated {
    pub account: Option<Account>,
    pub operator: Option<Operator>,
    pub application: Option<Application>,
    pub end_user: Option<EndUser>,
    pub session_token: Option<String>,
}

fn unresolved(what: &str) -> TapglueError {
    TapglueError::Internal(format!("{} not resolved for this route", what))
}

impl Authenticated {
    pub fn account(&self) -> TapglueResult<&Account> {
        self.account.as_ref().ok_or_else(|| unresolved("account"))
    }

    pub fn operator(&self) -> TapglueResult<&Operator> {
        self.operator.as_ref().ok_or_else(|| unresolved("operator"))
    }

    pub fn application(&self) -> TapglueResult<&Application> {
        self.application.as_ref().ok_or_else(|| unresolved("application"))
    }

    pub fn end_user(&self) -> TapglueResult<&EndUser> {
        self.end_user.as_ref().ok_or_else(|| unresolved("user"))
    }

    pub fn session_token(&self) -> TapglueResult<&str> {
        self.session_token.as_deref().ok_or_else(|| unresolved("session"))
    }

    /// The session end-user must be the user named in the path
    pub fn require_self(&self, user_id: i64) -> TapglueResult<&EndUser> {
        let user = self.end_user()?;
        if user.id != user_id {
            return Err(TapglueError::Forbidden("session does not belong to this user".to_string()));
        }
        Ok(user)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Authenticated {
    type Rejection = TapglueError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Authenticated>()
            .cloned()
            .ok_or_else(|| unresolved("principal"))
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

fn path_id(params: &HashMap<String, String>, name: &str) -> TapglueResult<i64> {
    params
        .get(name)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| TapglueError::BadRequest(format!("{} is not a valid id", name)))
}

fn unauthorized(msg: &str) -> TapglueError {
    TapglueError::Unauthorized(msg.to_string())
}

/// Lookups during authentication report a missing owner as bad credentials
fn as_unauthorized(e: TapglueError, msg: &str) -> TapglueError {
    match e {
        TapglueError::NotFound(_) => unauthorized(msg),
        other => other,
    }
}

fn verify_signature(rc: &RequestContext, headers: &HeaderMap, secret: &str) -> TapglueResult<()> {
    let payload_hash = header(headers, HEADER_PAYLOAD_HASH).unwrap_or_default();
    if !secrets_match(&digest(&rc.body), payload_hash) {
        return Err(unauthorized("payload hash mismatch"));
    }

    let signature = header(headers, HEADER_SIGNATURE).ok_or_else(|| unauthorized("signature missing"))?;
    let request = SignedRequest {
        method: rc.method.as_str(),
        path: &rc.path,
        host: &rc.host,
        date: header(headers, HEADER_DATE).ok_or_else(|| unauthorized("date missing"))?,
        payload_hash,
        id: header(headers, HEADER_ID).unwrap_or_default(),
        session: header(headers, HEADER_SESSION).unwrap_or_default(),
    };

    if !request.verify(secret, &rc.scope, &rc.version.request_version(), signature) {
        debug!(scope = %rc.scope, "signature rejected");
        return Err(unauthorized("signature mismatch"));
    }
    Ok(())
}

/// Claimed (account, application) of the request, before any secret is checked
async fn claimed_owner(ctx: &AppContext, rc: &RequestContext, headers: &HeaderMap) -> TapglueResult<(i64, Option<i64>)> {
    if rc.version.uses_app_key() {
        let key = header(headers, HEADER_APP_KEY).ok_or_else(|| unauthorized("app key missing"))?;
        let owner = ctx
            .store
            .token_owner(key)
            .await?
            .ok_or_else(|| unauthorized("app key not recognised"))?;
        Ok((owner.account_id, owner.application_id))
    } else {
        let id = header(headers, HEADER_ID).ok_or_else(|| unauthorized("id missing"))?;
        decode_id(id).ok_or_else(|| unauthorized("id malformed"))
    }
}

fn check_secret(rc: &RequestContext, headers: &HeaderMap, secret: &str) -> TapglueResult<()> {
    if rc.version.uses_app_key() {
        let presented = header(headers, HEADER_APP_KEY).unwrap_or_default();
        if !secrets_match(secret, presented) {
            return Err(unauthorized("app key mismatch"));
        }
        Ok(())
    } else {
        verify_signature(rc, headers, secret)
    }
}

async fn resolve_account(
    ctx: &AppContext,
    rc: &RequestContext,
    headers: &HeaderMap,
    path_account_id: i64,
) -> TapglueResult<Account> {
    let (account_id, application_id) = claimed_owner(ctx, rc, headers).await?;
    if application_id.is_some() {
        return Err(unauthorized("account credentials required"));
    }

    let account = ctx
        .store
        .read_account(account_id)
        .await
        .map_err(|e| as_unauthorized(e, "account not found"))?;
    check_secret(rc, headers, &account.auth_token)?;

    if !account.enabled {
        return Err(unauthorized("account disabled"));
    }
    if account.id != path_account_id {
        return Err(TapglueError::Forbidden("credentials belong to another account".to_string()));
    }
    Ok(account)
}

async fn resolve_application(
    ctx: &AppContext,
    rc: &RequestContext,
    headers: &HeaderMap,
    path_account_id: i64,
    path_application_id: i64,
) -> TapglueResult<(Account, Application)> {
    let (account_id, application_id) = claimed_owner(ctx, rc, headers).await?;
    let application_id = application_id.ok_or_else(|| unauthorized("application credentials required"))?;

    let application = ctx
        .store
        .read_application(account_id, application_id)
        .await
        .map_err(|e| as_unauthorized(e, "application not found"))?;
    check_secret(rc, headers, &application.auth_token)?;

    let account = ctx
        .store
        .read_account(account_id)
        .await
        .map_err(|e| as_unauthorized(e, "account not found"))?;
    if !account.enabled || !application.enabled {
        return Err(unauthorized("application disabled"));
    }
    if account.id != path_account_id || application.id != path_application_id {
        return Err(TapglueError::Forbidden("credentials belong to another application".to_string()));
    }
    Ok((account, application))
}

async fn resolve_operator_session(ctx: &AppContext, account: &Account, headers: &HeaderMap) -> TapglueResult<(Operator, String)> {
    let token = header(headers, HEADER_SESSION).ok_or_else(|| unauthorized("session missing"))?;
    let (account_id, operator_id) = parse_operator_session_token(token).ok_or_else(|| unauthorized("session malformed"))?;
    if account_id != account.id {
        return Err(TapglueError::Forbidden("session belongs to another account".to_string()));
    }

    let op = ctx
        .store
        .read_operator(account_id, operator_id)
        .await
        .map_err(|e| as_unauthorized(e, "session user not found"))?;
    if !op.enabled {
        return Err(unauthorized("user disabled"));
    }

    ctx.sessions
        .verify(&Principal::Operator(op.clone()), token)
        .await?;
    Ok((op, token.to_string()))
}

async fn resolve_end_user_session(
    ctx: &AppContext,
    application: &Application,
    headers: &HeaderMap,
) -> TapglueResult<(EndUser, String)> {
    let token = header(headers, HEADER_SESSION).ok_or_else(|| unauthorized("session missing"))?;
    let (account_id, application_id, user_id) =
        parse_end_user_session_token(token).ok_or_else(|| unauthorized("session malformed"))?;
    if account_id != application.account_id || application_id != application.id {
        return Err(TapglueError::Forbidden("session belongs to another application".to_string()));
    }

    let user = ctx
        .store
        .read_end_user(account_id, application_id, user_id)
        .await
        .map_err(|e| as_unauthorized(e, "session user not found"))?;
    if !user.enabled {
        return Err(unauthorized("user disabled"));
    }

    ctx.sessions
        .verify(&Principal::EndUser(user.clone()), token)
        .await?;
    Ok((user, token.to_string()))
}

async fn charge_quota(ctx: &AppContext, application: &Application) -> TapglueResult<Option<Quota>> {
    if !ctx.config.rate_limit.enabled {
        return Ok(None);
    }
    ctx.limiter
        .request("application", &limitee_of(&application.auth_token))
        .await
        .map(Some)
}

fn with_quota(mut response: Response, quota: Option<Quota>) -> Response {
    if let Some(quota) = quota {
        let headers = response.headers_mut();
        for (name, value) in [
            ("X-RateLimit-Limit", quota.limit.to_string()),
            ("X-RateLimit-Remaining", quota.remaining.to_string()),
            ("X-RateLimit-Reset", quota.reset_at.timestamp().to_string()),
        ] {
            if let Ok(value) = HeaderValue::from_str(&value) {
                headers.insert(name, value);
            }
        }
    }
    response
}

/// Account credentials without a session
pub async fn account_signed(
    State(ctx): State<AppContext>,
    Path(params): Path<HashMap<String, String>>,
    rc: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, TapglueError> {
    let account = resolve_account(&ctx, &rc, request.headers(), path_id(&params, "account_id")?).await?;
    request.extensions_mut().insert(Authenticated {
        account: Some(account),
        ..Default::default()
    });
    Ok(next.run(request).await)
}

/// Account credentials plus a live operator session
pub async fn account_session(
    State(ctx): State<AppContext>,
    Path(params): Path<HashMap<String, String>>,
    rc: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, TapglueError> {
    let account = resolve_account(&ctx, &rc, request.headers(), path_id(&params, "account_id")?).await?;
    let (operator, token) = resolve_operator_session(&ctx, &account, request.headers()).await?;
    request.extensions_mut().insert(Authenticated {
        account: Some(account),
        operator: Some(operator),
        session_token: Some(token),
        ..Default::default()
    });
    Ok(next.run(request).await)
}

/// Application credentials without a session; charges the application's quota
pub async fn application_signed(
    State(ctx): State<AppContext>,
    Path(params): Path<HashMap<String, String>>,
    rc: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, TapglueError> {
    let (account, application) = resolve_application(
        &ctx,
        &rc,
        request.headers(),
        path_id(&params, "account_id")?,
        path_id(&params, "application_id")?,
    )
    .await?;
    let quota = charge_quota(&ctx, &application).await?;

    request.extensions_mut().insert(Authenticated {
        account: Some(account),
        application: Some(application),
        ..Default::default()
    });
    Ok(with_quota(next.run(request).await, quota))
}

/// Application credentials plus a live end-user session; charges the application's quota
pub async fn application_session(
    State(ctx): State<AppContext>,
    Path(params): Path<HashMap<String, String>>,
    rc: RequestContext,
    mut request: Request,
    next: Next,
) -> Result<Response, TapglueError> {
    let (account, application) = resolve_application(
        &ctx,
        &rc,
        request.headers(),
        path_id(&params, "account_id")?,
        path_id(&params, "application_id")?,
    )
    .await?;
    let (end_user, token) = resolve_end_user_session(&ctx, &application, request.headers()).await?;
    let quota = charge_quota(&ctx, &application).await?;

    request.extensions_mut().insert(Authenticated {
        account: Some(account),
        application: Some(application),
        end_user: Some(end_user),
        session_token: Some(token),
        ..Default::default()
    });
    Ok(with_quota(next.run(request).await, quota))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_self() {
        let auth = Authenticated {
            end_user: Some(EndUser {
                id: 4,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(auth.require_self(4).is_ok());
        assert!(matches!(auth.require_self(5), Err(TapglueError::Forbidden(_))));
    }

    #[test]
    fn test_missing_principal_is_internal() {
        let auth = Authenticated::default();
        assert!(auth.account().unwrap_err().is_internal());
    }

    #[test]
    fn test_path_id() {
        let mut params = HashMap::new();
        params.insert("account_id".to_string(), "12".to_string());
        params.insert("application_id".to_string(), "abc".to_string());
        assert_eq!(path_id(&params, "account_id").unwrap(), 12);
        assert!(matches!(
            path_id(&params, "application_id"),
            Err(TapglueError::BadRequest(_))
        ));
    }
}
