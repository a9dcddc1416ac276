/// Per-request context
///
/// Built once per API request after routing: the body is buffered here so that the
/// signature check and the handler both see the same bytes, and the access line is
/// written here once the response is known.
use crate::context::AppContext;
use crate::error::{ErrorList, TapglueError};
use axum::{
    async_trait,
    body::{Body, Bytes},
    extract::{FromRequestParts, MatchedPath, OriginalUri, Request, State},
    http::{header, request::Parts, Method},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

/// Supported API versions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V0_1,
    V0_2,
    V0_3,
    V0_4,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 4] = [Self::V0_1, Self::V0_2, Self::V0_3, Self::V0_4];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V0_1 => "0.1",
            Self::V0_2 => "0.2",
            Self::V0_3 => "0.3",
            Self::V0_4 => "0.4",
        }
    }

    /// Version string mixed into request signatures
    pub fn request_version(&self) -> String {
        format!("tg_{}_request", self.as_str())
    }

    /// Later versions authenticate with `x-tapglue-app-key` instead of a signature
    pub fn uses_app_key(&self) -> bool {
        *self != Self::V0_1
    }
}

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub id: String,
    pub version: ApiVersion,
    pub method: Method,
    pub path: String,
    /// Route template without the version prefix
    pub scope: String,
    pub host: String,
    pub body: Bytes,
    pub started: Instant,
}

impl RequestContext {
    /// Decode and validate the buffered body, collecting every field error
    pub fn decode<T: DeserializeOwned + Validate>(&self) -> Result<T, ErrorList> {
        validated(self.decode_unchecked::<T>()?)
    }

    /// Decode the buffered body without field validation
    pub fn decode_unchecked<T: DeserializeOwned>(&self) -> Result<T, ErrorList> {
        serde_json::from_slice(&self.body)
            .map_err(|e| TapglueError::BadRequest(format!("failed to decode payload: {}", e)).into())
    }

    /// Overlay the body onto a stored record and validate the result
    ///
    /// Top-level fields missing from the body, or sent as `null`, keep their stored
    /// value, so a partial update never resets `enabled` or clears other fields.
    pub fn decode_onto<T>(&self, existing: &T) -> Result<T, ErrorList>
    where
        T: Serialize + DeserializeOwned + Validate,
    {
        validated(self.decode_onto_unchecked(existing)?)
    }

    /// Like [`decode_onto`](Self::decode_onto) without field validation
    pub fn decode_onto_unchecked<T>(&self, existing: &T) -> Result<T, ErrorList>
    where
        T: Serialize + DeserializeOwned,
    {
        let mut merged = serde_json::to_value(existing)
            .map_err(|e| TapglueError::Internal(format!("failed to encode record: {}", e)))?;
        let patch: Value = self.decode_unchecked()?;

        match (merged.as_object_mut(), patch) {
            (Some(target), Value::Object(fields)) => {
                target.extend(fields.into_iter().filter(|(_, value)| !value.is_null()));
            }
            _ => {
                return Err(TapglueError::BadRequest("failed to decode payload: expected a JSON object".to_string()).into())
            }
        }

        serde_json::from_value(merged)
            .map_err(|e| TapglueError::BadRequest(format!("failed to decode payload: {}", e)).into())
    }
}

fn validated<T: Validate>(value: T) -> Result<T, ErrorList> {
    if let Err(errors) = value.validate() {
        let mut list = ErrorList::default();
        flatten_validation("", &errors, &mut list);
        return Err(list);
    }
    Ok(value)
}

fn flatten_validation(prefix: &str, errors: &ValidationErrors, out: &mut ErrorList) {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by_key(|(field, _)| field.to_string());

    for (field, kind) in fields {
        let path = match (prefix.is_empty(), field.to_string().as_str()) {
            (_, "__all__") => prefix.to_string(),
            (true, name) => name.to_string(),
            (false, name) => format!("{}.{}", prefix, name),
        };
        match kind {
            ValidationErrorsKind::Field(list) => {
                for error in list {
                    let message = error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("{} is invalid", path));
                    out.push(TapglueError::BadRequest(message));
                }
            }
            ValidationErrorsKind::Struct(inner) => flatten_validation(&path, inner, out),
            ValidationErrorsKind::List(items) => {
                let mut items: Vec<_> = items.iter().collect();
                items.sort_by_key(|(index, _)| **index);
                for (index, inner) in items {
                    flatten_validation(&format!("{}[{}]", path, index), inner, out);
                }
            }
        }
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for RequestContext {
    type Rejection = TapglueError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .ok_or_else(|| TapglueError::Internal("request context missing".to_string()))
    }
}

/// Build the request context, run the rest of the stack and log the access line
pub async fn prepare(
    State(ctx): State<AppContext>,
    Extension(version): Extension<ApiVersion>,
    matched: MatchedPath,
    request: Request,
    next: Next,
) -> Response {
    let started = Instant::now();
    let id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let prefix = format!("/{}", version.as_str());
    let scope = matched
        .as_str()
        .strip_prefix(&prefix)
        .unwrap_or(matched.as_str())
        .to_string();

    let response = match buffer(request, ctx.config.service.max_body_bytes).await {
        Ok((mut request, body)) => {
            let rc = RequestContext {
                id: id.clone(),
                version,
                method: method.clone(),
                // Nesting strips the version prefix; signatures cover the full path
                path: request
                    .extensions()
                    .get::<OriginalUri>()
                    .map(|uri| uri.path().to_string())
                    .unwrap_or_else(|| request.uri().path().to_string()),
                scope: scope.clone(),
                host: request
                    .headers()
                    .get(header::HOST)
                    .and_then(|h| h.to_str().ok())
                    .unwrap_or_default()
                    .to_string(),
                body,
                started,
            };
            request.extensions_mut().insert(rc);
            next.run(request).await
        }
        Err(e) => e.into_response(),
    };

    info!(
        target: "tapglue::access",
        request_id = %id,
        method = %method,
        route = %scope,
        version = version.as_str(),
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}

async fn buffer(request: Request, limit: usize) -> Result<(Request, Bytes), TapglueError> {
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if user_agent.trim().is_empty() {
        return Err(TapglueError::BadRequest("User-Agent header must be set".to_string()));
    }

    let declared = request
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return Err(TapglueError::BadRequest("payload too large".to_string()));
    }

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, limit)
        .await
        .map_err(|_| TapglueError::BadRequest("payload too large".to_string()))?;
    Ok((Request::from_parts(parts, Body::from(bytes.clone())), bytes))
}
