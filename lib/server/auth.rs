//! Basic authentication on the write side of the wire.
//!
//! Reads stay anonymous so pull-through consumers work without credentials;
//! writes require one of the configured Basic credentials once any are set.

use axum::{
    extract::{Request, State},
    http::{header, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};

use crate::config::AUTH_REALM;

use super::{
    state::ServerState,
    types::{ErrorEnvelope, WireError},
};

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Middleware gating `POST`/`PUT`/`PATCH`/`DELETE` behind Basic auth.
pub async fn require_write_auth(
    State(state): State<ServerState>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method();
    if method == Method::GET || method == Method::HEAD || method == Method::OPTIONS {
        return next.run(request).await;
    }

    let users = state.get_config().get_auth().get_users();
    if users.is_empty() {
        return next.run(request).await;
    }

    let presented = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(decode_basic);

    if let Some((username, password)) = presented {
        let accepted = users
            .iter()
            .any(|u| u.get_username() == &username && u.get_password() == &password);
        if accepted {
            return next.run(request).await;
        }
    }

    unauthorized()
}

/// Decodes `Basic <base64(user:pass)>`.
fn decode_basic(header: &str) -> Option<(String, String)> {
    let encoded = header.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let text = String::from_utf8(decoded).ok()?;
    let (username, password) = text.split_once(':')?;
    Some((username.to_string(), password.to_string()))
}

/// The 401 challenge response.
fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(
            header::WWW_AUTHENTICATE,
            format!("Basic realm=\"{}\"", AUTH_REALM),
        )],
        Json(ErrorEnvelope {
            errors: vec![WireError {
                code: "UNAUTHORIZED".to_string(),
                message: "authentication required".to_string(),
            }],
        }),
    )
        .into_response()
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
