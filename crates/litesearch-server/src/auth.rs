//! Bearer tokens: base64url JSON claims plus an HMAC-SHA256 signature,
//! written as `payload.sig`.

use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as b64, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::Sha256;

use crate::config::Settings;

type HmacSha256 = Hmac<Sha256>;

pub type Rejection = (StatusCode, Json<serde_json::Value>);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
}

fn mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length
    HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key")
}

pub fn issue_token(secret: &str, sub: &str, ttl_secs: u64, now: i64) -> String {
    let claims = Claims {
        sub: sub.to_string(),
        exp: now + ttl_secs as i64,
    };
    let payload = serde_json::to_vec(&claims).unwrap_or_default();
    let mut m = mac(secret);
    m.update(&payload);
    let sig = m.finalize().into_bytes();
    format!("{}.{}", b64.encode(&payload), b64.encode(sig))
}

pub fn verify_token(secret: &str, token: &str, now: i64) -> Result<Claims, &'static str> {
    let (payload, sig) = token.split_once('.').ok_or("bad token")?;
    let payload = b64.decode(payload).map_err(|_| "bad b64")?;
    let sig = b64.decode(sig).map_err(|_| "bad b64")?;
    let mut m = mac(secret);
    m.update(&payload);
    m.verify_slice(&sig).map_err(|_| "bad sig")?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| "bad claims")?;
    if claims.exp < now {
        return Err("expired");
    }
    Ok(claims)
}

fn unauthorized(msg: &str) -> Rejection {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg })))
}

/// Checks the request's bearer token. Passes everything through when no
/// secret key is configured.
pub fn authorize(settings: &Settings, headers: &HeaderMap) -> Result<Option<Claims>, Rejection> {
    let Some(secret) = settings.secret_key.as_deref() else {
        return Ok(None);
    };
    let token = match headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        Some(s) if s.starts_with("Bearer ") => &s[7..],
        _ => return Err(unauthorized("missing token")),
    };
    verify_token(secret, token, chrono::Utc::now().timestamp())
        .map(Some)
        .map_err(unauthorized)
}

/// Credentials check for `/auth/token`. Never succeeds with an empty
/// configured password.
pub fn authenticate(settings: &Settings, username: &str, password: &str) -> bool {
    !settings.admin_password.is_empty()
        && username == settings.admin_user
        && password == settings.admin_password
}
