//! Session token verification.
//!
//! Tokens are issued by the storefront. A token is a form-encoded claim set
//! (`uid`, `role`, `exp`, optionally `name` and `email`) plus `sig`, the hex
//! HMAC-SHA256 of the other claims as sorted `key=value` lines joined by `\n`.
//! Requests carry it as `Authorization: Session <token>`.

use axum::http::{header, HeaderMap, StatusCode};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;

use crate::models::{api_error, ApiError};

type HmacSha256 = Hmac<Sha256>;

const SCHEME: &str = "Session ";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Customer => "customer",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    pub id: String,
    pub role: Role,
    pub name: Option<String>,
    pub email: Option<String>,
}

impl SessionUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

fn claim_string(claims: &BTreeMap<String, String>) -> String {
    claims
        .iter()
        .filter(|(k, _)| k.as_str() != "sig")
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("\n")
}

fn mac_for(secret: &str) -> Option<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes()).ok()
}

/// Validate a token's signature and expiry at unix time `now`.
pub fn verify_token(token: &str, secret: &str, now: i64) -> Option<SessionUser> {
    if secret.is_empty() {
        return None;
    }
    let claims: BTreeMap<String, String> = url::form_urlencoded::parse(token.as_bytes())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let sig = hex::decode(claims.get("sig")?).ok()?;
    let mut mac = mac_for(secret)?;
    mac.update(claim_string(&claims).as_bytes());
    if mac.verify_slice(&sig).is_err() {
        tracing::warn!("Session token signature mismatch");
        return None;
    }

    let exp: i64 = claims.get("exp")?.parse().ok()?;
    if exp < now {
        tracing::warn!("Session token expired {}s ago", now - exp);
        return None;
    }

    let role = match claims.get("role").map(String::as_str) {
        Some("admin") => Role::Admin,
        Some("customer") | None => Role::Customer,
        Some(_) => return None,
    };
    let id = claims.get("uid").filter(|u| !u.is_empty())?.clone();
    let non_empty = |key: &str| claims.get(key).filter(|v| !v.is_empty()).cloned();

    Some(SessionUser {
        id,
        role,
        name: non_empty("name"),
        email: non_empty("email"),
    })
}

/// `None` when the header is absent; `Some(Err)` when it is present but invalid.
pub fn user_from_headers(
    headers: &HeaderMap,
    secret: &str,
) -> Option<Result<SessionUser, ApiError>> {
    let value = headers.get(header::AUTHORIZATION)?;
    let user = value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix(SCHEME))
        .and_then(|token| verify_token(token.trim(), secret, chrono::Utc::now().timestamp()))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "Invalid session"));
    Some(user)
}

/// Require a signed-in user.
pub fn require_user(headers: &HeaderMap, secret: &str) -> Result<SessionUser, ApiError> {
    user_from_headers(headers, secret)
        .unwrap_or_else(|| Err(api_error(StatusCode::UNAUTHORIZED, "Please sign in")))
}

/// Require a signed-in administrator.
pub fn require_admin(headers: &HeaderMap, secret: &str) -> Result<SessionUser, ApiError> {
    let user = require_user(headers, secret)?;
    if !user.is_admin() {
        return Err(api_error(StatusCode::FORBIDDEN, "Admin access required"));
    }
    Ok(user)
}

/// Sign a claim set. Issuance lives in the storefront; this mirrors it for tests.
#[cfg(test)]
pub fn issue_token(claims: &[(&str, &str)], secret: &str) -> String {
    let map: BTreeMap<String, String> = claims
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let mut mac = mac_for(secret).unwrap();
    mac.update(claim_string(&map).as_bytes());
    let sig = hex::encode(mac.finalize().into_bytes());

    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(map.iter())
        .append_pair("sig", &sig)
        .finish()
}

/// A customer token valid for an hour.
#[cfg(test)]
pub fn customer_token(uid: &str, secret: &str) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600).to_string();
    issue_token(&[("uid", uid), ("role", "customer"), ("exp", &exp)], secret)
}

#[cfg(test)]
pub fn admin_token(uid: &str, secret: &str) -> String {
    let exp = (chrono::Utc::now().timestamp() + 3600).to_string();
    issue_token(&[("uid", uid), ("role", "admin"), ("exp", &exp)], secret)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-session-secret";
    const NOW: i64 = 1_780_000_000;

    fn token(claims: &[(&str, &str)]) -> String {
        issue_token(claims, SECRET)
    }

    fn headers(value: &str) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(header::AUTHORIZATION, value.parse().unwrap());
        h
    }

    #[test]
    fn test_valid_token() {
        let t = token(&[
            ("uid", "user-1"),
            ("role", "customer"),
            ("exp", "1780000100"),
            ("name", "Ana Lima"),
            ("email", "ana@example.com"),
        ]);
        let user = verify_token(&t, SECRET, NOW).unwrap();
        assert_eq!(user.id, "user-1");
        assert_eq!(user.role, Role::Customer);
        assert_eq!(user.name.as_deref(), Some("Ana Lima"));
        assert_eq!(user.email.as_deref(), Some("ana@example.com"));
    }

    #[test]
    fn test_tampered_claim_rejected() {
        let t = token(&[("uid", "user-1"), ("role", "customer"), ("exp", "1780000100")]);
        let forged = t.replace("role=customer", "role=admin");
        assert!(verify_token(&forged, SECRET, NOW).is_none());
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let t = issue_token(&[("uid", "u"), ("exp", "1780000100")], "other");
        assert!(verify_token(&t, SECRET, NOW).is_none());
    }

    #[test]
    fn test_expired_rejected() {
        let t = token(&[("uid", "u"), ("exp", "1779999999")]);
        assert!(verify_token(&t, SECRET, NOW).is_none());
    }

    #[test]
    fn test_missing_fields_rejected() {
        assert!(verify_token(&token(&[("uid", "u")]), SECRET, NOW).is_none());
        assert!(verify_token(&token(&[("exp", "1780000100")]), SECRET, NOW).is_none());
        assert!(verify_token(&token(&[("uid", "u"), ("exp", "1780000100"), ("role", "owner")]), SECRET, NOW).is_none());
        assert!(verify_token("uid=u&exp=1780000100", SECRET, NOW).is_none());
    }

    #[test]
    fn test_empty_secret_never_verifies() {
        let t = issue_token(&[("uid", "u"), ("exp", "1780000100")], "");
        assert!(verify_token(&t, "", NOW).is_none());
    }

    #[test]
    fn test_role_defaults_to_customer() {
        let user = verify_token(&token(&[("uid", "u"), ("exp", "1780000100")]), SECRET, NOW).unwrap();
        assert!(!user.is_admin());
    }

    #[test]
    fn test_header_extraction() {
        assert!(user_from_headers(&HeaderMap::new(), SECRET).is_none());

        let bad = user_from_headers(&headers("Bearer abc"), SECRET).unwrap();
        assert_eq!(bad.unwrap_err().0, StatusCode::UNAUTHORIZED);

        let user = require_user(&headers(&format!("Session {}", customer_token("u1", SECRET))), SECRET).unwrap();
        assert_eq!(user.id, "u1");
    }

    #[test]
    fn test_admin_required() {
        let customer = headers(&format!("Session {}", customer_token("u1", SECRET)));
        assert_eq!(require_admin(&customer, SECRET).unwrap_err().0, StatusCode::FORBIDDEN);

        let admin = headers(&format!("Session {}", admin_token("boss", SECRET)));
        assert!(require_admin(&admin, SECRET).unwrap().is_admin());

        assert_eq!(
            require_admin(&HeaderMap::new(), SECRET).unwrap_err().0,
            StatusCode::UNAUTHORIZED
        );
    }
}
