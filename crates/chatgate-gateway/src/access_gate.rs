//! §4.1 AccessGate: JWT validation, identity extraction, tiered
//! authorization, audit hook. Grounded on the bearer-token extraction and
//! claims-to-identity mapping of the pack's `jwks_bearer` security
//! provider, adapted to an axum middleware and simplified to RS256-only.

use crate::respond::error_response;
use crate::state::GatewayState;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use chatgate_core::{AuditOutcome, GatewayError, Identity, Tier};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde::Deserialize;
use std::sync::Arc;

const CLOCK_SKEW_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    org: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[allow(dead_code)]
    exp: usize,
}

fn extract_bearer(req: &Request) -> Option<&str> {
    let raw = req.headers().get(header::AUTHORIZATION)?.to_str().ok()?;
    raw.strip_prefix("Bearer ").map(str::trim)
}

fn classify_tier(claims: &Claims, admin_emails: &[String]) -> Tier {
    if claims.role.as_deref() == Some("admin") {
        return Tier::Admin;
    }
    if let Some(email) = &claims.email {
        if admin_emails.iter().any(|e| e == email) {
            return Tier::Admin;
        }
    }
    Tier::Authenticated
}

/// §4.1 steps 2-5: header `kid` lookup, JWKS-backed RS256 verification with
/// a 60s clock-skew allowance on `exp`/`nbf`/`iat`, required `sub`/`org`.
async fn validate(state: &GatewayState, token: &str) -> Result<Identity, GatewayError> {
    let header = decode_header(token).map_err(|e| GatewayError::Unauthorized(e.to_string()))?;
    let kid = header.kid.ok_or_else(|| GatewayError::Unauthorized("token has no kid".to_string()))?;

    let key = state
        .jwks
        .key_for(&kid)
        .await
        .map_err(|e| GatewayError::Unauthorized(e.to_string()))?;

    let mut validation = Validation::new(Algorithm::RS256);
    validation.leeway = CLOCK_SKEW_SECS;
    validation.validate_nbf = true;
    validation.set_required_spec_claims(&["exp", "sub"]);

    let data = decode::<Claims>(token, &key, &validation).map_err(|e| GatewayError::Unauthorized(e.to_string()))?;
    let claims = data.claims;
    let tier = classify_tier(&claims, &state.config.admin_emails);
    let identity = Identity {
        user_id: claims.sub,
        org_id: claims.org,
        email: claims.email,
        tier,
    };

    if !identity.is_valid() {
        return Err(GatewayError::Unauthorized("missing sub or org claim".to_string()));
    }

    Ok(identity)
}

/// Applied to every route under `/v1` (§6.1: minimum tier Authenticated).
pub async fn authenticate(State(state): State<Arc<GatewayState>>, mut req: Request, next: Next) -> Response {
    let route = req.uri().path().to_string();
    let method = req.method().to_string();

    let token = match extract_bearer(&req) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => {
            state.audit(&Identity::public(), &route, &method, AuditOutcome::Deny, Some("missing_token"));
            return error_response(&GatewayError::Unauthorized("missing or malformed bearer token".to_string()));
        }
    };

    let identity = match validate(&state, &token).await {
        Ok(identity) => identity,
        Err(e) => {
            state.audit(&Identity::public(), &route, &method, AuditOutcome::Deny, Some("invalid_token"));
            return error_response(&e);
        }
    };

    if !identity.tier.satisfies(Tier::Authenticated) {
        state.audit(&identity, &route, &method, AuditOutcome::Deny, Some("insufficient_tier"));
        return error_response(&GatewayError::Forbidden("insufficient tier".to_string()));
    }

    state.audit(&identity, &route, &method, AuditOutcome::Allow, None);
    req.extensions_mut().insert(identity);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_role_claim_upgrades_tier() {
        let claims = Claims {
            sub: "u1".into(),
            org: "o1".into(),
            email: None,
            role: Some("admin".into()),
            exp: 0,
        };
        assert_eq!(classify_tier(&claims, &[]), Tier::Admin);
    }

    #[test]
    fn admin_email_list_upgrades_tier() {
        let claims = Claims {
            sub: "u1".into(),
            org: "o1".into(),
            email: Some("root@example.com".into()),
            role: None,
            exp: 0,
        };
        assert_eq!(classify_tier(&claims, &["root@example.com".to_string()]), Tier::Admin);
    }

    #[test]
    fn ordinary_claims_are_authenticated_tier() {
        let claims = Claims {
            sub: "u1".into(),
            org: "o1".into(),
            email: Some("user@example.com".into()),
            role: None,
            exp: 0,
        };
        assert_eq!(classify_tier(&claims, &[]), Tier::Authenticated);
    }
}
