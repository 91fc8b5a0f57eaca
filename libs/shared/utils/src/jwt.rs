use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use chrono::{Utc, TimeZone};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use shared_models::auth::{Actor, JwtClaims, Role};

type HmacSha256 = Hmac<Sha256>;

pub fn validate_token(token: &str, jwt_secret: &str) -> Result<Actor, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    // Split token into parts
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("Invalid token format".to_string());
    }

    let header_b64 = parts[0];
    let claims_b64 = parts[1];
    let signature_b64 = parts[2];

    let signature = match URL_SAFE_NO_PAD.decode(signature_b64) {
        Ok(sig) => sig,
        Err(e) => {
            debug!("Failed to decode signature: {}", e);
            return Err("Invalid signature encoding".to_string());
        }
    };

    let signature_string = format!("{}.{}", header_b64, claims_b64);

    let mut mac = match HmacSha256::new_from_slice(jwt_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return Err("Failed to create HMAC".to_string()),
    };

    mac.update(signature_string.as_bytes());

    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err("Invalid token signature".to_string());
    }

    let claims_json = match URL_SAFE_NO_PAD.decode(claims_b64) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(json_str) => json_str,
            Err(_) => return Err("Invalid claims encoding".to_string()),
        },
        Err(_) => return Err("Invalid claims encoding".to_string()),
    };

    let claims: JwtClaims = match serde_json::from_str(&claims_json) {
        Ok(c) => c,
        Err(e) => {
            debug!("Failed to parse claims: {}", e);
            return Err("Invalid claims format".to_string());
        },
    };

    if let Some(exp) = claims.exp {
        let now = Utc::now().timestamp() as u64;
        if exp < now {
            debug!("Token expired at {} (now: {})", exp, now);
            return Err("Token expired".to_string());
        }
    }

    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| "Token subject is not a valid user id".to_string())?;

    let role = resolve_role(&claims)
        .ok_or_else(|| "Token does not carry an application role".to_string())?;

    let authenticated_at = claims.iat
        .and_then(|timestamp| Utc.timestamp_opt(timestamp as i64, 0).single());

    let actor = Actor {
        user_id,
        role,
        email: claims.email,
        authenticated_at,
    };

    debug!("Token validated successfully for {} {}", actor.role, actor.user_id);
    Ok(actor)
}

/// Supabase puts its own `authenticated` role in the top-level claim, so the
/// application role is looked up in metadata first.
fn resolve_role(claims: &JwtClaims) -> Option<Role> {
    let metadata_role = |metadata: &Option<Value>| {
        metadata.as_ref()
            .and_then(|m| m.get("role"))
            .and_then(Value::as_str)
            .and_then(|role| role.parse::<Role>().ok())
    };

    metadata_role(&claims.app_metadata)
        .or_else(|| metadata_role(&claims.user_metadata))
        .or_else(|| claims.role.as_deref().and_then(|role| role.parse().ok()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{JwtTestUtils, TestUser};

    const SECRET: &str = "test-secret-key-for-jwt-validation-must-be-long-enough";

    #[test]
    fn valid_token_yields_actor() {
        let user = TestUser::caregiver("carer@example.com");
        let token = JwtTestUtils::create_test_token(&user, SECRET, Some(1));

        let actor = validate_token(&token, SECRET).unwrap();
        assert_eq!(actor.user_id, user.id);
        assert_eq!(actor.role, Role::Caregiver);
        assert_eq!(actor.email.as_deref(), Some("carer@example.com"));
    }

    #[test]
    fn expired_and_tampered_tokens_are_rejected() {
        let user = TestUser::patient("patient@example.com");

        let expired = JwtTestUtils::create_expired_token(&user, SECRET);
        assert_eq!(validate_token(&expired, SECRET).unwrap_err(), "Token expired");

        let forged = JwtTestUtils::create_invalid_signature_token(&user);
        assert_eq!(validate_token(&forged, SECRET).unwrap_err(), "Invalid token signature");

        let malformed = JwtTestUtils::create_malformed_token();
        assert!(validate_token(&malformed, SECRET).is_err());
    }

    #[test]
    fn metadata_role_takes_precedence() {
        let claims: JwtClaims = serde_json::from_value(serde_json::json!({
            "sub": Uuid::new_v4().to_string(),
            "role": "authenticated",
            "app_metadata": { "role": "doctor" }
        })).unwrap();

        assert_eq!(resolve_role(&claims), Some(Role::Doctor));
    }

    #[test]
    fn token_without_role_is_rejected() {
        let token = JwtTestUtils::create_token_with_claims(serde_json::json!({
            "sub": Uuid::new_v4().to_string(),
            "role": "authenticated"
        }), SECRET);

        assert!(validate_token(&token, SECRET).is_err());
    }
}
