use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub role: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues an HS256 token for the admin surface.
pub fn issue_token(subject: &str, jwt_secret: &str, ttl_hours: i64) -> Result<String, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let now = chrono::Utc::now().timestamp();
    let header = JwtHeader {
        alg: "HS256".to_string(),
        typ: "JWT".to_string(),
    };
    let claims = AdminClaims {
        sub: subject.to_string(),
        role: "admin".to_string(),
        iat: now,
        exp: now + ttl_hours * 3600,
    };

    let header_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header).map_err(|e| e.to_string())?);
    let claims_b64 = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).map_err(|e| e.to_string())?);
    let signing_input = format!("{}.{}", header_b64, claims_b64);

    let mut mac = HmacSha256::new_from_slice(jwt_secret.as_bytes())
        .map_err(|_| "Failed to create HMAC".to_string())?;
    mac.update(signing_input.as_bytes());
    let signature_b64 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", signing_input, signature_b64))
}

/// Validates an admin token and returns its claims.
pub fn validate_token(token: &str, jwt_secret: &str) -> Result<AdminClaims, String> {
    if jwt_secret.is_empty() {
        return Err("JWT secret is not set".to_string());
    }

    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return Err("Invalid token format".to_string());
    }

    let signature = match URL_SAFE_NO_PAD.decode(parts[2]) {
        Ok(sig) => sig,
        Err(e) => {
            debug!("Failed to decode signature: {}", e);
            return Err("Invalid signature encoding".to_string());
        }
    };

    let signing_input = format!("{}.{}", parts[0], parts[1]);

    let mut mac = HmacSha256::new_from_slice(jwt_secret.as_bytes())
        .map_err(|_| "Failed to create HMAC".to_string())?;
    mac.update(signing_input.as_bytes());

    if mac.verify_slice(&signature).is_err() {
        debug!("Token signature verification failed");
        return Err("Invalid token signature".to_string());
    }

    let claims_json = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|_| "Invalid claims encoding".to_string())
        .and_then(|bytes| String::from_utf8(bytes).map_err(|_| "Invalid claims encoding".to_string()))?;

    let claims: AdminClaims =
        serde_json::from_str(&claims_json).map_err(|_| "Invalid claims format".to_string())?;

    if claims.exp < chrono::Utc::now().timestamp() {
        return Err("Token expired".to_string());
    }

    debug!("Token validated successfully for {}", claims.sub);
    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issue_then_validate_roundtrip() {
        let token = issue_token("admin", "a-long-enough-test-secret", 1).unwrap();
        let claims = validate_token(&token, "a-long-enough-test-secret").unwrap();
        assert_eq!(claims.sub, "admin");
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn rejects_wrong_secret() {
        let token = issue_token("admin", "secret-one-value", 1).unwrap();
        assert!(validate_token(&token, "secret-two-value").is_err());
    }

    #[test]
    fn rejects_expired_token() {
        let token = issue_token("admin", "a-long-enough-test-secret", -1).unwrap();
        assert!(validate_token(&token, "a-long-enough-test-secret").is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!(validate_token("not.a.token", "a-long-enough-test-secret").is_err());
        assert!(validate_token("nope", "a-long-enough-test-secret").is_err());
    }
}
