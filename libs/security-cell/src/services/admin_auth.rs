use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use ipnet::IpNet;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

use shared_models::error::AppError;
use shared_utils::jwt::{issue_token, validate_token};

const ADMIN_TOKEN_TTL_HOURS: i64 = 8;

/// Bearer-token + IP-allowlist gate in front of every `/admin` route.
pub struct AdminGate {
    admin_token: String,
    jwt_secret: String,
    allowlist: Vec<IpNet>,
}

impl AdminGate {
    pub fn new(admin_token: &str, jwt_secret: &str, allowlist_cidrs: &[String]) -> Self {
        let allowlist = allowlist_cidrs
            .iter()
            .filter_map(|raw| match raw.parse::<IpNet>() {
                Ok(net) => Some(net),
                Err(_) => {
                    warn!("Ignoring unparsable admin CIDR {}", raw);
                    None
                }
            })
            .collect();
        Self {
            admin_token: admin_token.to_string(),
            jwt_secret: jwt_secret.to_string(),
            allowlist,
        }
    }

    /// Exchanges the configured bootstrap token for a short-lived JWT.
    pub fn login(&self, presented_token: &str) -> Result<String, AppError> {
        if self.admin_token.is_empty() || self.jwt_secret.is_empty() {
            return Err(AppError::Internal("admin surface not configured".to_string()));
        }
        if presented_token != self.admin_token {
            metrics::counter!("auth_denied_total").increment(1);
            return Err(AppError::Auth("invalid credentials".to_string()));
        }
        issue_token("admin", &self.jwt_secret, ADMIN_TOKEN_TTL_HOURS)
            .map_err(AppError::Internal)
    }

    pub fn ip_allowed(&self, addr: &SocketAddr) -> bool {
        self.allowlist.iter().any(|net| net.contains(&addr.ip()))
    }

    pub fn check_bearer(&self, token: &str) -> Result<(), AppError> {
        validate_token(token, &self.jwt_secret).map_err(|e| {
            metrics::counter!("auth_denied_total").increment(1);
            AppError::Auth(e)
        })?;
        Ok(())
    }
}

/// Middleware for the admin router. Rejects 403 when the source IP is not
/// allowlisted and 401 when the bearer token is missing or invalid. The
/// login route is mounted outside this guard.
pub async fn admin_guard(
    State(gate): State<Arc<AdminGate>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    if !gate.ip_allowed(&addr) {
        metrics::counter!("auth_denied_total").increment(1);
        return Err(AppError::Forbidden("IP not allowed".to_string()));
    }

    let auth_header = request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::Auth("Missing authorization header".to_string()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| AppError::Auth("Invalid authorization header format".to_string()))?;

    gate.check_bearer(token)?;

    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> AdminGate {
        AdminGate::new(
            "bootstrap-token",
            "a-jwt-secret-long-enough",
            &["127.0.0.0/8".to_string()],
        )
    }

    #[test]
    fn login_issues_validatable_token() {
        let gate = gate();
        let jwt = gate.login("bootstrap-token").unwrap();
        assert!(gate.check_bearer(&jwt).is_ok());
    }

    #[test]
    fn login_rejects_wrong_token() {
        let gate = gate();
        assert!(gate.login("wrong").is_err());
    }

    #[test]
    fn ip_allowlist_checks_cidr() {
        let gate = gate();
        assert!(gate.ip_allowed(&"127.0.0.1:9999".parse().unwrap()));
        assert!(!gate.ip_allowed(&"200.1.2.3:9999".parse().unwrap()));
    }

    #[test]
    fn unconfigured_gate_refuses_login() {
        let gate = AdminGate::new("", "", &[]);
        assert!(gate.login("anything").is_err());
    }
}
