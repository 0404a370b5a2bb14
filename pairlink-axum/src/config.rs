use anyhow::{anyhow, Result};
use pairlink_core::ConfigSnapshot;

/// HTTP server and observer-auth settings.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
    pub jwt_secret: String,
    /// Cookie carrying the session JWT.
    pub cookie_name: String,
    /// Claim holding the owner id; `sub` is the fallback.
    pub owner_claim: String,
}

impl HttpConfig {
    pub fn from_snapshot(snapshot: &ConfigSnapshot) -> Result<Self> {
        let jwt_secret = snapshot
            .get_string("auth.jwt.secret")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| anyhow!("auth.jwt.secret is not configured"))?;

        let port = match snapshot.get("http.port") {
            Some(raw) => raw
                .trim()
                .parse::<u16>()
                .map_err(|e| anyhow!("invalid http.port {raw:?}: {e}"))?,
            None => 5000,
        };

        Ok(Self {
            host: snapshot
                .get_string("http.host")
                .unwrap_or_else(|| "127.0.0.1".to_string()),
            port,
            jwt_secret,
            cookie_name: snapshot
                .get_string("auth.cookie")
                .unwrap_or_else(|| "token".to_string()),
            owner_claim: snapshot
                .get_string("auth.owner_claim")
                .unwrap_or_else(|| "userId".to_string()),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
