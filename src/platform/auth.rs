use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use tokio::sync::Mutex;

use super::PlatformError;

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Serialize)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

/// Caches the installation access token in-process until it is within one
/// minute of expiry. Refreshes are serialized through the mutex so
/// concurrent callers share a single in-flight issuance (spec §4.1).
pub struct InstallationTokenCache {
    cached: Mutex<Option<CachedToken>>,
}

impl InstallationTokenCache {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    /// Returns a valid installation token, minting a fresh app JWT and
    /// exchanging it if the cache is empty or about to expire.
    pub async fn get_token<F, Fut>(&self, issue: F) -> Result<String, PlatformError>
    where
        F: FnOnce(String) -> Fut,
        Fut: std::future::Future<Output = Result<(String, DateTime<Utc>), PlatformError>>,
    {
        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at - Utc::now() > Duration::minutes(1) {
                return Ok(cached.token.clone());
            }
        }
        let app_jwt = mint_app_jwt()?;
        let (token, expires_at) = issue(app_jwt).await?;
        *guard = Some(CachedToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    pub async fn invalidate(&self) {
        let mut guard = self.cached.lock().await;
        *guard = None;
    }
}

impl Default for InstallationTokenCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Mints a short-lived application JWT (<=10 minutes) signed with the app's
/// RSA private key, per the GitHub Apps authentication model.
fn mint_app_jwt() -> Result<String, PlatformError> {
    let app_id = crate::config::GITHUB_APP_ID.as_str();
    let private_key_pem = crate::config::GITHUB_APP_PRIVATE_KEY.as_str();
    let now = Utc::now();
    let claims = AppClaims {
        iat: (now - Duration::seconds(30)).timestamp(),
        exp: (now + Duration::minutes(9)).timestamp(),
        iss: app_id.to_string(),
    };
    let key = EncodingKey::from_rsa_pem(private_key_pem.as_bytes())
        .map_err(|e| PlatformError::Unexpected(format!("invalid app private key: {e}")))?;
    encode(&Header::new(Algorithm::RS256), &claims, &key)
        .map_err(|e| PlatformError::Unexpected(format!("failed to sign app jwt: {e}")))
}
