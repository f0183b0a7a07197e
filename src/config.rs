use once_cell::sync::Lazy;

/// Postgres connection string. Required; read lazily (not cached) so tests
/// can set it per-process before the pool is built.
pub fn database_url() -> String {
    std::env::var("DATABASE_URL").expect("DATABASE_URL must be set")
}

/// GitHub App numeric id. Required.
pub static GITHUB_APP_ID: Lazy<String> =
    Lazy::new(|| std::env::var("GITHUB_APP_ID").expect("GITHUB_APP_ID must be set"));

/// PEM-encoded RSA private key used to sign application JWTs. Required.
pub static GITHUB_APP_PRIVATE_KEY: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_APP_PRIVATE_KEY").expect("GITHUB_APP_PRIVATE_KEY must be set")
});

/// Installation id the app is acting as. Required.
pub static GITHUB_APP_INSTALLATION_ID: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_APP_INSTALLATION_ID").expect("GITHUB_APP_INSTALLATION_ID must be set")
});

/// Organization the engine scans. Required.
pub static GITHUB_ORG: Lazy<String> =
    Lazy::new(|| std::env::var("GITHUB_ORG").expect("GITHUB_ORG must be set"));

/// Override for the platform API base URL; used by test harnesses.
pub static GITHUB_API_BASE_URL: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_API_BASE_URL").unwrap_or_else(|_| "https://api.github.com".to_string())
});

/// Pre-shared secret used to verify inbound webhook signatures. Required.
pub static GITHUB_WEBHOOK_SECRET: Lazy<String> = Lazy::new(|| {
    std::env::var("GITHUB_WEBHOOK_SECRET").expect("GITHUB_WEBHOOK_SECRET must be set")
});

/// Bypasses the team-membership authorizer unconditionally. Defaults to `false`.
pub static TEST_MODE_ENABLED: Lazy<bool> = Lazy::new(|| {
    std::env::var("TEST_MODE_ENABLED")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
});

/// Continue startup despite a failed migration run. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    std::env::var("ALLOW_MIGRATION_FAILURE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false)
});

/// HTTP bind address. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".to_string()));

/// HTTP bind port. Defaults to `8080`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    std::env::var("BIND_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8080)
});
