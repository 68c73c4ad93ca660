use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    /// Base URL of the identity collaborator (code exchange + session lookup).
    pub identity_url: String,
    /// Base URL of the hosting provider's REST API.
    pub hosting_api_url: String,
    /// Where the identity callback sends users when no `redirect_to` is given.
    pub default_redirect: String,
    /// Allowed dashboard origin for CORS.
    pub dashboard_origin: String,
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();

    Ok(Config {
        port: std::env::var("LAUNCHPAD_PORT")
            .unwrap_or_else(|_| "8080".into())
            .parse()
            .unwrap_or(8080),
        database_url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/launchpad".into()),
        identity_url: std::env::var("LAUNCHPAD_IDENTITY_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:9999".into()),
        hosting_api_url: std::env::var("LAUNCHPAD_HOSTING_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".into()),
        default_redirect: std::env::var("LAUNCHPAD_DEFAULT_REDIRECT")
            .unwrap_or_else(|_| "/dashboard".into()),
        dashboard_origin: std::env::var("DASHBOARD_ORIGIN")
            .unwrap_or_else(|_| "http://localhost:3000".into()),
    })
}
