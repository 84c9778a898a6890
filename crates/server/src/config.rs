use std::env;

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_url: String,
    pub jwt_secret: String,
    pub remote: Option<RemoteConfig>,
    pub seed_demo: bool,
}

/// Credentials for the hosted data service. When absent the server runs in
/// demo mode against the local SQLite mirror.
#[derive(Clone, Debug)]
pub struct RemoteConfig {
    pub url: String,
    pub api_key: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let remote = match (non_empty("REMOTE_URL"), non_empty("REMOTE_API_KEY")) {
            (Some(url), Some(api_key)) => Some(RemoteConfig {
                url: url.trim_end_matches('/').to_string(),
                api_key,
            }),
            _ => None,
        };

        Self {
            port: lookup("PORT")
                .and_then(|p| p.parse().ok())
                .unwrap_or(3000),
            database_url: lookup("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:./data/microspace.db?mode=rwc".to_string()),
            jwt_secret: lookup("JWT_SECRET")
                .unwrap_or_else(|| "development-secret-change-in-production".to_string()),
            remote,
            seed_demo: lookup("SEED_DEMO")
                .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
                .unwrap_or(false),
        }
    }
}
