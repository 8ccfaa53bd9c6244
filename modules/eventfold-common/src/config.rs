use std::env;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Postgres
    pub database_url: String,

    /// Default consolidation/verification scope: country slugs, in order.
    pub countries: Vec<String>,

    /// Max offending rows included per verifier check.
    pub verify_sample_size: i64,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_env("DATABASE_URL"),
            countries: parse_countries(&env::var("EVENTFOLD_COUNTRIES").unwrap_or_default()),
            verify_sample_size: env::var("VERIFY_SAMPLE_SIZE")
                .unwrap_or_else(|_| "10".to_string())
                .parse()
                .expect("VERIFY_SAMPLE_SIZE must be a number"),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

/// Parse a comma-separated country list into normalized slugs.
fn parse_countries(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}
