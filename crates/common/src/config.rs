use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Address the API server binds to (default: 0.0.0.0:3000)
    pub api_bind_addr: String,

    /// Resend API key for email delivery. Without it messages are only logged.
    pub resend_api_key: Option<String>,

    /// Resend API base URL
    pub resend_api_url: String,

    /// Email sender address
    pub email_from: Option<String>,

    /// Per-request timeout for the mail transport in seconds (default: 10)
    pub transport_timeout_secs: u64,

    /// Maximum notifications selected per dispatch pass (default: 50)
    pub dispatch_batch_size: usize,

    /// Maximum concurrent delivery attempts within one pass (default: 8)
    pub dispatch_concurrency: usize,

    /// Attempts after which a notification is marked failed (default: 3)
    pub dispatch_max_attempts: u32,

    /// Base retry delay in seconds, doubled per failed attempt (default: 30, 0 disables)
    pub dispatch_backoff_base_secs: u64,

    /// Upper bound for the retry delay in seconds (default: 3600)
    pub dispatch_backoff_max_secs: u64,

    /// Age after which an in-progress claim is considered abandoned (default: 300)
    pub dispatch_claim_stale_after_secs: u64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", 20)?,
            api_bind_addr: std::env::var("API_BIND_ADDR")
                .unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            resend_api_url: std::env::var("RESEND_API_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            email_from: std::env::var("EMAIL_FROM").ok(),
            transport_timeout_secs: parse_var("TRANSPORT_TIMEOUT_SECS", 10)?,
            dispatch_batch_size: parse_var("DISPATCH_BATCH_SIZE", 50)?,
            dispatch_concurrency: parse_var("DISPATCH_CONCURRENCY", 8)?,
            dispatch_max_attempts: parse_var("DISPATCH_MAX_ATTEMPTS", 3)?,
            dispatch_backoff_base_secs: parse_var("DISPATCH_BACKOFF_BASE_SECS", 30)?,
            dispatch_backoff_max_secs: parse_var("DISPATCH_BACKOFF_MAX_SECS", 3600)?,
            dispatch_claim_stale_after_secs: parse_var("DISPATCH_CLAIM_STALE_AFTER_SECS", 300)?,
        })
    }
}

/// Read an optional numeric variable, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("RALLY_TEST_UNSET_VARIABLE", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_parse_var_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("RALLY_TEST_GARBAGE_VARIABLE", "not-a-number") };
        let result: anyhow::Result<u32> = parse_var("RALLY_TEST_GARBAGE_VARIABLE", 1);
        let err = result.unwrap_err().to_string();
        assert!(err.contains("RALLY_TEST_GARBAGE_VARIABLE"));
    }

    #[test]
    fn test_parse_var_reads_value() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("RALLY_TEST_PRESENT_VARIABLE", " 7 ") };
        let value: usize = parse_var("RALLY_TEST_PRESENT_VARIABLE", 1).unwrap();
        assert_eq!(value, 7);
    }
}
