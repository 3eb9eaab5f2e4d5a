use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Redis connection string (queues and the write-behind buffer share it)
    pub redis_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port for the real-time gateway and health routes (default: 3000)
    pub http_port: u16,

    /// Key prefix for every queue key in Redis (default: "herald")
    pub queue_prefix: String,

    /// Resend API key for email delivery
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Interval between buffer flushes in milliseconds (default: 300000 = 5 min)
    pub flush_interval_ms: u64,

    /// Maximum number of buffered records drained per flush (default: 1000)
    pub flush_batch_size: usize,

    /// Simultaneous notification jobs per worker (default: 5)
    pub notification_concurrency: usize,

    /// Notification job starts allowed per second (default: 50)
    pub notification_rate_per_sec: u32,

    /// Simultaneous email jobs per worker (default: 5)
    pub email_concurrency: usize,

    /// Email job starts allowed per second (default: 10)
    pub email_rate_per_sec: u32,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            redis_url: std::env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            db_max_connections: parse_var("DB_MAX_CONNECTIONS", "20")?,
            http_port: parse_var("HTTP_PORT", "3000")?,
            queue_prefix: std::env::var("QUEUE_PREFIX").unwrap_or_else(|_| "herald".to_string()),
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            flush_interval_ms: parse_var("FLUSH_INTERVAL_MS", "300000")?,
            flush_batch_size: parse_var("FLUSH_BATCH_SIZE", "1000")?,
            notification_concurrency: parse_var("NOTIFICATION_CONCURRENCY", "5")?,
            notification_rate_per_sec: parse_var("NOTIFICATION_RATE_PER_SEC", "50")?,
            email_concurrency: parse_var("EMAIL_CONCURRENCY", "5")?,
            email_rate_per_sec: parse_var("EMAIL_RATE_PER_SEC", "10")?,
        })
    }
}

/// Read `name` from the environment, falling back to `default`, and parse it.
fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> anyhow::Result<T> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| {
            anyhow::anyhow!(
                "{} must be a valid {}",
                name,
                std::any::type_name::<T>()
            )
        })
}
