//! Configuration for Reunite
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use uuid::Uuid;

/// Reunite - case registry and face-matching gateway
#[derive(Parser, Debug, Clone)]
#[command(name = "reunite")]
#[command(about = "Case registry and face-matching gateway for missing and found person reports")]
pub struct Args {
    /// Unique node identifier for this instance
    #[arg(long, env = "NODE_ID", default_value_t = Uuid::new_v4())]
    pub node_id: Uuid,

    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "reunite")]
    pub mongodb_db: String,

    /// Redis URL for the shared rate-limiter cache
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379")]
    pub redis_url: String,

    /// Base URL of the face-embedding service
    #[arg(long, env = "EMBEDDING_URL", default_value = "http://localhost:9000")]
    pub embedding_url: String,

    /// Base URL of the content-safety moderation service
    #[arg(long, env = "MODERATION_URL", default_value = "http://localhost:9100")]
    pub moderation_url: String,

    /// API key for the moderation service (optional)
    #[arg(long, env = "MODERATION_KEY")]
    pub moderation_key: Option<String>,

    /// Highest tolerated moderation severity (0-7); any category at or
    /// above this rejects the image
    #[arg(long, env = "MODERATION_MAX_SEVERITY", default_value = "2")]
    pub moderation_max_severity: u8,

    /// Base URL of the object storage service for case images
    #[arg(long, env = "STORAGE_URL", default_value = "http://localhost:8091")]
    pub storage_url: String,

    /// Base URL of the vector index service
    #[arg(long, env = "VECTOR_URL", default_value = "http://localhost:9200")]
    pub vector_url: String,

    /// API key for the vector index (optional)
    #[arg(long, env = "VECTOR_API_KEY")]
    pub vector_api_key: Option<String>,

    /// JWT secret for token validation (required in production)
    #[arg(long, env = "JWT_SECRET")]
    pub jwt_secret: Option<String>,

    /// Enable development mode (insecure default JWT secret)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Timeout for outbound service calls in milliseconds
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Similarity-search cooldown per case, in seconds
    #[arg(long, env = "SEARCH_COOLDOWN_SECS", default_value = "14400")]
    pub search_cooldown_secs: u64,

    /// Rate-limit window in seconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_SECS", default_value = "60")]
    pub rate_limit_window_secs: u64,

    /// Maximum requests per identity per window
    #[arg(long, env = "RATE_LIMIT_MAX", default_value = "100")]
    pub rate_limit_max: u64,

    /// Global cap on concurrently live notification sessions
    #[arg(long, env = "MAX_SESSIONS", default_value = "10000")]
    pub max_sessions: usize,

    /// Number of durable notifications sent in the initial stream batch
    #[arg(long, env = "INITIAL_NOTIFICATIONS", default_value = "20")]
    pub initial_notifications: usize,

    /// Page size advertised in the stream pagination descriptor
    #[arg(long, env = "NOTIFICATIONS_PAGE_SIZE", default_value = "20")]
    pub notifications_page_size: usize,

    /// Side-effect queue capacity
    #[arg(long, env = "OUTBOX_QUEUE_SIZE", default_value = "1024")]
    pub outbox_queue_size: usize,

    /// Grace period on shutdown for in-flight requests, in seconds
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value = "10")]
    pub shutdown_grace_secs: u64,

    /// Hard exit after this many seconds of shutdown, regardless of
    /// in-flight work
    #[arg(long, env = "SHUTDOWN_FORCE_SECS", default_value = "30")]
    pub shutdown_force_secs: u64,
}

impl Args {
    /// Get effective JWT secret (uses default in dev mode)
    pub fn jwt_secret(&self) -> String {
        if self.dev_mode {
            self.jwt_secret
                .clone()
                .unwrap_or_else(|| "dev-only-insecure-secret".to_string())
        } else {
            self.jwt_secret
                .clone()
                .expect("JWT_SECRET is required in production mode")
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn search_cooldown(&self) -> Duration {
        Duration::from_secs(self.search_cooldown_secs)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if !self.dev_mode && self.jwt_secret.is_none() {
            return Err("JWT_SECRET is required in production mode".to_string());
        }

        if self.moderation_max_severity > 7 {
            return Err("MODERATION_MAX_SEVERITY must be between 0 and 7".to_string());
        }

        if self.shutdown_grace_secs >= self.shutdown_force_secs {
            return Err("SHUTDOWN_GRACE_SECS must be less than SHUTDOWN_FORCE_SECS".to_string());
        }

        if self.rate_limit_max == 0 || self.rate_limit_window_secs == 0 {
            return Err("rate limit window and maximum must be non-zero".to_string());
        }

        Ok(())
    }
}
