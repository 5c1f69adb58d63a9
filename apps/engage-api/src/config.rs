/// Engagement service configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string.
    pub database_url: String,
    /// HS256 secret that client bearer tokens are signed with.
    pub auth_jwt_secret: String,
    /// Call-provider API key.
    pub stream_api_key: String,
    /// Call-provider API secret. Signs server tokens and webhook bodies.
    pub stream_api_secret: String,
    /// Call-provider REST origin.
    pub stream_base_url: String,
    /// Generative-text API key.
    pub gemini_api_key: String,
    /// Generative-text model name.
    pub gemini_model: String,
    /// Generative-text REST origin.
    pub gemini_base_url: String,
    /// Per-request timeout for generative-text calls, in seconds.
    pub oracle_timeout_secs: u64,
    /// Period of each session's recommendation task, in seconds.
    pub recommendation_interval_secs: u64,
    /// Allowed CORS origin. Any origin when unset.
    pub client_url: Option<String>,
    /// Port the HTTP server binds to.
    pub port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            database_url: required_var("DATABASE_URL"),
            auth_jwt_secret: required_var("AUTH_JWT_SECRET"),
            stream_api_key: required_var("STREAM_API_KEY"),
            stream_api_secret: required_var("STREAM_API_SECRET"),
            stream_base_url: optional_var("STREAM_BASE_URL")
                .unwrap_or_else(|| "https://video.stream-io-api.com".to_string()),
            gemini_api_key: required_var("GEMINI_API_KEY"),
            gemini_model: optional_var("GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            gemini_base_url: optional_var("GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            oracle_timeout_secs: parsed_var("ORACLE_TIMEOUT_SECS").unwrap_or(20),
            recommendation_interval_secs: parsed_var("RECOMMENDATION_INTERVAL_SECS").unwrap_or(60),
            client_url: optional_var("CLIENT_URL"),
            port: parsed_var("PORT").unwrap_or(4010),
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
