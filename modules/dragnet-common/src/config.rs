use std::env;
use std::time::Duration;

/// Engine configuration loaded from environment variables. Everything has a
/// default so a bare environment still runs; API keys are only required by
/// the adapters that use them.
#[derive(Debug, Clone)]
pub struct Config {
    // Concurrency ceilings (in-flight fetches per source type)
    pub max_in_flight_web: usize,
    pub max_in_flight_paper: usize,
    pub max_in_flight_government: usize,

    // Rate limiting (sliding window)
    pub web_rate_ceiling: usize,
    pub web_rate_window: Duration,
    pub api_rate_ceiling: usize,
    pub api_rate_window: Duration,

    // Retry policy
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
    pub retry_budget: u32,

    // Job policy
    /// Fraction of items allowed to fail permanently while the job still
    /// completes. 1.0 means a job fails only when every item failed.
    pub failure_tolerance: f64,
    /// Keep results from fetches that finish after their job was cancelled.
    pub store_after_cancel: bool,

    // Adapter behavior
    pub fetch_timeout: Duration,
    pub pacing_min_delay: Duration,
    pub pacing_max_delay: Duration,

    // Upstream API keys (empty when not configured)
    pub paper_api_key: String,
    pub government_api_key: String,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            max_in_flight_web: env_or("DRAGNET_MAX_IN_FLIGHT_WEB", 2),
            max_in_flight_paper: env_or("DRAGNET_MAX_IN_FLIGHT_PAPER", 8),
            max_in_flight_government: env_or("DRAGNET_MAX_IN_FLIGHT_GOV", 8),
            web_rate_ceiling: env_or("DRAGNET_WEB_RATE_CEILING", 10),
            web_rate_window: Duration::from_millis(env_or("DRAGNET_WEB_RATE_WINDOW_MS", 60_000)),
            api_rate_ceiling: env_or("DRAGNET_API_RATE_CEILING", 60),
            api_rate_window: Duration::from_millis(env_or("DRAGNET_API_RATE_WINDOW_MS", 60_000)),
            retry_base_delay: Duration::from_millis(env_or("DRAGNET_RETRY_BASE_MS", 500)),
            retry_max_delay: Duration::from_millis(env_or("DRAGNET_RETRY_MAX_MS", 30_000)),
            retry_budget: env_or("DRAGNET_RETRY_BUDGET", 5),
            failure_tolerance: env_or("DRAGNET_FAILURE_TOLERANCE", 1.0),
            store_after_cancel: env::var("DRAGNET_STORE_AFTER_CANCEL")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            fetch_timeout: Duration::from_millis(env_or("DRAGNET_FETCH_TIMEOUT_MS", 45_000)),
            pacing_min_delay: Duration::from_millis(env_or("DRAGNET_PACING_MIN_MS", 1_500)),
            pacing_max_delay: Duration::from_millis(env_or("DRAGNET_PACING_MAX_MS", 6_000)),
            paper_api_key: env::var("DRAGNET_PAPER_API_KEY").unwrap_or_default(),
            government_api_key: env::var("DRAGNET_GOV_API_KEY").unwrap_or_default(),
        }
    }

    /// Log the effective configuration without leaking keys.
    pub fn log_redacted(&self) {
        tracing::info!(
            max_in_flight_web = self.max_in_flight_web,
            max_in_flight_paper = self.max_in_flight_paper,
            web_rate_ceiling = self.web_rate_ceiling,
            retry_budget = self.retry_budget,
            failure_tolerance = self.failure_tolerance,
            paper_api_key_set = !self.paper_api_key.is_empty(),
            government_api_key_set = !self.government_api_key.is_empty(),
            "Config loaded"
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(v) => v
            .parse()
            .unwrap_or_else(|_| panic!("{key} must parse as {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
