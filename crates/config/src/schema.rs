/// Config schema types (scheduler, storage, outbound HTTP, marketplaces, sync).
use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketsyncConfig {
    pub scheduler: SchedulerConfig,
    pub database: DatabaseConfig,
    pub http: HttpConfig,
    pub ozon: OzonConfig,
    pub sync: SyncConfig,
}

/// Channel scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When false no recurring jobs are created. Managers still accept
    /// on-demand triggers. Used for standby and maintenance deployments.
    pub enabled: bool,
    /// Re-read the channel row before each run so edits made after the job
    /// was scheduled are picked up.
    pub reload_channels: bool,
    /// IANA timezone used to evaluate interval, cron and daily triggers.
    /// `None` means UTC.
    pub timezone: Option<String>,
    /// Restrict bootstrap to these tenants. Empty means all tenants.
    pub tenants: Vec<String>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reload_channels: true,
            timezone: None,
            tenants: Vec::new(),
        }
    }
}

impl SchedulerConfig {
    /// Parse the configured timezone, falling back to UTC with a warning.
    pub fn tz(&self) -> Option<chrono_tz::Tz> {
        let name = self.timezone.as_deref()?;
        match name.parse::<chrono_tz::Tz>() {
            Ok(tz) => Some(tz),
            Err(_) => {
                tracing::warn!(timezone = name, "unknown scheduler timezone, using UTC");
                None
            },
        }
    }
}

/// Storage backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// sqlx connection URL.
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://marketsync.db?mode=rwc".into(),
            max_connections: 5,
        }
    }
}

/// Outbound HTTP client settings shared by all marketplace handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            user_agent: concat!("marketsync/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

/// Ozon Seller API handler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OzonConfig {
    pub base_url: String,
    /// Lifetime of cached categories, attribute schemas and dictionaries.
    pub cache_ttl_secs: u64,
    /// Dictionary page size requested from the API.
    pub dictionary_page_size: u32,
    /// Pages fetched before a dictionary is declared oversized.
    pub dictionary_max_pages: u32,
    /// Delay between product submission and the first task status query.
    pub task_poll_delay_ms: u64,
}

impl Default for OzonConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api-seller.ozon.ru".into(),
            cache_ttl_secs: 3600,
            dictionary_page_size: 5000,
            dictionary_max_pages: 25,
            task_poll_delay_ms: 2000,
        }
    }
}

/// Item persistence rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Channels whose item status is reset to "submitted" whenever a sync run
    /// changes item values, so downstream consumers re-export the item.
    pub dependent_channels: Vec<String>,
}
