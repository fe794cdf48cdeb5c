use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::{env_subst::substitute_env, schema::MarketsyncConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "marketsync.toml",
    "marketsync.yaml",
    "marketsync.yml",
    "marketsync.json",
];

/// Global switch that disables recurring channel jobs.
pub const NO_SCHEDULER_ENV: &str = "MARKETSYNC_NO_CHANNEL_SCHEDULER";

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<MarketsyncConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations, then apply env overrides.
///
/// Search order:
/// 1. `./marketsync.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/marketsync/marketsync.{toml,yaml,yml,json}` (user-global)
///
/// Falls back to `MarketsyncConfig::default()` if no config file is found.
pub fn discover_and_load() -> MarketsyncConfig {
    let mut config = match find_config_file() {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            load_config(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
                MarketsyncConfig::default()
            })
        },
        None => {
            debug!("no config file found, using defaults");
            MarketsyncConfig::default()
        },
    };
    apply_env_overrides(&mut config, |name| std::env::var(name).ok());
    config
}

/// Apply environment overrides on top of a loaded config.
///
/// `lookup` is injected so tests do not have to mutate the process env.
pub fn apply_env_overrides(
    config: &mut MarketsyncConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    if let Some(flag) = lookup(NO_SCHEDULER_ENV) {
        let disabled = matches!(flag.trim(), "true" | "1" | "yes");
        if disabled && config.scheduler.enabled {
            info!("channel scheduler disabled by {NO_SCHEDULER_ENV}");
        }
        config.scheduler.enabled = !disabled;
    }
    if let Some(url) = lookup("MARKETSYNC_DATABASE_URL").filter(|v| !v.trim().is_empty()) {
        config.database.url = url;
    }
    if let Some(url) = lookup("MARKETSYNC_OZON_BASE_URL").filter(|v| !v.trim().is_empty()) {
        config.ozon.base_url = url;
    }
}

/// Find the first config file in standard locations.
fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/marketsync/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "marketsync").map(|d| d.config_dir().to_path_buf())
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<MarketsyncConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    #[test]
    fn loads_yaml_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "ozon:\n  dictionary_max_pages: 3\n  cache_ttl_secs: 10").unwrap();
        let cfg = load_config(file.path()).unwrap();
        assert_eq!(cfg.ozon.dictionary_max_pages, 3);
        assert_eq!(cfg.ozon.cache_ttl_secs, 10);
    }

    #[test]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn env_flag_disables_scheduler() {
        let mut cfg = MarketsyncConfig::default();
        apply_env_overrides(&mut cfg, |name| {
            (name == NO_SCHEDULER_ENV).then(|| "true".to_string())
        });
        assert!(!cfg.scheduler.enabled);

        apply_env_overrides(&mut cfg, |name| {
            (name == NO_SCHEDULER_ENV).then(|| "false".to_string())
        });
        assert!(cfg.scheduler.enabled);
    }

    #[test]
    fn env_overrides_urls() {
        let mut cfg = MarketsyncConfig::default();
        apply_env_overrides(&mut cfg, |name| match name {
            "MARKETSYNC_DATABASE_URL" => Some("sqlite::memory:".into()),
            "MARKETSYNC_OZON_BASE_URL" => Some("http://127.0.0.1:9000".into()),
            _ => None,
        });
        assert_eq!(cfg.database.url, "sqlite::memory:");
        assert_eq!(cfg.ozon.base_url, "http://127.0.0.1:9000");
    }
}
