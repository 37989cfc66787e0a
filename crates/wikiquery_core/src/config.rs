use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_LIMIT: usize = 10;
pub const DEFAULT_MAX_LIMIT: usize = 500;
pub const DEFAULT_MAX_LIMIT_PRIVILEGED: usize = 5000;
pub const DEFAULT_MAX_RESULT_SIZE: usize = 8 * 1024 * 1024;
pub const DEFAULT_MAX_PAGE_SET: usize = 5000;
/// Hard ceiling on any per-request row limit; keeps `limit + 1` inside SQLite's `LIMIT` range.
pub const LIMIT_CEILING: usize = i32::MAX as usize;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct QueryConfig {
    #[serde(default)]
    pub api: ApiSection,
    #[serde(default)]
    pub generator: GeneratorSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ApiSection {
    pub default_limit: Option<usize>,
    pub max_limit: Option<usize>,
    pub max_limit_privileged: Option<usize>,
    pub max_result_size: Option<usize>,
    pub max_page_set: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GeneratorSection {
    #[serde(default = "default_restart_volatile_on_cap")]
    pub restart_volatile_on_cap: bool,
}

impl Default for GeneratorSection {
    fn default() -> Self {
        Self {
            restart_volatile_on_cap: default_restart_volatile_on_cap(),
        }
    }
}

fn default_restart_volatile_on_cap() -> bool {
    true
}

/// Resolved per-request limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiLimits {
    pub default_limit: usize,
    pub max_limit: usize,
    pub max_limit_privileged: usize,
    pub max_result_size: usize,
    pub max_page_set: usize,
}

impl Default for ApiLimits {
    fn default() -> Self {
        Self {
            default_limit: DEFAULT_LIMIT,
            max_limit: DEFAULT_MAX_LIMIT,
            max_limit_privileged: DEFAULT_MAX_LIMIT_PRIVILEGED,
            max_result_size: DEFAULT_MAX_RESULT_SIZE,
            max_page_set: DEFAULT_MAX_PAGE_SET,
        }
    }
}

impl ApiLimits {
    pub fn max_for(&self, privileged: bool) -> usize {
        let max = if privileged {
            self.max_limit_privileged.max(self.max_limit)
        } else {
            self.max_limit
        };
        max.min(LIMIT_CEILING)
    }
}

impl QueryConfig {
    /// Resolve limits: env > config > built-in default.
    pub fn limits(&self) -> ApiLimits {
        self.limits_with_lookup(|key| env::var(key).ok())
    }

    pub fn limits_with_lookup<F>(&self, lookup_env: F) -> ApiLimits
    where
        F: Fn(&str) -> Option<String>,
    {
        let resolve = |key: &str, configured: Option<usize>, default: usize| -> usize {
            if let Some(value) = lookup_env(key)
                && let Ok(parsed) = value.trim().parse::<usize>()
                && parsed > 0
            {
                return parsed.min(LIMIT_CEILING);
            }
            configured
                .filter(|value| *value > 0)
                .unwrap_or(default)
                .min(LIMIT_CEILING)
        };

        let max_limit = resolve("WIKIQUERY_MAX_LIMIT", self.api.max_limit, DEFAULT_MAX_LIMIT);
        ApiLimits {
            default_limit: self
                .api
                .default_limit
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_LIMIT)
                .min(max_limit),
            max_limit,
            max_limit_privileged: resolve(
                "WIKIQUERY_MAX_LIMIT_PRIVILEGED",
                self.api.max_limit_privileged,
                DEFAULT_MAX_LIMIT_PRIVILEGED,
            ),
            max_result_size: resolve(
                "WIKIQUERY_MAX_RESULT_SIZE",
                self.api.max_result_size,
                DEFAULT_MAX_RESULT_SIZE,
            ),
            max_page_set: self
                .api
                .max_page_set
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_MAX_PAGE_SET),
        }
    }
}

/// Load and parse a QueryConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<QueryConfig> {
    if !config_path.exists() {
        return Ok(QueryConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: QueryConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# wikiquery runtime configuration (materialized by `wikiquery init`)\n\n[api]\ndefault_limit = {DEFAULT_LIMIT}\nmax_limit = {DEFAULT_MAX_LIMIT}\nmax_limit_privileged = {DEFAULT_MAX_LIMIT_PRIVILEGED}\nmax_result_size = {DEFAULT_MAX_RESULT_SIZE}\nmax_page_set = {DEFAULT_MAX_PAGE_SET}\n\n[generator]\n# Volatile generators (allrevisions, alldeletedrevisions, recentchanges) that fill\n# the page set on their first batch return a restart hint instead of a token.\nrestart_volatile_on_cap = true\n"
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use tempfile::tempdir;

    #[test]
    fn default_config_uses_builtin_limits() {
        let limits = QueryConfig::default().limits_with_lookup(|_| None);
        assert_eq!(limits, ApiLimits::default());
        assert!(QueryConfig::default().generator.restart_volatile_on_cap);
    }

    #[test]
    fn load_config_returns_default_for_missing_file() {
        let config = load_config(Path::new("/nonexistent/config.toml")).expect("load config");
        assert_eq!(config, QueryConfig::default());
    }

    #[test]
    fn load_config_parses_sections() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(
            &config_path,
            r#"
[api]
default_limit = 20
max_limit = 50
max_page_set = 7

[generator]
restart_volatile_on_cap = false
"#,
        )
        .expect("write config");

        let config = load_config(&config_path).expect("load config");
        let limits = config.limits_with_lookup(|_| None);
        assert_eq!(limits.default_limit, 20);
        assert_eq!(limits.max_limit, 50);
        assert_eq!(limits.max_limit_privileged, DEFAULT_MAX_LIMIT_PRIVILEGED);
        assert_eq!(limits.max_page_set, 7);
        assert!(!config.generator.restart_volatile_on_cap);
    }

    #[test]
    fn env_overrides_config_values() {
        let config = QueryConfig {
            api: ApiSection {
                max_limit: Some(50),
                ..ApiSection::default()
            },
            ..QueryConfig::default()
        };
        let env = HashMap::from([
            ("WIKIQUERY_MAX_LIMIT".to_string(), "25".to_string()),
            ("WIKIQUERY_MAX_RESULT_SIZE".to_string(), "not-a-number".to_string()),
        ]);
        let limits = config.limits_with_lookup(|key| env.get(key).cloned());
        assert_eq!(limits.max_limit, 25);
        assert_eq!(limits.max_result_size, DEFAULT_MAX_RESULT_SIZE);
    }

    #[test]
    fn default_limit_never_exceeds_max() {
        let config = QueryConfig {
            api: ApiSection {
                default_limit: Some(900),
                max_limit: Some(100),
                ..ApiSection::default()
            },
            ..QueryConfig::default()
        };
        assert_eq!(config.limits_with_lookup(|_| None).default_limit, 100);
    }

    #[test]
    fn huge_maxima_are_capped() {
        let config = QueryConfig {
            api: ApiSection {
                max_limit: Some(usize::MAX),
                ..ApiSection::default()
            },
            ..QueryConfig::default()
        };
        let env = HashMap::from([(
            "WIKIQUERY_MAX_LIMIT_PRIVILEGED".to_string(),
            usize::MAX.to_string(),
        )]);
        let limits = config.limits_with_lookup(|key| env.get(key).cloned());
        assert_eq!(limits.max_limit, LIMIT_CEILING);
        assert_eq!(limits.max_limit_privileged, LIMIT_CEILING);

        let unchecked = ApiLimits {
            max_limit_privileged: usize::MAX,
            ..ApiLimits::default()
        };
        assert_eq!(unchecked.max_for(true), LIMIT_CEILING);
    }

    #[test]
    fn rendered_default_config_round_trips() {
        let parsed: QueryConfig = toml::from_str(&render_default_config()).expect("parse");
        assert_eq!(parsed.limits_with_lookup(|_| None), ApiLimits::default());
    }

    #[test]
    fn load_config_returns_error_for_invalid_toml() {
        let temp = tempdir().expect("tempdir");
        let config_path = temp.path().join("config.toml");
        fs::write(&config_path, "[api\nmax_limit = 3").expect("write config");
        let error = load_config(&config_path).expect_err("must fail");
        assert!(error.to_string().contains("failed to parse"));
    }
}
