use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use sqlpilot::agent::{AgentConfig, DEFAULT_MAX_ATTEMPTS};
use sqlpilot::generator::GeneratorConfig;
use sqlpilot::guard::{DEFAULT_MAX_ROWS, GuardConfig};
use sqlpilot::history::DEFAULT_CAPACITY;
use sqlpilot::llm::{DEFAULT_API_KEY_ENV, DEFAULT_BASE_URL, DEFAULT_MODEL, OpenRouterConfig};
use sqlpilot::validation::{DEFAULT_DENIED_VERBS, DEFAULT_MAX_STATEMENT_CHARS, SchemaAllowlist, ValidatorConfig};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub agent: AgentSection,
    pub guard: GuardSection,
    pub validation: ValidationSection,
    pub llm: LlmSection,
    pub database: DatabaseSection,
    pub storage: StorageSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_attempts: u32,
    pub history_window: usize,
    pub include_failed_in_context: bool,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            history_window: DEFAULT_CAPACITY,
            include_failed_in_context: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardSection {
    pub max_rows: usize,
    pub timeout_ms: u64,
}

impl Default for GuardSection {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            timeout_ms: 30000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationSection {
    pub max_statement_chars: usize,
    pub denied_verbs: Vec<String>,
    /// Table name -> allowed column names
    pub schema_allowlist: Option<BTreeMap<String, Vec<String>>>,
    /// Build the allowlist from the database schema instead
    pub introspect_schema: bool,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            max_statement_chars: DEFAULT_MAX_STATEMENT_CHARS,
            denied_verbs: DEFAULT_DENIED_VERBS.iter().map(|v| v.to_string()).collect(),
            schema_allowlist: None,
            introspect_schema: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout_ms: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            temperature: 0.0,
            max_tokens: None,
            timeout_ms: 60000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub path: PathBuf,
    /// Limit schema description to these tables (all tables when empty)
    pub tables: Vec<String>,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            path: PathBuf::from("database.db"),
            tables: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    pub history_dir: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            history_dir: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("sqlpilot")
                .join("history"),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            agent: AgentSection::default(),
            guard: GuardSection::default(),
            validation: ValidationSection::default(),
            llm: LlmSection::default(),
            database: DatabaseSection::default(),
            storage: StorageSection::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let project_name = env!("CARGO_PKG_NAME");

        // ~/.config/sqlpilot/sqlpilot.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // ./sqlpilot.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_attempts: self.agent.max_attempts,
            include_failed_in_context: self.agent.include_failed_in_context,
        }
    }

    pub fn guard_config(&self) -> GuardConfig {
        GuardConfig {
            max_rows: self.guard.max_rows,
            timeout: Duration::from_millis(self.guard.timeout_ms),
        }
    }

    /// Validator settings. An introspected allowlist wins over the configured map.
    pub fn validator_config(&self, introspected: Option<SchemaAllowlist>) -> ValidatorConfig {
        let allowlist = introspected.or_else(|| self.validation.schema_allowlist.as_ref().map(SchemaAllowlist::from_map));
        ValidatorConfig {
            max_statement_chars: self.validation.max_statement_chars,
            denied_verbs: self.validation.denied_verbs.clone(),
            allowlist,
        }
    }

    pub fn openrouter_config(&self) -> OpenRouterConfig {
        OpenRouterConfig {
            model: self.llm.model.clone(),
            base_url: self.llm.base_url.clone(),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
            timeout: Duration::from_millis(self.llm.timeout_ms),
        }
    }

    pub fn generator_config(&self) -> GeneratorConfig {
        GeneratorConfig {
            timeout: Duration::from_millis(self.llm.timeout_ms),
            temperature: self.llm.temperature,
            max_tokens: self.llm.max_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.agent.max_attempts, 3);
        assert_eq!(config.agent.history_window, 3);
        assert!(config.agent.include_failed_in_context);
        assert_eq!(config.guard.max_rows, 1000);
        assert_eq!(config.guard.timeout_ms, 30000);
        assert_eq!(config.validation.max_statement_chars, 4000);
        assert!(config.validation.denied_verbs.iter().any(|v| v == "DROP"));
        assert!(config.validation.schema_allowlist.is_none());
        assert_eq!(config.llm.model, "openrouter/auto");
        assert_eq!(config.llm.api_key_env, "OPEN_ROUTER");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("sqlpilot.yml");
        fs::write(
            &path,
            "agent:\n  max_attempts: 5\nguard:\n  timeout_ms: 1500\ndatabase:\n  path: /tmp/movies.db\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.agent.max_attempts, 5);
        assert_eq!(config.agent.history_window, 3);
        assert_eq!(config.guard.max_rows, 1000);
        assert_eq!(config.guard_config().timeout, Duration::from_millis(1500));
        assert_eq!(config.database.path, PathBuf::from("/tmp/movies.db"));
        assert_eq!(config.llm.model, "openrouter/auto");
    }

    #[test]
    fn test_explicit_missing_path_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("missing.yml");
        let err = Config::load(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to load config from"));
    }

    #[test]
    fn test_invalid_yaml_is_error() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bad.yml");
        fs::write(&path, "agent: [not, a, map").unwrap();
        assert!(Config::load(Some(&path)).is_err());
    }

    #[test]
    fn test_schema_allowlist_from_yaml() {
        let yaml = "validation:\n  schema_allowlist:\n    movies: [title, genre, year]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        let validator = config.validator_config(None);
        let allowlist = validator.allowlist.unwrap();
        assert!(allowlist.has_table("movies"));
        assert!(allowlist.has_column("genre"));
        assert!(!allowlist.has_table("users"));
    }

    #[test]
    fn test_introspected_allowlist_wins() {
        let yaml = "validation:\n  schema_allowlist:\n    movies: [title]\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();

        let introspected = SchemaAllowlist::new().with_table("users", ["name"]);
        let allowlist = config.validator_config(Some(introspected)).allowlist.unwrap();
        assert!(allowlist.has_table("users"));
        assert!(!allowlist.has_table("movies"));
    }

    #[test]
    fn test_llm_sections_share_timeout() {
        let mut config = Config::default();
        config.llm.timeout_ms = 2500;
        config.llm.max_tokens = Some(512);

        assert_eq!(config.openrouter_config().timeout, Duration::from_millis(2500));
        assert_eq!(config.generator_config().timeout, Duration::from_millis(2500));
        assert_eq!(config.generator_config().max_tokens, Some(512));
    }
}
