//! Configuration types for toolbridge

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{BridgeError, Result};
use crate::plugins::DEFAULT_DESCRIPTOR_FILES;
use crate::tools::SecurityPolicy;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct ToolbridgeConfig {
    /// Plugin discovery and lifecycle
    pub plugins: PluginConfig,

    /// Tool execution pipeline
    pub executor: ExecutorConfig,

    /// LLM-tool loop limits
    pub bridge: BridgeConfig,
}

/// Plugin registry configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PluginConfig {
    /// Directories scanned by discovery; each subdirectory is one plugin
    pub search_paths: Vec<PathBuf>,

    /// Descriptor file names, tried in order
    pub descriptor_files: Vec<String>,

    /// Bound on the handler catalog probe performed while loading
    #[serde(with = "humantime_serde")]
    pub load_timeout: Duration,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            search_paths: dirs::config_dir()
                .map(|dir| dir.join("toolbridge").join("plugins"))
                .into_iter()
                .collect(),
            descriptor_files: DEFAULT_DESCRIPTOR_FILES
                .iter()
                .map(|f| f.to_string())
                .collect(),
            load_timeout: Duration::from_secs(30),
        }
    }
}

/// Tool executor configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Validate parameters against the tool schema
    pub enable_validation: bool,

    /// Cache successful results
    pub enable_cache: bool,

    /// Lifetime of a cached result
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,

    /// Timeout for provider calls when the caller sets none
    #[serde(with = "humantime_serde")]
    pub default_timeout: Duration,

    /// Allow/deny lists, permissions and rate limit
    pub security: SecurityPolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            enable_validation: true,
            enable_cache: true,
            cache_ttl: Duration::from_secs(300),
            default_timeout: Duration::from_secs(30),
            security: SecurityPolicy::default(),
        }
    }
}

impl ExecutorConfig {
    pub fn with_security(mut self, security: SecurityPolicy) -> Self {
        self.security = security;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.enable_cache = false;
        self
    }
}

/// LLM-tool bridge configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BridgeConfig {
    /// Describe the catalog to the model and execute its tool calls
    pub enable_tools: bool,

    /// Maximum model calls per generation
    pub max_iterations: usize,

    /// Maximum tool calls per generation
    pub max_tool_calls: usize,

    /// Upper bound for a single tool call
    #[serde(with = "humantime_serde")]
    pub tool_call_timeout: Duration,

    /// Upper bound for a model call, or for each chunk of a stream
    #[serde(with = "humantime_serde")]
    pub llm_timeout: Duration,

    /// Base system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            enable_tools: true,
            max_iterations: 5,
            max_tool_calls: 10,
            tool_call_timeout: Duration::from_secs(30),
            llm_timeout: Duration::from_secs(120),
            system_prompt: None,
        }
    }
}

/// Builder for ToolbridgeConfig
pub struct ConfigBuilder {
    config: ToolbridgeConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: ToolbridgeConfig::default(),
        }
    }

    /// Set plugin configuration
    pub fn plugins(mut self, config: PluginConfig) -> Self {
        self.config.plugins = config;
        self
    }

    /// Add a plugin search path
    pub fn search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.plugins.search_paths.push(path.into());
        self
    }

    /// Set executor configuration
    pub fn executor(mut self, config: ExecutorConfig) -> Self {
        self.config.executor = config;
        self
    }

    /// Set the executor security policy
    pub fn security(mut self, policy: SecurityPolicy) -> Self {
        self.config.executor.security = policy;
        self
    }

    /// Set bridge configuration
    pub fn bridge(mut self, config: BridgeConfig) -> Self {
        self.config.bridge = config;
        self
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.bridge.system_prompt = Some(prompt.into());
        self
    }

    /// Build the configuration
    pub fn build(self) -> ToolbridgeConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolbridgeConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Loads in this order:
    /// 1. Default configuration
    /// 2. `toolbridge.toml` in the working directory
    /// 3. The file named by `TOOLBRIDGE_CONFIG_PATH`
    /// 4. `TOOLBRIDGE_` environment variables, `__` separating sections
    ///    (`TOOLBRIDGE_BRIDGE__MAX_ITERATIONS=8`)
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the result is invalid.
    pub fn load() -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Toml},
        };

        let mut figment = Figment::from(Serialized::defaults(ToolbridgeConfig::default()))
            .merge(Toml::file("toolbridge.toml"));

        if let Ok(path) = std::env::var("TOOLBRIDGE_CONFIG_PATH") {
            figment = figment.merge(Toml::file(path));
        }

        let config: ToolbridgeConfig = figment
            .merge(Env::prefixed("TOOLBRIDGE_").ignore(&["CONFIG_PATH"]).split("__"))
            .extract()
            .map_err(|e| {
                BridgeError::Configuration(format!("Failed to load configuration: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Format, Toml},
        };

        let path = path.as_ref();
        if !path.is_file() {
            return Err(BridgeError::Configuration(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let config: ToolbridgeConfig = Figment::new()
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| {
                BridgeError::Configuration(format!("Failed to load configuration file: {}", e))
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error for zero timeouts, zero `max_iterations`, or a rate
    /// limit with no calls or an empty window.
    pub fn validate(&self) -> Result<()> {
        let timeouts = [
            ("plugins.load_timeout", self.plugins.load_timeout),
            ("executor.default_timeout", self.executor.default_timeout),
            ("bridge.tool_call_timeout", self.bridge.tool_call_timeout),
            ("bridge.llm_timeout", self.bridge.llm_timeout),
        ];
        for (field, value) in timeouts {
            if value.is_zero() {
                return Err(BridgeError::Configuration(format!(
                    "{} must be greater than zero",
                    field
                )));
            }
        }

        if self.bridge.max_iterations == 0 {
            return Err(BridgeError::Configuration(
                "bridge.max_iterations must be at least 1".to_string(),
            ));
        }

        if let Some(limit) = &self.executor.security.rate_limit {
            if limit.max_calls == 0 || limit.window.is_zero() {
                return Err(BridgeError::Configuration(
                    "executor.security.rate_limit needs max_calls > 0 and a non-empty window"
                        .to_string(),
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::RateLimitSpec;
    use figment::Jail;

    #[test]
    fn test_defaults_are_valid() {
        let config = ToolbridgeConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bridge.max_iterations, 5);
        assert_eq!(config.bridge.max_tool_calls, 10);
        assert_eq!(config.executor.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.plugins.descriptor_files[0], "plugin.json");
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = ToolbridgeConfig::default();
        config.bridge.max_iterations = 0;
        assert!(matches!(config.validate(), Err(BridgeError::Configuration(_))));

        let mut config = ToolbridgeConfig::default();
        config.executor.default_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let config = ConfigBuilder::new()
            .security(SecurityPolicy {
                rate_limit: Some(RateLimitSpec::new(0, Duration::from_secs(1))),
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_merges_file_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "toolbridge.toml",
                r#"
                [executor]
                cache_ttl = "10m"

                [executor.security]
                denied_tools = ["drop-table"]

                [executor.security.rate_limit]
                max_calls = 2
                window = "1s"

                [bridge]
                max_iterations = 3
                system_prompt = "You are a database assistant."
                "#,
            )?;
            jail.set_env("TOOLBRIDGE_BRIDGE__MAX_TOOL_CALLS", "4");

            let config = ToolbridgeConfig::load().expect("config should load");
            assert_eq!(config.executor.cache_ttl, Duration::from_secs(600));
            assert!(config.executor.enable_cache);
            assert!(config.executor.security.is_denied("drop-table"));
            assert_eq!(
                config.executor.security.rate_limit,
                Some(RateLimitSpec::new(2, Duration::from_secs(1)))
            );
            assert_eq!(config.bridge.max_iterations, 3);
            assert_eq!(config.bridge.max_tool_calls, 4);
            assert_eq!(
                config.bridge.system_prompt.as_deref(),
                Some("You are a database assistant.")
            );
            Ok(())
        });
    }

    #[test]
    fn test_config_path_overrides_default_file() {
        Jail::expect_with(|jail| {
            jail.create_file("toolbridge.toml", "[bridge]\nmax_iterations = 3\n")?;
            jail.create_file("custom.toml", "[bridge]\nmax_iterations = 9\n")?;
            jail.set_env("TOOLBRIDGE_CONFIG_PATH", "custom.toml");

            let config = ToolbridgeConfig::load().expect("config should load");
            assert_eq!(config.bridge.max_iterations, 9);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.create_file("toolbridge.toml", "[bridge]\nmax_iterations = 0\n")?;
            assert!(ToolbridgeConfig::load().is_err());
            Ok(())
        });
    }

    #[test]
    fn test_from_file() {
        Jail::expect_with(|jail| {
            jail.create_file("plugins.toml", "[plugins]\nsearch_paths = [\"/opt/plugins\"]\n")?;

            let config = ToolbridgeConfig::from_file("plugins.toml").expect("config should load");
            assert_eq!(config.plugins.search_paths, vec![PathBuf::from("/opt/plugins")]);
            assert!(ToolbridgeConfig::from_file("missing.toml").is_err());
            Ok(())
        });
    }

    #[test]
    fn test_builder() {
        let config = ConfigBuilder::new()
            .search_path("/srv/plugins")
            .executor(ExecutorConfig::default().without_cache())
            .system_prompt("Be brief.")
            .build();

        assert!(config.plugins.search_paths.contains(&PathBuf::from("/srv/plugins")));
        assert!(!config.executor.enable_cache);
        assert_eq!(config.bridge.system_prompt.as_deref(), Some("Be brief."));
    }
}
