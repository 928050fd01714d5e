//! 服务配置
//!
//! 从配置文件加载，`TRACKING__` 前缀的环境变量可覆盖任意字段

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use tracing::info;
use tracking_integration::FhirConfig;
use tracking_workflow::{RuleTable, RuleTableConfig};

/// 服务完整配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// FHIR服务器连接
    pub fhir: FhirConfig,
    /// 升级扫描
    #[serde(default)]
    pub sweep: SweepConfig,
    /// 日志
    #[serde(default)]
    pub logging: LoggingConfig,
    /// 规则表覆盖
    #[serde(default)]
    pub rules: Option<RuleTableConfig>,
}

/// 升级扫描配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SweepConfig {
    /// 扫描间隔（秒）
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// 只扫描这些患者，为空时扫描全部
    #[serde(default)]
    pub patients: Vec<String>,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            patients: Vec::new(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ServerConfig {
    /// 从文件加载配置
    pub fn load(config_path: &str) -> Result<Self> {
        let settings = Config::builder()
            .add_source(File::with_name(config_path))
            .add_source(Environment::with_prefix("TRACKING").separator("__"))
            .build()
            .with_context(|| format!("Failed to read configuration from {}", config_path))?;

        let config: ServerConfig = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(config)
    }

    /// 验证配置
    pub fn validate(&self) -> Result<()> {
        let base_url = self.fhir.base_url.trim();
        if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
            anyhow::bail!("fhir.base_url must be an http(s) URL, got {:?}", self.fhir.base_url);
        }
        if self.fhir.timeout_secs == 0 {
            anyhow::bail!("fhir.timeout_secs must be positive");
        }
        if self.sweep.interval_secs == 0 {
            anyhow::bail!("sweep.interval_secs must be positive");
        }

        self.rule_table()?;

        info!("Configuration validation passed");
        Ok(())
    }

    /// 构建规则表（默认规则加配置覆盖）
    pub fn rule_table(&self) -> Result<RuleTable> {
        let table = match &self.rules {
            Some(rules) => RuleTable::from_config(rules),
            None => Ok(RuleTable::default()),
        };
        table.context("Invalid rule table configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tracking_core::Priority;
    use tracking_integration::AuthenticationConfig;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn load(contents: &str) -> Result<ServerConfig> {
        let file = write_config(contents);
        ServerConfig::load(file.path().to_str().unwrap())
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load(
            r#"
            [fhir]
            base_url = "https://fhir.example.org/r4"
            "#,
        )
        .unwrap();

        assert_eq!(config.sweep.interval_secs, 60);
        assert!(config.sweep.patients.is_empty());
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.fhir.timeout_secs, 30);
        assert!(matches!(config.fhir.auth, AuthenticationConfig::None));
        assert!(config.validate().is_ok());

        let table = config.rule_table().unwrap();
        assert_eq!(table.rule(Priority::Critical).time_limit_minutes, 60);
    }

    #[test]
    fn test_full_config() {
        let config = load(
            r#"
            [fhir]
            base_url = "https://fhir.example.org/r4"
            timeout_secs = 10
            auth = { type = "bearer_token", token = "abc" }

            [sweep]
            interval_secs = 15
            patients = ["p-1", "p-2"]

            [logging]
            level = "debug"

            [rules.critical]
            required_actions = ["acknowledge"]
            time_limit_minutes = 30
            escalation_levels = [
                { level = 1, offset_minutes = 10, action = "reminder" },
                { level = 2, offset_minutes = 30, action = "department_alert" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.sweep.patients, vec!["p-1", "p-2"]);
        assert!(matches!(
            config.fhir.auth,
            AuthenticationConfig::BearerToken { ref token } if token == "abc"
        ));

        let table = config.rule_table().unwrap();
        assert_eq!(table.rule(Priority::Critical).time_limit_minutes, 30);
        // 未覆盖的层级保持默认
        assert_eq!(table.rule(Priority::High).time_limit_minutes, 24 * 60);
    }

    #[test]
    fn test_invalid_rule_table_rejected() {
        let config = load(
            r#"
            [fhir]
            base_url = "https://fhir.example.org/r4"

            [rules.high]
            required_actions = ["review"]
            time_limit_minutes = 100
            escalation_levels = [
                { level = 1, offset_minutes = 60, action = "reminder" },
                { level = 2, offset_minutes = 30, action = "reminder" },
            ]
            "#,
        )
        .unwrap();

        assert!(config.rule_table().is_err());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = load(
            r#"
            [fhir]
            base_url = "fhir.example.org"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config = load(
            r#"
            [fhir]
            base_url = "http://localhost:8080/fhir"

            [sweep]
            interval_secs = 0
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(ServerConfig::load("/nonexistent/tracking-config").is_err());
    }

    #[test]
    fn test_missing_fhir_section_fails() {
        assert!(load("[sweep]\ninterval_secs = 5\n").is_err());
    }
}
