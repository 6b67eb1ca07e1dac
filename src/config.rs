//! Process-level run configuration, loaded once from environment variables
//! and CLI flags and treated as read-only for the remainder of the process.

use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: String, message: String },
}

/// Loaded once at process start; the PAT is deliberately never accepted via
/// config file or CLI flag (spec.md §6).
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub organization_url: String,
    pub project: String,
    pub pat: String,
    pub data_dir: PathBuf,
    pub concurrency: usize,
    pub request_timeout_secs: u64,
    pub ingestion_timeout_secs: u64,
    pub calculator_config_path: PathBuf,
}

fn env_required(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.into()))
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(val) => val.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            var: name.into(),
            message: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

impl RunConfig {
    /// Loads and validates configuration from the environment. `data_dir`
    /// and `concurrency` may be overridden afterwards by CLI flags.
    pub fn from_env() -> Result<Self, ConfigError> {
        let organization_url = env_required("AZURE_DEVOPS_ORG_URL")?;
        let project = env_required("AZURE_DEVOPS_PROJECT")?;
        let pat = env_required("AZURE_DEVOPS_PAT")?;
        let data_dir = env::var("FLOW_METRICS_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));
        let concurrency = env_parse_or("FLOW_METRICS_CONCURRENCY", 5usize)?;
        let request_timeout_secs = env_parse_or("FLOW_METRICS_REQUEST_TIMEOUT_SECS", 30u64)?;
        let ingestion_timeout_secs =
            env_parse_or("FLOW_METRICS_INGESTION_TIMEOUT_SECS", 600u64)?;
        let calculator_config_path = env::var("FLOW_METRICS_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("config.json"));

        let config = Self {
            organization_url,
            project,
            pat,
            data_dir,
            concurrency,
            request_timeout_secs,
            ingestion_timeout_secs,
            calculator_config_path,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.organization_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                var: "AZURE_DEVOPS_ORG_URL".into(),
                message: "must not be empty".into(),
            });
        }
        if !(1..=20).contains(&self.concurrency) {
            return Err(ConfigError::InvalidValue {
                var: "FLOW_METRICS_CONCURRENCY".into(),
                message: format!("{} is outside the allowed range 1-20", self.concurrency),
            });
        }
        Ok(())
    }

    pub fn work_items_path(&self) -> PathBuf {
        self.data_dir.join("work_items.json")
    }

    pub fn report_path(&self) -> PathBuf {
        self.data_dir.join("flow_metrics_report.json")
    }

    pub fn dashboard_data_path(&self) -> PathBuf {
        self.data_dir.join("dashboard_data.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "AZURE_DEVOPS_ORG_URL",
            "AZURE_DEVOPS_PROJECT",
            "AZURE_DEVOPS_PAT",
            "FLOW_METRICS_DATA_DIR",
            "FLOW_METRICS_CONCURRENCY",
            "FLOW_METRICS_REQUEST_TIMEOUT_SECS",
            "FLOW_METRICS_INGESTION_TIMEOUT_SECS",
            "FLOW_METRICS_CONFIG_PATH",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn missing_pat_is_a_config_error() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("AZURE_DEVOPS_ORG_URL", "https://dev.azure.com/acme");
        env::set_var("AZURE_DEVOPS_PROJECT", "Widgets");
        let err = RunConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(v) if v == "AZURE_DEVOPS_PAT"));
        clear_env();
    }

    #[test]
    #[serial]
    fn concurrency_out_of_range_is_rejected() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("AZURE_DEVOPS_ORG_URL", "https://dev.azure.com/acme");
        env::set_var("AZURE_DEVOPS_PROJECT", "Widgets");
        env::set_var("AZURE_DEVOPS_PAT", "secret");
        env::set_var("FLOW_METRICS_CONCURRENCY", "21");
        let err = RunConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { var, .. } if var == "FLOW_METRICS_CONCURRENCY"));
        clear_env();
    }

    #[test]
    #[serial]
    fn defaults_applied_when_optional_vars_absent() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        env::set_var("AZURE_DEVOPS_ORG_URL", "https://dev.azure.com/acme");
        env::set_var("AZURE_DEVOPS_PROJECT", "Widgets");
        env::set_var("AZURE_DEVOPS_PAT", "secret");
        let config = RunConfig::from_env().unwrap();
        assert_eq!(config.concurrency, 5);
        assert_eq!(config.request_timeout_secs, 30);
        clear_env();
    }
}
