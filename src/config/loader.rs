//! Configuration loading from disk and the environment.

use std::fs;
use std::path::Path;

use crate::config::schema::AppConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {var}: '{value}'")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join(.0))]
    Validation(Vec<ValidationError>),
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load configuration from an optional TOML file, apply environment
/// overrides, then validate.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut config = match path {
        Some(path) => {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        }
        None => AppConfig::default(),
    };

    apply_env_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Overlay environment variables on `config`.
///
/// `lookup` resolves a variable name; empty values are ignored.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());

    if let Some(port) = get("PORT") {
        let port: u16 = port
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { var: "PORT", value: port.clone() })?;
        let host = config
            .listener
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        config.listener.bind_address = format!("{host}:{port}");
    }

    if let Some(level) = get("LOG_LEVEL") {
        config.telemetry.log_level = level;
    }
    if let Some(format) = get("LOG_FORMAT") {
        config.telemetry.log_format = format
            .parse()
            .map_err(|_| ConfigError::Env { var: "LOG_FORMAT", value: format.clone() })?;
    }
    if let Some(env) = get("APP_ENV").or_else(|| get("NODE_ENV")) {
        config.telemetry.environment = env;
    }
    if let Some(name) = get("SERVICE_NAME") {
        config.telemetry.service_name = name;
    }
    if let Some(version) = get("SERVICE_VERSION") {
        config.telemetry.service_version = version;
    }
    if let Some(endpoint) = get("OTLP_ENDPOINT") {
        // Metrics follow the collector unless pointed elsewhere or disabled.
        let following = otlp_metrics_url(&config.telemetry.otlp_endpoint);
        if config.telemetry.metrics_endpoint.as_deref() == Some(following.as_str()) {
            config.telemetry.metrics_endpoint = Some(otlp_metrics_url(&endpoint));
        }
        config.telemetry.otlp_endpoint = endpoint;
    }
    if let Some(endpoint) = get("METRICS_ENDPOINT") {
        config.telemetry.metrics_endpoint = match endpoint.as_str() {
            "off" | "none" => None,
            _ => Some(endpoint),
        };
    }
    if let Some(secs) = get("METRICS_INTERVAL_SECS") {
        config.telemetry.metrics_interval_secs = secs.trim().parse().map_err(|_| {
            ConfigError::Env { var: "METRICS_INTERVAL_SECS", value: secs.clone() }
        })?;
    }

    Ok(())
}

fn otlp_metrics_url(collector: &str) -> String {
    format!("{}/v1/metrics", collector.trim_end_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LogFormat;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("PORT", "8081"),
                ("LOG_LEVEL", "debug"),
                ("LOG_FORMAT", "json"),
                ("NODE_ENV", "production"),
                ("OTLP_ENDPOINT", "http://jaeger:4318"),
                ("METRICS_INTERVAL_SECS", "5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.listener.bind_address, "0.0.0.0:8081");
        assert_eq!(config.telemetry.log_level, "debug");
        assert_eq!(config.telemetry.log_format, LogFormat::Json);
        assert!(config.telemetry.is_production());
        assert_eq!(config.telemetry.otlp_endpoint, "http://jaeger:4318");
        assert_eq!(
            config.telemetry.metrics_endpoint.as_deref(),
            Some("http://jaeger:4318/v1/metrics")
        );
        assert_eq!(config.telemetry.metrics_interval_secs, 5);
    }

    #[test]
    fn test_explicit_metrics_endpoint_wins_over_collector() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("OTLP_ENDPOINT", "http://jaeger:4318/"),
                ("METRICS_ENDPOINT", "http://metrics:4318/v1/metrics"),
            ]),
        )
        .unwrap();
        assert_eq!(config.telemetry.otlp_endpoint, "http://jaeger:4318/");
        assert_eq!(
            config.telemetry.metrics_endpoint.as_deref(),
            Some("http://metrics:4318/v1/metrics")
        );
    }

    #[test]
    fn test_app_env_wins_over_node_env() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            env(&[("APP_ENV", "staging"), ("NODE_ENV", "production")]),
        )
        .unwrap();
        assert_eq!(config.telemetry.environment, "staging");
    }

    #[test]
    fn test_metrics_endpoint_can_be_disabled() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, env(&[("METRICS_ENDPOINT", "off")])).unwrap();
        assert!(config.telemetry.metrics_endpoint.is_none());
    }

    #[test]
    fn test_bad_port_is_rejected() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, env(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Env { var: "PORT", .. }));
    }

    #[test]
    fn test_empty_values_are_ignored() {
        let mut config = AppConfig::default();
        apply_env_overrides(&mut config, env(&[("PORT", ""), ("LOG_LEVEL", "  ")])).unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:3000");
        assert_eq!(config.telemetry.log_level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[listener]\nbind_address = \"127.0.0.1:4000\"\n\n[items]\nsimulate_latency = false"
        )
        .unwrap();

        let config: AppConfig =
            toml::from_str(&fs::read_to_string(file.path()).unwrap()).unwrap();
        assert_eq!(config.listener.bind_address, "127.0.0.1:4000");
        assert!(!config.items.simulate_latency);
    }

    #[test]
    fn test_invalid_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[listener\nbind_address = 1").unwrap();
        let err = load_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = load_config(Some(Path::new("/nonexistent/items.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
