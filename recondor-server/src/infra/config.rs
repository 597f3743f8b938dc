//! Runtime configuration. Environment variables carry the connection and
//! listen settings; orchestrator tuning optionally comes from a JSON file or
//! an inline JSON blob, CLI flags override both.

use std::path::PathBuf;

use anyhow::Context;
use recondor_core::orchestration::OrchestratorConfig;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub orchestrator: OrchestratorConfig,
}

/// Non-fatal findings surfaced while loading configuration.
#[derive(Debug, Default)]
pub struct ConfigWarnings {
    pub items: Vec<String>,
}

impl ServerConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolve orchestrator tuning from `ORCHESTRATOR_CONFIG_PATH` or the inline
/// `ORCHESTRATOR_CONFIG_JSON`. The file wins when both are set.
pub fn load_orchestrator_config() -> anyhow::Result<(OrchestratorConfig, ConfigWarnings)> {
    let mut warnings = ConfigWarnings::default();

    if let Ok(path) = std::env::var("ORCHESTRATOR_CONFIG_PATH") {
        let path = PathBuf::from(path);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read orchestrator config {}", path.display()))?;
        let config: OrchestratorConfig = serde_json::from_str(&raw)
            .with_context(|| format!("malformed orchestrator config {}", path.display()))?;
        if std::env::var("ORCHESTRATOR_CONFIG_JSON").is_ok() {
            warnings.items.push(
                "both ORCHESTRATOR_CONFIG_PATH and ORCHESTRATOR_CONFIG_JSON set; using the file"
                    .into(),
            );
        }
        return Ok((validated(config, &mut warnings), warnings));
    }

    if let Ok(raw) = std::env::var("ORCHESTRATOR_CONFIG_JSON") {
        let config: OrchestratorConfig =
            serde_json::from_str(&raw).context("malformed ORCHESTRATOR_CONFIG_JSON")?;
        return Ok((validated(config, &mut warnings), warnings));
    }

    Ok((OrchestratorConfig::default(), warnings))
}

fn validated(mut config: OrchestratorConfig, warnings: &mut ConfigWarnings) -> OrchestratorConfig {
    if config.workers == 0 {
        warnings.items.push("workers=0 corrected to 1".into());
        config.workers = 1;
    }
    if config.retry.max_attempts == 0 {
        warnings.items.push("retry.max_attempts=0 corrected to 1".into());
        config.retry.max_attempts = 1;
    }
    if config.lease.lease_ttl_secs == 0 {
        warnings
            .items
            .push("lease.lease_ttl_secs=0 corrected to 30".into());
        config.lease.lease_ttl_secs = 30;
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_values_are_corrected_with_warnings() {
        let mut config = OrchestratorConfig::default();
        config.workers = 0;
        config.retry.max_attempts = 0;

        let mut warnings = ConfigWarnings::default();
        let fixed = validated(config, &mut warnings);
        assert_eq!(fixed.workers, 1);
        assert_eq!(fixed.retry.max_attempts, 1);
        assert_eq!(warnings.items.len(), 2);
    }

    #[test]
    fn orchestrator_config_parses_partial_json() {
        // serde(default) fills everything the blob leaves out
        let raw = r#"{"workers": 8, "poll_interval_ms": 50}"#;
        let parsed: OrchestratorConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.workers, 8);
        assert_eq!(parsed.poll_interval_ms, 50);
        assert_eq!(parsed.retry.max_attempts, 5);
    }
}
