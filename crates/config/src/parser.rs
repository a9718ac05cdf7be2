use crate::*;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info, instrument};

#[instrument(skip(path))]
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<MatchdConfig> {
    let path = path.as_ref();
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    debug!("Config file content length: {} bytes", content.len());

    let config = parse_config(&content)?;
    info!("Configuration loaded successfully");
    Ok(config)
}

/// Substitute environment variables, then parse YAML
pub fn parse_config(content: &str) -> Result<MatchdConfig> {
    let substituted = substitution::substitute_env_vars(content)?;
    debug!("Environment variable substitution completed");

    serde_yaml::from_str(&substituted).with_context(|| "Failed to parse YAML configuration")
}

#[instrument]
pub fn generate_default_config() -> MatchdConfig {
    MatchdConfig {
        messaging: MessagingConfig {
            redis: Some(RedisConfig::default()),
            ..MessagingConfig::default()
        },
        ..MatchdConfig::default()
    }
}

#[instrument]
pub fn save_config<P: AsRef<Path> + std::fmt::Debug>(config: &MatchdConfig, path: P) -> Result<()> {
    let path = path.as_ref();
    info!("Saving configuration to: {:?}", path);

    let yaml = serde_yaml::to_string(config)
        .with_context(|| "Failed to serialize configuration to YAML")?;

    fs::write(path, yaml)
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    info!("Configuration saved successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_config_round_trips() {
        let generated = generate_default_config();
        let yaml = serde_yaml::to_string(&generated).unwrap();
        let parsed = parse_config(&yaml).unwrap();

        assert_eq!(parsed.matching.bucket_size, generated.matching.bucket_size);
        assert!(parsed.messaging.redis.is_some());
        assert!(validate_config(&parsed).is_valid());
    }

    #[test]
    fn test_parse_substitutes_env() {
        std::env::set_var("MATCHD_TEST_WS_PORT", "9999");
        let cfg = parse_config("server:\n  ws_port: ${MATCHD_TEST_WS_PORT}\n").unwrap();
        assert_eq!(cfg.server.ws_port, 9999);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("matchd-{}.yaml", std::process::id()));
        save_config(&generate_default_config(), &path).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.service.name, "matchd");

        let _ = fs::remove_file(&path);
    }

    #[test]
    fn test_load_missing_file() {
        assert!(load_config("/nonexistent/matchd.yaml").is_err());
    }
}
