use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "master_config/matchd.yaml";

#[derive(Parser, Debug)]
#[command(name = "matchd")]
#[command(about = "matchd - score-based player matchmaking service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the matchmaking service
    Start {
        /// Path to the configuration file
        #[arg(short, long, env = "MATCHD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override HTTP port (0 disables the HTTP API)
        #[arg(long)]
        http: Option<u16>,

        /// Override WebSocket port
        #[arg(long)]
        ws: Option<u16>,

        /// Override the messaging backend
        #[arg(long, value_enum)]
        messaging: Option<MessagingBackend>,
    },

    /// Validate configuration without starting the service
    Validate {
        /// Path to the configuration file
        #[arg(short, long, env = "MATCHD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Write a configuration file with all defaults
    Init {
        /// Output path for the new configuration file
        #[arg(short, long, default_value = "matchd.yaml")]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessagingBackend {
    /// In-process broadcast
    Memory,

    /// Redis Streams with consumer groups
    RedisStream,

    /// Redis Pub/Sub
    RedisPubsub,
}

impl MessagingBackend {
    /// Name used in the `messaging.type` setting
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingBackend::Memory => "memory",
            MessagingBackend::RedisStream => "redis_stream",
            MessagingBackend::RedisPubsub => "redis_pubsub",
        }
    }
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_defaults() {
        let cli = Cli::try_parse_from(["matchd", "start"]).unwrap();
        match cli.command {
            Commands::Start {
                config,
                http,
                ws,
                messaging,
            } => {
                if std::env::var_os("MATCHD_CONFIG").is_none() {
                    assert_eq!(config, PathBuf::from(DEFAULT_CONFIG_PATH));
                }
                assert_eq!(http, None);
                assert_eq!(ws, None);
                assert_eq!(messaging, None);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_start_overrides() {
        let cli = Cli::try_parse_from([
            "matchd",
            "start",
            "--config",
            "/etc/matchd.yaml",
            "--ws",
            "9000",
            "--messaging",
            "redis-stream",
        ])
        .unwrap();

        match cli.command {
            Commands::Start {
                config,
                ws,
                messaging,
                ..
            } => {
                assert_eq!(config, PathBuf::from("/etc/matchd.yaml"));
                assert_eq!(ws, Some(9000));
                assert_eq!(messaging.map(|m| m.as_str()), Some("redis_stream"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_backend_rejected() {
        assert!(Cli::try_parse_from(["matchd", "start", "--messaging", "kafka"]).is_err());
    }

    #[test]
    fn test_init_output() {
        let cli = Cli::try_parse_from(["matchd", "init", "-o", "out.yaml"]).unwrap();
        assert!(matches!(cli.command, Commands::Init { output } if output == PathBuf::from("out.yaml")));
    }
}
