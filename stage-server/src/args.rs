//! Command-line arguments shared by the server binaries.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use shared::config_storage::ConfigStorage;
use shared::StageConfig;

/// Network and configuration options common to every stage server.
#[derive(Args, Debug, Clone)]
pub struct ServerArgs {
    #[arg(short = 'p', long, default_value = "8080")]
    pub port: u16,

    #[arg(short = 'b', long, default_value = "0.0.0.0")]
    pub bind_address: String,

    /// Stage configuration JSON. Falls back to ~/.stage_config/stage.json, then
    /// built-in defaults.
    #[arg(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Re-send the last frame to idle live-feed clients after this many
    /// milliseconds (0 disables)
    #[arg(long, default_value = "1000")]
    pub keepalive_ms: u64,
}

impl ServerArgs {
    pub fn keepalive(&self) -> Duration {
        Duration::from_millis(self.keepalive_ms)
    }

    /// Resolve the stage configuration for this run.
    pub fn load_config(&self) -> anyhow::Result<StageConfig> {
        ConfigStorage::default()
            .resolve(self.config.as_deref())
            .context("Failed to load stage config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser, Debug)]
    struct TestCli {
        #[command(flatten)]
        server: ServerArgs,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["stage"]);
        assert_eq!(cli.server.port, 8080);
        assert_eq!(cli.server.bind_address, "0.0.0.0");
        assert!(cli.server.config.is_none());
        assert_eq!(cli.server.keepalive(), Duration::from_secs(1));
    }

    #[test]
    fn test_overrides() {
        let cli = TestCli::parse_from([
            "stage",
            "-p",
            "9000",
            "--bind-address",
            "127.0.0.1",
            "--config",
            "/tmp/stage.json",
            "--keepalive-ms",
            "0",
        ]);
        assert_eq!(cli.server.port, 9000);
        assert_eq!(cli.server.bind_address, "127.0.0.1");
        assert_eq!(cli.server.config, Some(PathBuf::from("/tmp/stage.json")));
        assert!(cli.server.keepalive().is_zero());
    }

    #[test]
    fn test_missing_explicit_config_is_an_error() {
        let cli = TestCli::parse_from(["stage", "--config", "/nonexistent/stage.json"]);
        assert!(cli.server.load_config().is_err());
    }
}
