//! Command-line configuration

use std::time::Duration;

use clap::{Parser, Subcommand};

use es_common::telemetry::LogFormat;

/// Elasticsearch operator - drives Elasticsearch clusters toward their declared state
#[derive(Parser, Debug)]
#[command(name = "es-operator", version, about, long_about = None)]
pub struct Cli {
    /// Only watch Elasticsearch resources in this namespace
    #[arg(long, env = "WATCH_NAMESPACE", global = true)]
    pub watch_namespace: Option<String>,

    /// Log line format: json or text
    #[arg(long, env = "LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Seconds between passes once a cluster has converged
    #[arg(long, env = "REQUEUE_SECS", default_value_t = 60, global = true)]
    pub requeue_secs: u64,

    /// Seconds before retrying a pass that failed with a retryable error
    #[arg(long, env = "ERROR_REQUEUE_SECS", default_value_t = 30, global = true)]
    pub error_requeue_secs: u64,

    /// Install or update the Elasticsearch CRD before starting the controller
    #[arg(long, env = "INSTALL_CRD", global = true)]
    pub install_crd: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Operator subcommands
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Print the Elasticsearch CRD as YAML and exit
    Crd,
    /// Run the controller (default)
    Controller,
}

impl Cli {
    /// Subcommand to run, defaulting to the controller
    pub fn command(&self) -> Commands {
        self.command.unwrap_or(Commands::Controller)
    }

    /// Requeue delay for converged clusters
    pub fn requeue_after(&self) -> Duration {
        Duration::from_secs(self.requeue_secs)
    }

    /// Requeue delay after retryable errors
    pub fn error_requeue_after(&self) -> Duration {
        Duration::from_secs(self.error_requeue_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_controller() {
        let cli = Cli::try_parse_from(["es-operator"]).unwrap();
        assert_eq!(cli.command(), Commands::Controller);
        assert_eq!(cli.requeue_after(), Duration::from_secs(60));
        assert_eq!(cli.error_requeue_after(), Duration::from_secs(30));
        assert_eq!(cli.log_format, LogFormat::Text);
        assert!(!cli.install_crd);
    }

    #[test]
    fn parses_flags_and_subcommand() {
        let cli = Cli::try_parse_from([
            "es-operator",
            "--watch-namespace",
            "logging",
            "--log-format",
            "json",
            "--requeue-secs",
            "120",
            "crd",
        ])
        .unwrap();
        assert_eq!(cli.command(), Commands::Crd);
        assert_eq!(cli.watch_namespace.as_deref(), Some("logging"));
        assert_eq!(cli.log_format, LogFormat::Json);
        assert_eq!(cli.requeue_secs, 120);
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["es-operator", "--log-format", "yaml"]).is_err());
    }
}
