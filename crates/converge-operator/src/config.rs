//! Command line and environment configuration

use clap::{Parser, Subcommand, ValueEnum};

use converge_backup::ResticConfig;
use converge_common::telemetry::{LogFormat, TelemetryConfig};

/// Default number of objects each controller reconciles at once
pub const DEFAULT_CONCURRENCY: u16 = 4;

/// Default image for backup, image and restore jobs
pub const DEFAULT_RESTIC_IMAGE: &str = "restic/restic:0.17.3";

/// Default Secret with the repository location and credentials
pub const DEFAULT_RESTIC_SECRET: &str = "converge-restic";

/// Converge - declarative backup, restore and data sync controllers
#[derive(Parser, Debug)]
#[command(name = "converge", version, about, long_about = None)]
pub struct Cli {
    /// Print CRD manifests and exit
    #[arg(long)]
    pub crd: bool,

    /// Log output format
    #[arg(long, env = "CONVERGE_LOG_FORMAT", value_enum, default_value_t = LogOutput::Json, global = true)]
    pub log_format: LogOutput,

    /// OTLP gRPC endpoint for spans and metrics
    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT", global = true)]
    pub otlp_endpoint: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Operator modes
#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Commands {
    /// Run the controllers (default mode)
    Controller(ControllerArgs),
    /// Apply the CRDs with server-side apply and exit
    InstallCrds,
}

/// Settings for controller mode
#[derive(clap::Args, Debug, Clone, PartialEq)]
pub struct ControllerArgs {
    /// Watch a single namespace instead of the whole cluster
    #[arg(long, env = "CONVERGE_NAMESPACE")]
    pub namespace: Option<String>,

    /// Objects reconciled concurrently per controller (0 means unbounded)
    #[arg(long, env = "CONVERGE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: u16,

    /// Image that runs backup, image and restore jobs
    #[arg(long, env = "CONVERGE_RESTIC_IMAGE", default_value = DEFAULT_RESTIC_IMAGE)]
    pub restic_image: String,

    /// Secret holding the repository location and credentials for jobs
    #[arg(long, env = "CONVERGE_RESTIC_SECRET", default_value = DEFAULT_RESTIC_SECRET)]
    pub restic_secret: String,

    /// Skip applying CRDs on startup
    #[arg(long, env = "CONVERGE_SKIP_CRD_INSTALL")]
    pub skip_crd_install: bool,
}

impl Default for ControllerArgs {
    fn default() -> Self {
        Self {
            namespace: None,
            concurrency: DEFAULT_CONCURRENCY,
            restic_image: DEFAULT_RESTIC_IMAGE.to_string(),
            restic_secret: DEFAULT_RESTIC_SECRET.to_string(),
            skip_crd_install: false,
        }
    }
}

impl ControllerArgs {
    /// Job payload settings
    pub fn restic(&self) -> ResticConfig {
        ResticConfig {
            image: self.restic_image.clone(),
            secret: self.restic_secret.clone(),
        }
    }
}

/// Log format as accepted on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    /// JSON lines
    Json,
    /// Human-readable text
    Text,
}

impl From<LogOutput> for LogFormat {
    fn from(value: LogOutput) -> Self {
        match value {
            LogOutput::Json => LogFormat::Json,
            LogOutput::Text => LogFormat::Text,
        }
    }
}

impl Cli {
    /// Telemetry settings derived from the flags
    pub fn telemetry(&self) -> TelemetryConfig {
        TelemetryConfig {
            service_name: "converge".to_string(),
            otlp_endpoint: self.otlp_endpoint.clone(),
            log_format: self.log_format.into(),
        }
    }

    /// The requested mode, defaulting to controller mode
    pub fn command(&self) -> Commands {
        self.command
            .clone()
            .unwrap_or_else(|| Commands::Controller(ControllerArgs::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_runs_controllers_with_defaults() {
        let cli = Cli::try_parse_from(["converge"]).unwrap();
        assert!(!cli.crd);
        let Commands::Controller(args) = cli.command() else {
            panic!("expected controller mode");
        };
        assert_eq!(args.concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(args.namespace, None);
        assert_eq!(args.restic().secret, DEFAULT_RESTIC_SECRET);
    }

    #[test]
    fn controller_flags_are_parsed() {
        let cli = Cli::try_parse_from([
            "converge",
            "--log-format",
            "text",
            "controller",
            "--namespace",
            "apps",
            "--concurrency",
            "1",
            "--restic-image",
            "registry.local/restic:1",
        ])
        .unwrap();
        assert_eq!(cli.telemetry().log_format, LogFormat::Text);
        let Commands::Controller(args) = cli.command() else {
            panic!("expected controller mode");
        };
        assert_eq!(args.namespace.as_deref(), Some("apps"));
        assert_eq!(args.concurrency, 1);
        assert_eq!(args.restic().image, "registry.local/restic:1");
    }

    #[test]
    fn install_crds_subcommand() {
        let cli = Cli::try_parse_from(["converge", "install-crds"]).unwrap();
        assert_eq!(cli.command(), Commands::InstallCrds);
    }

    #[test]
    fn unknown_log_format_is_rejected() {
        assert!(Cli::try_parse_from(["converge", "--log-format", "xml"]).is_err());
    }
}
