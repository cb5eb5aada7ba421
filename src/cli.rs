// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `thoth`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "thoth",
    version,
    about = "Run metadata pipelines over a tree of files and their .thoth.yaml sidecars.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML, JSON or YAML).
    ///
    /// Default: `thoth.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = "thoth.toml")]
    pub config: String,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `THOTH_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Load and validate the config, print the stage plan, run nothing.
    #[arg(long)]
    pub dry_run: bool,

    /// Override `output.out` (`-` for stdout).
    #[arg(long, value_name = "PATH")]
    pub out: Option<String>,

    /// Override `workers`.
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let args = CliArgs::try_parse_from(["thoth"]).unwrap();
        assert_eq!(args.config, "thoth.toml");
        assert!(!args.dry_run);
        assert!(args.out.is_none());

        let args = CliArgs::try_parse_from([
            "thoth", "--config", "x.yaml", "--dry-run", "--out", "o.json", "--workers", "3",
            "--log-level", "debug",
        ])
        .unwrap();
        assert_eq!(args.config, "x.yaml");
        assert!(args.dry_run);
        assert_eq!(args.out.as_deref(), Some("o.json"));
        assert_eq!(args.workers, Some(3));
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
