use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "fincore")]
#[command(author, version, about = "Financial operations core: orders, commissions, settlements", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Directory holding default.toml and environment overrides
    #[arg(short, long, default_value = "config", env = "FINCORE_CONFIG_DIR")]
    pub config_dir: PathBuf,

    /// Emit JSON logs on the console
    #[arg(long)]
    pub json_logs: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the configuration and print the effective settings
    CheckConfig,
    /// Run one pending-commission settlement batch
    Settle,
    /// Export settlements as CSV
    Export {
        /// Only this user's settlements
        #[arg(short, long)]
        user: Option<String>,
        /// Created at or after (RFC 3339)
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Created at or before (RFC 3339)
        #[arg(long)]
        to: Option<DateTime<Utc>>,
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run the order retry worker and settlement loop until Ctrl-C
    Run,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_export() {
        let cli = Cli::try_parse_from([
            "fincore",
            "export",
            "--user",
            "u1",
            "--from",
            "2024-06-01T00:00:00Z",
        ])
        .unwrap();

        match cli.command {
            Commands::Export { user, from, to, output } => {
                assert_eq!(user.as_deref(), Some("u1"));
                assert!(from.is_some());
                assert!(to.is_none());
                assert!(output.is_none());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert_eq!(cli.config_dir, PathBuf::from("config"));
    }

    #[test]
    fn test_parse_rejects_bad_timestamp() {
        assert!(Cli::try_parse_from(["fincore", "export", "--from", "yesterday"]).is_err());
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["fincore"]).is_err());
        assert!(matches!(
            Cli::try_parse_from(["fincore", "check-config"]).unwrap().command,
            Commands::CheckConfig
        ));
    }
}
