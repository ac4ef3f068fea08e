use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Gitlink server - GitLab installation pipeline
#[derive(Parser, Debug)]
#[command(name = "gitlinkd")]
#[command(version = gitlink_core::VERSION)]
#[command(about = "Gitlink GitLab installation daemon", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run server in foreground (default if no command given)
    Run {
        /// Address to listen on (overrides GITLINK_BIND)
        #[arg(long)]
        bind: Option<String>,

        /// Environment file to load before reading configuration
        #[arg(long)]
        env_file: Option<PathBuf>,
    },

    /// Apply database migrations and exit
    Migrate {
        /// Environment file to load before reading configuration
        #[arg(long)]
        env_file: Option<PathBuf>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run {
            bind: None,
            env_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::parse_from(["gitlinkd"]);
        assert!(matches!(
            cli.command.unwrap_or_default(),
            Commands::Run { bind: None, env_file: None }
        ));
    }

    #[test]
    fn test_run_with_flags() {
        let cli = Cli::parse_from(["gitlinkd", "run", "--bind", "127.0.0.1:9000", "--env-file", "/etc/gitlink.env"]);
        match cli.command {
            Some(Commands::Run { bind, env_file }) => {
                assert_eq!(bind.as_deref(), Some("127.0.0.1:9000"));
                assert_eq!(env_file, Some(PathBuf::from("/etc/gitlink.env")));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_migrate() {
        let cli = Cli::parse_from(["gitlinkd", "migrate"]);
        assert!(matches!(cli.command, Some(Commands::Migrate { env_file: None })));
    }
}
