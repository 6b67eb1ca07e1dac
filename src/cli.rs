//! CLI surface (external collaborator; the core consumes it only as a
//! struct per spec.md §6).

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(name = "flow-metrics", version, about = "Flow metrics for Azure DevOps work items")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest work items only, writing `work_items.json`.
    Fetch {
        #[arg(long, default_value_t = 90)]
        days_back: i64,
        #[arg(long)]
        history_limit: Option<u32>,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Run the calculator over a previously cached ingestion.
    Calculate {
        #[arg(long)]
        from: Option<String>,
        #[arg(long)]
        to: Option<String>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },
    /// Ingest, then calculate in one run.
    Sync {
        #[arg(long, default_value_t = 90)]
        days_back: i64,
        #[arg(long)]
        history_limit: Option<u32>,
        #[arg(long, default_value_t = false)]
        progress: bool,
    },
    /// Start the HTTP read API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Ingest from synthetic fixture data instead of Azure DevOps.
    Demo {
        #[arg(long, default_value_t = 50)]
        count: usize,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    Csv,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn fetch_defaults_match_spec() {
        let cli = Cli::parse_from(["flow-metrics", "fetch"]);
        match cli.command {
            Command::Fetch { days_back, history_limit, progress } => {
                assert_eq!(days_back, 90);
                assert_eq!(history_limit, None);
                assert!(!progress);
            }
            _ => panic!("expected Fetch"),
        }
    }

    #[test]
    fn serve_defaults_to_localhost_8080() {
        let cli = Cli::parse_from(["flow-metrics", "serve"]);
        match cli.command {
            Command::Serve { host, port } => {
                assert_eq!(host, "127.0.0.1");
                assert_eq!(port, 8080);
            }
            _ => panic!("expected Serve"),
        }
    }
}
