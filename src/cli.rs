use std::path::PathBuf;

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;

#[derive(Debug, Parser)]
#[command(
    name = "manualrag",
    version,
    about = "Retrieve cited passages from enterprise manuals to ground answers"
)]
pub struct Cli {
    /// Override the XDG data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override a setting for this run (repeatable), e.g. --set top_k=30
    #[arg(long = "set", value_name = "KEY=VALUE", value_parser = parse_key_value, global = true)]
    pub overrides: Vec<(String, String)>,

    /// Increase log verbosity (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Command,
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("missing key in '{raw}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reset the index and ingest every manual (full rebuild)
    Rebuild(IngestArgs),
    /// Ingest new and changed manuals, drop deleted ones (incremental)
    Sync(IngestArgs),
    /// Print the ranked passages retrieved for a question
    Retrieve(RetrieveArgs),
    /// Print the grounding request the answer backend would receive
    Ask(AskArgs),
    /// Show indexed manuals and configuration
    Status(StatusArgs),
    /// Delete the vector index and document registry
    Reset,
    /// Manage stored settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Start MCP server for AI agent integration
    Mcp,
    /// Generate shell completions
    #[command(hide = true)]
    Completions(CompletionsArgs),
}

// -- Config subcommands --

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show every setting with its effective value
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Persist a setting in config.redb
    Set {
        /// Setting name, e.g. top_k or keywords.claims
        key: String,
        value: String,
    },
    /// Remove a stored setting (revert to default)
    Unset { key: String },
}

// -- Ingestion --

#[derive(Debug, Parser)]
pub struct IngestArgs {
    /// Manuals directory (defaults to the configured manuals_dir)
    #[arg(short, long)]
    pub manuals: Option<PathBuf>,

    /// Hide the embedding progress bar
    #[arg(long)]
    pub no_progress: bool,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Retrieval --

#[derive(Debug, Parser)]
pub struct RetrieveArgs {
    /// The question
    pub query: String,

    /// Maximum number of passages (capped by rerank_top_k)
    #[arg(short = 'n', long)]
    pub limit: Option<usize>,

    /// Output the query context as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Parser)]
pub struct AskArgs {
    /// The question
    pub query: String,

    /// Use the short system instruction
    #[arg(long)]
    pub concise: bool,

    /// Output the grounding request as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Status --

#[derive(Debug, Parser)]
pub struct StatusArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

// -- Completions --

#[derive(Debug, Parser)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

impl CompletionsArgs {
    /// Generate shell completions and print to stdout.
    pub fn generate(&self) {
        let mut cmd = Cli::command();
        clap_complete::generate(
            self.shell,
            &mut cmd,
            "manualrag",
            &mut std::io::stdout(),
        );
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_retrieve_defaults() {
        let cli = Cli::parse_from(["manualrag", "retrieve", "how do I submit a claim"]);
        match cli.command {
            Command::Retrieve(args) => {
                assert_eq!(args.query, "how do I submit a claim");
                assert_eq!(args.limit, None);
                assert!(!args.json);
            }
            _ => panic!("expected retrieve command"),
        }
        assert!(cli.overrides.is_empty());
        assert_eq!(cli.verbose, 0);
    }

    #[test]
    fn parse_overrides() {
        let cli = Cli::parse_from([
            "manualrag",
            "ask",
            "print statements",
            "--set",
            "top_k=30",
            "--set",
            "keywords.claims=edi,837",
        ]);
        assert_eq!(
            cli.overrides,
            vec![
                ("top_k".to_string(), "30".to_string()),
                ("keywords.claims".to_string(), "edi,837".to_string()),
            ]
        );
    }

    #[test]
    fn malformed_override_is_rejected() {
        assert!(Cli::try_parse_from(["manualrag", "status", "--set", "top_k"]).is_err());
        assert!(Cli::try_parse_from(["manualrag", "status", "--set", "=5"]).is_err());
    }

    #[test]
    fn parse_sync_with_manuals_dir() {
        let cli = Cli::parse_from(["manualrag", "sync", "--manuals", "/srv/manuals"]);
        match cli.command {
            Command::Sync(args) => {
                assert_eq!(args.manuals, Some(PathBuf::from("/srv/manuals")));
                assert!(!args.no_progress);
            }
            _ => panic!("expected sync command"),
        }
    }
}
