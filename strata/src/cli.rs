//! CLI argument definitions using clap derive macros.
//!
//! Every command opens the local database, runs against the durable tier
//! (or the coordinator and assembler built over it), and flushes on exit.

use clap::{Args, Parser, Subcommand};

/// Strata tiered memory CLI
///
/// Store, search and version memory entries in a local SQLite database.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Store a memory entry
    Store(StoreArgs),

    /// Show one entry by id
    Get {
        /// Entry ID
        id: String,

        /// Also show soft-deleted entries
        #[arg(long)]
        include_deleted: bool,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Full-text search over stored entries
    Search(SearchArgs),

    /// Change fields of an entry, recording a new version
    Update(UpdateArgs),

    /// Restore the content an entry had at an earlier version
    Rollback {
        /// Entry ID
        id: String,

        /// Version to restore
        #[arg(id = "target_version", value_name = "VERSION")]
        version: u64,

        /// Who is rolling back
        #[arg(short, long, default_value = "cli")]
        author: String,
    },

    /// Show the version history of an entry
    History {
        /// Entry ID
        id: String,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete an entry (soft by default)
    Delete {
        /// Entry ID
        id: String,

        /// Remove the entry and its history for good
        #[arg(long)]
        hard: bool,
    },

    /// Assemble a context bundle for a purpose
    Context(ContextArgs),

    /// Check the health of every tier
    Health {
        /// Probe each tier instead of only reading its size
        #[arg(long)]
        deep: bool,

        /// Include coordinator metrics
        #[arg(short, long)]
        metrics: bool,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Print the effective configuration
    Config {
        /// Only print where the configuration is read from
        #[arg(long)]
        path: bool,
    },

    /// Show version
    Version,
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct StoreArgs {
    /// Content to store (plain text, or JSON with --json-content)
    pub content: String,

    /// Entry type: profile, code_pattern, interaction, knowledge, optimization, configuration
    #[arg(short = 't', long = "type", default_value = "knowledge")]
    pub entry_type: String,

    /// Owner of the entry
    #[arg(short, long, env = "STRATA_OWNER", default_value = "local")]
    pub owner: String,

    /// Explicit ID (a UUID is generated otherwise)
    #[arg(long)]
    pub id: Option<String>,

    /// Session the entry belongs to
    #[arg(long)]
    pub session: Option<String>,

    /// Tags for categorization
    #[arg(short = 'T', long = "tag", action = clap::ArgAction::Append)]
    pub tags: Vec<String>,

    /// Metadata as key=value (value parsed as JSON when possible)
    #[arg(short, long = "meta", action = clap::ArgAction::Append)]
    pub metadata: Vec<String>,

    /// Time-to-live in seconds
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Parse content as JSON instead of text
    #[arg(long)]
    pub json_content: bool,
}

#[derive(Args, Debug)]
pub struct SearchArgs {
    /// Search text
    pub query: String,

    /// Restrict to one owner
    #[arg(short, long, env = "STRATA_OWNER")]
    pub owner: Option<String>,

    /// Restrict to one entry type
    #[arg(short = 't', long = "type")]
    pub entry_type: Option<String>,

    /// Maximum results
    #[arg(short, long, default_value = "20")]
    pub limit: usize,

    /// Results to skip
    #[arg(long, default_value = "0")]
    pub offset: usize,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct UpdateArgs {
    /// Entry ID
    pub id: String,

    /// Field change as field=value; `field=` clears it
    #[arg(short, long = "set", action = clap::ArgAction::Append, required = true)]
    pub changes: Vec<String>,

    /// Why the entry changed
    #[arg(short, long, default_value = "updated from cli")]
    pub reason: String,

    /// Who changed it
    #[arg(short, long, default_value = "cli")]
    pub author: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// Context Commands
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Args, Debug)]
pub struct ContextArgs {
    /// What the context is for
    pub purpose: String,

    /// Text the entries should be relevant to
    #[arg(short, long)]
    pub query: Option<String>,

    /// Restrict to one owner
    #[arg(short, long, env = "STRATA_OWNER")]
    pub owner: Option<String>,

    /// Token budget
    #[arg(long)]
    pub max_tokens: Option<usize>,

    /// Source that must contribute (repeatable)
    #[arg(long = "require", action = clap::ArgAction::Append)]
    pub required_sources: Vec<String>,

    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_store_and_delete_arguments() {
        let cli = Cli::parse_from([
            "strata", "store", "prefers tabs", "-t", "profile", "-o", "alice", "-T", "style", "-m", "lang=rust",
        ]);
        let Commands::Store(args) = cli.command else {
            panic!("expected store");
        };
        assert_eq!(args.entry_type, "profile");
        assert_eq!(args.owner, "alice");
        assert_eq!(args.tags, vec!["style"]);
        assert_eq!(args.metadata, vec!["lang=rust"]);

        let cli = Cli::parse_from(["strata", "delete", "m1", "--hard"]);
        assert!(matches!(cli.command, Commands::Delete { hard: true, .. }));
    }

    #[test]
    fn test_update_requires_a_change() {
        assert!(Cli::try_parse_from(["strata", "update", "m1"]).is_err());
    }
}
