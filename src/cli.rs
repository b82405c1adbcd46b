//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};

/// Local-first chat-log analytics: import exports from LINE, QQ and WeChat
/// into a queryable SQLite corpus.
#[derive(Parser, Debug)]
#[command(name = "chatlens")]
#[command(version, about, long_about = None)]
#[command(after_help = "EXAMPLES:
    chatlens import line_export.txt
    chatlens sessions
    chatlens select 1
    chatlens activity --from 2025-01-01 --to 2025-06-30
    chatlens sql \"SELECT kind, COUNT(*) FROM message GROUP BY kind\"")]
pub struct Args {
    /// Path to the corpus database (default: CHATLENS_DB or ./chatlens.db)
    #[arg(long, global = true, value_name = "PATH")]
    pub db: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Import a chat export file
    Import {
        /// Path to the export file
        path: String,
        /// Timezone offset in seconds east of UTC for wall-clock stamps
        #[arg(long, value_name = "SECS", allow_hyphen_values = true)]
        tz_offset: Option<i32>,
        /// Messages per batch/transaction (capped at 1000)
        #[arg(long, value_name = "N")]
        batch_size: Option<usize>,
    },

    /// List imported corpora
    Sessions,

    /// Select the active corpus
    Select {
        /// Corpus id (see `sessions`)
        corpus: i64,
    },

    /// Delete a corpus and everything beneath it
    Delete {
        /// Corpus id
        corpus: i64,
    },

    /// Set or clear the corpus owner
    Owner {
        /// Corpus id
        corpus: i64,
        /// Member platform id; omit to clear
        platform_id: Option<String>,
    },

    /// Per-member activity ranking
    Activity(FilterArgs),

    /// Per-day top talkers
    Dragon(FilterArgs),

    /// Monologue streaks
    Streaks(FilterArgs),

    /// Repeat chains
    Repeats(FilterArgs),

    /// Catchphrases
    Phrases(FilterArgs),

    /// Conversation sessions
    Bursts(FilterArgs),

    /// Name history of one member
    Names {
        /// Member internal id
        member: i64,
        #[command(flatten)]
        filter: FilterArgs,
    },

    /// Show the corpus table schema
    Schema,

    /// Run a read-only SELECT against the store
    Sql {
        /// A single SELECT statement
        query: String,
    },

    /// List pending schema migrations
    Migrations,
}

/// Shared time-window flags.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct FilterArgs {
    /// Start of the window (YYYY-MM-DD, inclusive)
    #[arg(long, value_name = "DATE")]
    pub from: Option<String>,

    /// End of the window (YYYY-MM-DD, inclusive)
    #[arg(long, value_name = "DATE")]
    pub to: Option<String>,

    /// Corpus id; defaults to the selected corpus
    #[arg(long, value_name = "ID")]
    pub corpus: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_import() {
        let args = Args::parse_from(["chatlens", "import", "chat.txt", "--tz-offset", "-28800"]);
        match args.command {
            Command::Import { path, tz_offset, .. } => {
                assert_eq!(path, "chat.txt");
                assert_eq!(tz_offset, Some(-28800));
            }
            _ => panic!("expected import"),
        }
    }

    #[test]
    fn test_parse_activity_with_filter() {
        let args = Args::parse_from([
            "chatlens", "activity", "--from", "2025-01-01", "--corpus", "2",
        ]);
        match args.command {
            Command::Activity(filter) => {
                assert_eq!(filter.from.as_deref(), Some("2025-01-01"));
                assert_eq!(filter.corpus, Some(2));
            }
            _ => panic!("expected activity"),
        }
    }
}
