//! CLI argument structs for all subcommands.

use clap::{Parser, Subcommand};

#[derive(Subcommand, Debug)]
pub enum ServerCommand {
    /// Show whether the daemon is running
    Status,

    /// Start the daemon in the background
    Start,

    /// Ask the daemon to stop
    Stop,

    /// Ask the daemon to restart itself
    Restart,

    /// Run the daemon in this process
    Run(RunArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Detach and run in the background
    #[arg(short, long)]
    pub daemon: bool,

    /// Log level (error, warn, info, debug, trace). RUST_LOG overrides it.
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum WorkspaceCommand {
    /// List registered workspaces
    List,

    /// Show one workspace
    Get {
        /// Workspace directory (default: current directory)
        path: Option<String>,
    },

    /// Register a directory and index it
    Create {
        /// Workspace directory (default: current directory)
        path: Option<String>,
    },

    /// Unregister a workspace and drop its index
    Delete {
        /// Workspace directory (default: current directory)
        path: Option<String>,
    },

    /// Re-scan one workspace in the background
    Sync {
        /// Workspace directory (default: current directory)
        path: Option<String>,
    },

    /// Re-scan every workspace in the background
    SyncAll,
}

#[derive(Parser, Debug)]
#[command(after_long_help = r#"QUERY SYNTAX:
  Terms separated by spaces (or AND) must all appear on the line, in order.
  '|' separates alternatives: "open file | read file".
  '*' matches up to 32 non-space characters, '?' one optional character.
  A term starts with at least two letters, digits, '_' or '-'.

EXAMPLES:
  haystack search "spawn thread"
  haystack search "parse* | decode*" --include "*.rs" -C 3
  haystack search Config --path src/server --case-sensitive
"#)]
pub struct SearchArgs {
    /// Query
    pub query: String,

    /// Workspace directory (default: client.default_workspace, then the current directory)
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// Match case exactly
    #[arg(short = 's', long)]
    pub case_sensitive: bool,

    /// Only files under this path, relative to the workspace
    #[arg(long)]
    pub path: Option<String>,

    /// Only files matching these globs (comma-separated)
    #[arg(long)]
    pub include: Option<String>,

    /// Skip files matching these globs (comma-separated)
    #[arg(long)]
    pub exclude: Option<String>,

    /// Maximum matched lines in total
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Maximum matched lines per file
    #[arg(long)]
    pub max_results_per_file: Option<usize>,

    /// Context lines before and after each match
    #[arg(short = 'C', long)]
    pub context: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct FilesArgs {
    /// Words of the file path
    pub query: String,

    /// Workspace directory (default: client.default_workspace, then the current directory)
    #[arg(short, long)]
    pub workspace: Option<String>,

    /// Maximum files to list
    #[arg(short, long)]
    pub limit: Option<usize>,
}
