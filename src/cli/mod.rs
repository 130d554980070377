//! CLI layer: argument parsing, command dispatch, and the client-side
//! subcommands. `server run` is the daemon itself.

pub mod args;
mod serve;

pub use args::*;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::json;

use haystack::client::Client;
use haystack::config::Config;
use haystack::error::{IndexError, Result};
use haystack::query::{
    RequestLimit, SearchContentRequest, SearchContentResponse, SearchFilesRequest,
    SearchFilesResponse, SearchFilters,
};
use haystack::server::protocol::WorkspaceList;
use haystack::workspace::Workspace;

// ─── CLI ─────────────────────────────────────────────────────────────

/// Local code search service: a daemon keeping an inverted index of your
/// workspaces, and the client that queries it
#[derive(Parser, Debug)]
#[command(name = "haystack", version, about, after_help = "\
Run 'haystack <COMMAND> --help' for detailed options and examples.")]
pub(crate) struct Cli {
    /// Configuration file (default: first of ./config.local.yaml, ./config.yaml,
    /// ~/.haystack/config.yaml, ./config.example.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Commands {
    /// Manage the daemon
    Server {
        #[command(subcommand)]
        action: ServerCommand,
    },

    /// Manage workspaces
    Workspace {
        #[command(subcommand)]
        action: WorkspaceCommand,
    },

    /// Search file contents
    Search(SearchArgs),

    /// Find files by path words
    Files(FilesArgs),

    /// Show version and build time
    Version,
}

// ─── Main entry point ───────────────────────────────────────────────

pub fn run() {
    let cli = Cli::parse();

    let result = load_config(&cli).and_then(|config| {
        let config_path = cli.config.as_deref();
        match cli.command {
            Commands::Server { action } => match action {
                ServerCommand::Status => serve::cmd_status(&config),
                ServerCommand::Start => serve::cmd_start(&config, config_path),
                ServerCommand::Stop => serve::cmd_stop(&config),
                ServerCommand::Restart => serve::cmd_restart(&config),
                ServerCommand::Run(args) => serve::cmd_run(config, config_path, args),
            },
            Commands::Workspace { action } => cmd_workspace(&config, action),
            Commands::Search(args) => cmd_search(&config, args),
            Commands::Files(args) => cmd_files(&config, args),
            Commands::Version => {
                println!(
                    "haystack {} (built {})",
                    env!("CARGO_PKG_VERSION"),
                    env!("BUILD_DATETIME")
                );
                Ok(())
            }
        }
    });

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(cli: &Cli) -> Result<Config> {
    match &cli.config {
        Some(path) => {
            if !path.is_file() {
                return Err(IndexError::Config(format!("{} does not exist", path.display())));
            }
            Config::load_from(Some(path))
        }
        None => Config::load(),
    }
}

/// Absolute, normalised form of a path typed on the command line.
pub(crate) fn absolute(path: &str) -> Result<String> {
    let abs = std::path::absolute(path)?;
    Ok(haystack::normalize_path(&abs.to_string_lossy()))
}

/// The explicit path, else the configured default, else the current directory.
pub(crate) fn workspace_path(explicit: Option<&str>, config: &Config) -> Result<String> {
    let chosen = explicit
        .or(config.client.default_workspace.as_deref())
        .unwrap_or(".");
    absolute(chosen)
}

// ─── Workspaces ─────────────────────────────────────────────────────

fn cmd_workspace(config: &Config, action: WorkspaceCommand) -> Result<()> {
    let client = Client::new(config)?;
    match action {
        WorkspaceCommand::List => {
            let list: WorkspaceList = client.call_data("/workspace/list", &json!({}))?;
            if list.workspaces.is_empty() {
                println!("No workspaces. Add one with 'haystack workspace create <DIR>'.");
            }
            for ws in &list.workspaces {
                print_workspace_row(ws);
            }
        }
        WorkspaceCommand::Get { path } => {
            let path = workspace_path(path.as_deref(), config)?;
            let ws: Workspace = client.call_data("/workspace/get", &json!({ "path": path }))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&ws).map_err(|e| IndexError::Http(e.to_string()))?
            );
        }
        WorkspaceCommand::Create { path } => {
            let path = workspace_path(path.as_deref(), config)?;
            let ws: Workspace = client.call_data("/workspace/create", &json!({ "path": path }))?;
            println!("Created workspace {} for {}, indexing in background", ws.id, ws.path);
        }
        WorkspaceCommand::Delete { path } => {
            let path = workspace_path(path.as_deref(), config)?;
            client.call_ok("/workspace/delete", &json!({ "path": path }))?;
            println!("Deleted workspace {}", path);
        }
        WorkspaceCommand::Sync { path } => {
            let path = workspace_path(path.as_deref(), config)?;
            let resp = client.call_ok("/workspace/sync", &json!({ "path": path }))?;
            println!("{}", resp.message);
        }
        WorkspaceCommand::SyncAll => {
            let resp = client.call_ok("/workspace/sync-all", &json!({}))?;
            println!("{}", resp.message);
        }
    }
    Ok(())
}

fn print_workspace_row(ws: &Workspace) {
    let synced = ws
        .last_full_sync
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    println!(
        "{:>4}  {:>8} files  synced {}  {}",
        ws.id, ws.total_files, synced, ws.path
    );
}

// ─── Search ─────────────────────────────────────────────────────────

pub(crate) fn build_search_request(config: &Config, args: &SearchArgs) -> Result<SearchContentRequest> {
    let defaults = config.client.default_limit;
    let filters = SearchFilters {
        path: args.path.clone(),
        include: args.include.clone(),
        exclude: args.exclude.clone(),
    };
    Ok(SearchContentRequest {
        workspace: workspace_path(args.workspace.as_deref(), config)?,
        query: args.query.clone(),
        case_sensitive: args.case_sensitive,
        filters: (filters != SearchFilters::default()).then_some(filters),
        limit: Some(RequestLimit {
            max_results: args.max_results.or(defaults.max_results),
            max_results_per_file: args.max_results_per_file.or(defaults.max_results_per_file),
        }),
        before_after: args.context,
    })
}

fn cmd_search(config: &Config, args: SearchArgs) -> Result<()> {
    let request = build_search_request(config, &args)?;
    let client = Client::new(config)?;
    let envelope = client.call("/search/content", &request)?;
    let response: Option<SearchContentResponse> = envelope
        .data
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| IndexError::Http(format!("bad search reply: {}", e)))?;
    let Some(response) = response else {
        return Err(IndexError::Remote(envelope.message));
    };

    let mut matched = 0usize;
    for result in &response.results {
        println!("{}", result.file);
        for line in &result.lines {
            for ctx in &line.before {
                println!("{:>6}- {}", ctx.line_number, ctx.content);
            }
            println!("{:>6}: {}", line.line.line_number, line.line.content);
            for ctx in &line.after {
                println!("{:>6}- {}", ctx.line_number, ctx.content);
            }
            matched += 1;
        }
        if result.truncate {
            println!("    ... more matches in this file");
        }
        println!();
    }
    eprintln!(
        "{} matching lines in {} files{}",
        matched,
        response.results.len(),
        if response.truncate { " (truncated)" } else { "" }
    );
    if envelope.code != 0 {
        return Err(IndexError::Remote(envelope.message));
    }
    Ok(())
}

fn cmd_files(config: &Config, args: FilesArgs) -> Result<()> {
    let request = SearchFilesRequest {
        workspace: workspace_path(args.workspace.as_deref(), config)?,
        query: args.query,
        limit: args.limit.or(config.client.default_limit.max_files_results),
    };
    let client = Client::new(config)?;
    let response: SearchFilesResponse = client.call_data("/search/files", &request)?;
    for hit in &response.files {
        println!("{}", hit.file);
    }
    eprintln!("{} files", response.files.len());
    Ok(())
}
