//! Daemon startup, background launch and restart.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use haystack::client::Client;
use haystack::config::Config;
use haystack::context::IndexerContext;
use haystack::error::{IndexError, Result};
use haystack::lock::ServerLock;
use haystack::server;

use super::args::RunArgs;

/// How long `server start`/`stop` wait for the daemon to come up or go away.
const STATE_CHANGE_TIMEOUT: Duration = Duration::from_secs(10);

fn init_logging(config: &Config, log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.server.logging_stdout {
        builder.with_writer(std::io::stdout).init();
    } else {
        builder.with_writer(std::io::stderr).init();
    }
}

/// `<home>/logs/server.log`, where a detached daemon's stderr goes.
fn log_file_path(config: &Config) -> PathBuf {
    config.home_path().join("logs").join("server.log")
}

/// Launch `haystack server run` as a detached child.
pub fn spawn_detached(config: &Config, config_path: Option<&Path>, log_level: &str) -> Result<u32> {
    let log_path = log_file_path(config);
    if let Some(dir) = log_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let log = OpenOptions::new().create(true).append(true).open(&log_path)?;

    let mut cmd = Command::new(std::env::current_exe()?);
    if let Some(path) = config_path {
        cmd.arg("--config").arg(path);
    }
    cmd.args(["server", "run", "--log-level", log_level])
        .stdin(Stdio::null())
        .stdout(log.try_clone()?)
        .stderr(log);

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        // SAFETY: setsid is async-signal-safe and touches no parent state.
        unsafe {
            cmd.pre_exec(|| {
                libc::setsid();
                Ok(())
            });
        }
    }

    let child = cmd.spawn()?;
    Ok(child.id())
}

/// `server run`: hold the lock, open the index and serve until stopped.
pub fn cmd_run(config: Config, config_path: Option<&Path>, args: RunArgs) -> Result<()> {
    if args.daemon {
        let pid = spawn_detached(&config, config_path, &args.log_level)?;
        eprintln!("Server started in background (pid {})", pid);
        return Ok(());
    }

    init_logging(&config, &args.log_level);
    let lock = ServerLock::acquire(&config.lock_path())?;
    info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        home = %config.home_path().display(),
        port = config.port(),
        "Starting haystack server"
    );

    let restart_config = config.clone();
    let ctx = IndexerContext::open(config)?;
    let signal = ctx.shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || signal.trigger()) {
        warn!(error = %e, "Cannot install Ctrl-C handler");
    }

    let served = server::serve(&ctx);
    if let Err(e) = &served {
        error!(error = %e, "HTTP server failed");
    }
    let restarting = ctx.shutdown.is_restarting();
    ctx.shutdown();
    drop(ctx);
    drop(lock);
    info!("Server stopped");

    if restarting {
        let pid = spawn_detached(&restart_config, config_path, &args.log_level)?;
        info!(pid, "Restarted server");
    }
    served
}

/// Poll until the daemon is (or is no longer) serving. False on timeout.
fn wait_for(client: &Client, want_running: bool) -> Result<bool> {
    let deadline = Instant::now() + STATE_CHANGE_TIMEOUT;
    while Instant::now() < deadline {
        let running = client.status()?.is_some_and(|s| !s.shutting_down);
        if running == want_running {
            return Ok(true);
        }
        std::thread::sleep(Duration::from_millis(100));
    }
    Ok(false)
}

pub fn cmd_start(config: &Config, config_path: Option<&Path>) -> Result<()> {
    let client = Client::new(config)?;
    if let Some(status) = client.status()? {
        println!("Server is already running (pid {})", status.pid);
        return Ok(());
    }
    spawn_detached(config, config_path, "info")?;
    if !wait_for(&client, true)? {
        return Err(IndexError::Http(format!(
            "server did not come up, see {}",
            log_file_path(config).display()
        )));
    }
    println!("Server started on port {}", config.port());
    Ok(())
}

pub fn cmd_stop(config: &Config) -> Result<()> {
    let client = Client::new(config)?;
    if client.status()?.is_none() {
        println!("Server is not running");
        return Ok(());
    }
    client.call_ok("/server/stop", &serde_json::json!({}))?;
    if !wait_for(&client, false)? {
        return Err(IndexError::Http("server did not stop in time".to_string()));
    }
    println!("Server stopped");
    Ok(())
}

pub fn cmd_restart(config: &Config) -> Result<()> {
    let client = Client::new(config)?;
    client.call_ok("/server/restart", &serde_json::json!({}))?;
    println!("Server restarting");
    Ok(())
}

pub fn cmd_status(config: &Config) -> Result<()> {
    match Client::new(config)?.status()? {
        Some(status) => println!(
            "Server is running (pid {}, version {}){}",
            status.pid,
            status.version,
            if status.shutting_down { ", shutting down" } else { "" }
        ),
        None => println!("Server is not running"),
    }
    Ok(())
}
