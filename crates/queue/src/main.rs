// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! dci-queue - schedule commands on pools of scarce test resources

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use clap::{Parser, Subcommand};
use dci_queue::sched::{QueueError, ScheduleOpts, ScheduleOutcome, Scheduler};
use dci_queue::{crontab, env, inspect, PoolError, PoolStore};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(
    name = "dci-queue",
    version,
    about = "Manage pools of resources and schedule commands on them"
)]
struct Cli {
    /// Top directory to store data
    #[arg(short = 't', long, global = true)]
    top_dir: Option<PathBuf>,

    /// Logging level
    #[arg(short = 'l', long, global = true)]
    log_level: Option<String>,

    /// Output logs to the console
    #[arg(short = 'c', long, global = true)]
    console_output: bool,

    /// Called from inside a container
    #[arg(long, global = true)]
    podman: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a pool of resources
    AddPool {
        /// Do not run the install phase
        #[arg(short = 'n', long)]
        no_install: bool,
        pool: String,
    },
    /// Remove a pool of resources
    RemovePool {
        /// Do not run the uninstall phase
        #[arg(short = 'n', long)]
        no_uninstall: bool,
        pool: String,
    },
    /// Create a new resource in a pool
    AddResource { pool: String, name: String },
    /// Remove a resource from a pool
    RemoveResource {
        /// Force the removal of the resource from the pool
        #[arg(short = 'f', long)]
        force: bool,
        pool: String,
        name: String,
        reason: String,
    },
    /// Schedule a command on a pool (cmd must contain @RESOURCE)
    Schedule {
        /// Block until the command is finished and exit with its return code
        #[arg(short = 'b', long)]
        block: bool,
        /// Command output to the console
        #[arg(short = 'C', long)]
        command_output: bool,
        /// Force the command to be scheduled even if it is duplicated
        #[arg(short = 'f', long)]
        force: bool,
        /// Remove the resource once the job starts
        #[arg(short = 'r', long)]
        remove_resource: bool,
        /// Priority level
        #[arg(short = 'p', long, default_value_t = 0)]
        priority: i64,
        /// Additional pool to book a resource from (repeatable)
        #[arg(short = 'e', long = "extra-pool")]
        extra_pools: Vec<String>,
        pool: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Un-schedule a command from a pool
    Unschedule { pool: String, id: u64 },
    /// Run commands from a pool
    Run {
        /// Command output to the console
        #[arg(short = 'C', long)]
        command_output: bool,
        pool: String,
    },
    /// List the commands scheduled on a pool of resources
    List { pool: Option<String> },
    /// Display the log of an executed command
    Log {
        /// Output appended data as the file grows
        #[arg(short = 'f', long)]
        follow: bool,
        /// Output the last N lines
        #[arg(short = 'n', long)]
        lines: Option<String>,
        pool: String,
        id: String,
    },
    /// Search the scheduled commands by argv
    Search {
        pool: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        cmd: Vec<String>,
    },
    /// Search a scheduled command by its working directory
    Searchdir { pool: String, dir: PathBuf },
    /// List the remote job ids created by an executed command
    DciJob { pool: String, id: String },
    /// Clean stale commands from a pool
    Clean { pool: String },
    /// Install the periodic trigger for a pool
    Install { pool: String },
    /// Uninstall the periodic trigger of a pool
    Uninstall { pool: String },
    /// Add the managed lines to a crontab file (EDITOR side of crontab -e)
    AddCrontab { pool: String, file: PathBuf },
    /// Remove the managed lines from a crontab file
    RemoveCrontab { pool: String, file: PathBuf },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli).await);
}

async fn run(cli: Cli) -> i32 {
    let top_dir = cli.top_dir.clone().unwrap_or_else(env::default_top_dir);
    if !top_dir.exists() {
        if let Err(e) = std::fs::create_dir_all(&top_dir) {
            eprintln!("Unable to create top dir {}: {}", top_dir.display(), e);
            return 1;
        }
    }

    let console = cli.console_output || env::console_output();
    let _log_guard = match setup_logging(&cli, &top_dir, console) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Unable to set up logging: {}", e);
            return 1;
        }
    };
    set_umask();

    let store = PoolStore::new(&top_dir);
    match execute(cli, store).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            tracing::error!(error = %e, "command failed");
            match e {
                QueueError::Io { ref source, .. }
                    if source.kind() == std::io::ErrorKind::PermissionDenied =>
                {
                    2
                }
                QueueError::Pool(PoolError::Io { ref source, .. })
                    if source.kind() == std::io::ErrorKind::PermissionDenied =>
                {
                    2
                }
                _ => 1,
            }
        }
    }
}

async fn execute(cli: Cli, store: PoolStore) -> Result<i32, QueueError> {
    let podman = cli.podman;
    match cli.command {
        Commands::AddPool { no_install, pool } => {
            store.add_pool(&pool)?;
            if !no_install {
                return Ok(install(&pool, podman));
            }
            Ok(0)
        }
        Commands::RemovePool { no_uninstall, pool } => {
            store.check_pool(&pool)?;
            store.remove_pool(&pool)?;
            if !no_uninstall && !podman {
                return Ok(uninstall(&pool));
            }
            Ok(0)
        }
        Commands::AddResource { pool, name } => {
            store.add_resource(&pool, &name)?;
            Ok(0)
        }
        Commands::RemoveResource {
            force,
            pool,
            name,
            reason,
        } => {
            store.remove_resource(&pool, &name, &reason, force)?;
            Ok(0)
        }
        Commands::Schedule {
            block,
            command_output,
            force,
            remove_resource,
            priority,
            extra_pools,
            pool,
            cmd,
        } => {
            let wd = std::env::current_dir().map_err(|source| QueueError::Io {
                path: PathBuf::from("."),
                source,
            })?;
            let scheduler = Scheduler::new(store, command_output);
            let opts = ScheduleOpts {
                block,
                force,
                remove: remove_resource,
                priority,
                extra_pools,
            };
            match scheduler.schedule(&pool, &cmd, &wd, &opts).await? {
                ScheduleOutcome::Completed { code, .. } => Ok(code),
                _ => Ok(0),
            }
        }
        Commands::Unschedule { pool, id } => {
            let scheduler = Scheduler::new(store, false);
            scheduler.unschedule(&pool, id).await?;
            Ok(0)
        }
        Commands::Run {
            command_output,
            pool,
        } => {
            let scheduler = Scheduler::new(store, command_output);
            scheduler.run_pool(&pool).await?;
            Ok(0)
        }
        Commands::List { pool } => {
            match pool {
                Some(pool) => print!("{}", inspect::list_pool(&store, &pool)?),
                None => print!("{}", inspect::list_pools(&store, "dci-queue")),
            }
            Ok(0)
        }
        Commands::Log {
            follow,
            lines,
            pool,
            id,
        } => view_log(&store, &pool, &id, follow, lines.as_deref()).await,
        Commands::Search { pool, cmd } => {
            for id in inspect::search(&store, &pool, &cmd)? {
                println!("{}", id);
            }
            Ok(0)
        }
        Commands::Searchdir { pool, dir } => match inspect::search_dir(&store, &pool, &dir)? {
            Some(id) => {
                println!("{}", id);
                Ok(0)
            }
            None => Ok(1),
        },
        Commands::DciJob { pool, id } => {
            let jobs = inspect::dci_jobs_from_log(&store, &pool, &id)?;
            if jobs.is_empty() {
                eprintln!("No DCI job IDs found in (pool/id): {}/{}", pool, id);
                return Ok(1);
            }
            for (name, job_id) in jobs {
                println!("{}:{}", name, job_id);
            }
            Ok(0)
        }
        Commands::Clean { pool } => {
            let scheduler = Scheduler::new(store, false);
            scheduler.clean(&pool)?;
            Ok(0)
        }
        Commands::Install { pool } => {
            store.check_pool(&pool)?;
            Ok(install(&pool, podman))
        }
        Commands::Uninstall { pool } => {
            store.check_pool(&pool)?;
            Ok(uninstall(&pool))
        }
        Commands::AddCrontab { pool, file } => {
            store.check_pool(&pool)?;
            if podman {
                for line in crontab::cron_lines(&pool, podman) {
                    eprintln!("Add the following line using crontab -e: {}", line);
                }
                return Ok(0);
            }
            crontab::add_crontab(&pool, podman, &file)?;
            Ok(0)
        }
        Commands::RemoveCrontab { pool, file } => {
            store.check_pool(&pool)?;
            crontab::remove_crontab(&pool, podman, &file)?;
            Ok(0)
        }
    }
}

/// Install the crontab trigger. Inside a container there is no crontab to
/// edit, so the lines are printed for the operator instead.
fn install(pool: &str, podman: bool) -> i32 {
    if podman {
        for line in crontab::cron_lines(pool, podman) {
            eprintln!("Add the following line using crontab -e: {}", line);
        }
        return 0;
    }
    edit_crontab(&format!("dci-queue add-crontab {}", pool))
}

fn uninstall(pool: &str) -> i32 {
    edit_crontab(&format!("dci-queue remove-crontab {}", pool))
}

/// Run `crontab -e` with ourselves as the editor so the managed lines are
/// applied to the user's real crontab.
fn edit_crontab(editor: &str) -> i32 {
    let cmdline = format!("env EDITOR='{}' crontab -e", editor);
    tracing::info!(cmd = %cmdline, "editing crontab");
    match std::process::Command::new("sh").arg("-c").arg(&cmdline).status() {
        Ok(status) => {
            if status.success() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            eprintln!("Unable to edit crontab: {}", e);
            1
        }
    }
}

async fn view_log(
    store: &PoolStore,
    pool: &str,
    id: &str,
    follow: bool,
    lines: Option<&str>,
) -> Result<i32, QueueError> {
    store.check_pool(pool)?;
    let logfile = store.log_dir(pool).join(id);
    if !logfile.exists() {
        if !store.queue_dir(pool).join(id).exists() {
            eprintln!("No such file {}", logfile.display());
            return Ok(1);
        }
        eprintln!("Waiting for command {} to start...", id);
        while !logfile.exists() {
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }
    let mut argv = inspect::log_viewer(follow, lines);
    argv.push(logfile.display().to_string());
    tracing::debug!(cmd = ?argv, "executing log viewer");
    let status = std::process::Command::new(&argv[0])
        .args(&argv[1..])
        .status()
        .map_err(|source| QueueError::Io {
            path: logfile,
            source,
        })?;
    Ok(status.code().unwrap_or(1))
}

fn setup_logging(
    cli: &Cli,
    top_dir: &std::path::Path,
    console: bool,
) -> std::io::Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = cli
        .log_level
        .clone()
        .or_else(env::log_level)
        .unwrap_or_else(|| "info".to_string());
    let filter = EnvFilter::try_new(level.to_lowercase())
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if console {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
        return Ok(None);
    }

    let file_appender = tracing_appender::rolling::never(top_dir, "dci-queue.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();
    Ok(Some(guard))
}

/// Keep queue files group-writable so every lab user sharing the host can
/// schedule and reclaim work.
fn set_umask() {
    let current = unsafe { libc::umask(0) };
    let wanted = current & 0o707;
    unsafe {
        libc::umask(wanted);
    }
    if wanted != current {
        tracing::info!("adjusted umask to {:04o}", wanted);
    }
}
