use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use forge_fleet::agent::{HubClient, WorkerAgent};
use forge_fleet::config::{HubConfig, WorkerConfig};
use forge_fleet::hub::run_hub;
use forge_fleet::shutdown::install_shutdown_handler;
use forge_fleet::store::NewJob;

#[derive(Parser, Debug)]
#[command(name = "forge-fleet")]
#[command(version)]
#[command(about = "A persisted job queue with a coordination hub and pull-based workers")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordination hub
    Hub(HubArgs),

    /// Start a worker agent
    Worker(WorkerArgs),

    /// Job management commands
    Job {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: JobCommands,
    },
}

// =============================================================================
// Hub Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct HubArgs {
    /// Address to bind the HTTP API to
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Path to the SQLite database file
    #[arg(long, default_value = "./forge-fleet.sqlite")]
    db: PathBuf,

    /// Bearer token required on mutating calls; omit to disable auth
    #[arg(long, env = "FORGE_FLEET_TOKEN")]
    auth_token: Option<String>,

    /// Reaper sweep interval in milliseconds
    #[arg(long, default_value = "15000")]
    reap_interval_ms: u64,

    /// Heartbeat age in milliseconds after which a job is presumed abandoned
    #[arg(long, default_value = "60000")]
    liveness_timeout_ms: i64,
}

// =============================================================================
// Worker Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct WorkerArgs {
    /// Base URL of the hub
    #[arg(long, env = "HUB_URL", default_value = "http://127.0.0.1:8080")]
    hub_url: String,

    /// Unique identifier for this worker
    #[arg(long, env = "WORKER_ID")]
    worker_id: String,

    /// Display name shown in worker listings
    #[arg(long)]
    name: Option<String>,

    /// Advertised CPU cores
    #[arg(long, default_value = "1")]
    cores: u32,

    /// Advertised memory in GB
    #[arg(long, default_value = "1.0")]
    ram_gb: f64,

    /// Capability tags (comma-separated)
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Only claim jobs of these types (comma-separated); empty means any
    #[arg(long, value_delimiter = ',')]
    types: Vec<String>,

    /// Bearer token, must match the hub's
    #[arg(long, env = "FORGE_FLEET_TOKEN")]
    auth_token: Option<String>,

    /// Sleep between empty claim polls, in milliseconds
    #[arg(long, default_value = "5000")]
    poll_interval_ms: u64,

    /// Heartbeat cadence while a job is in flight, in milliseconds
    #[arg(long, default_value = "10000")]
    heartbeat_interval_ms: u64,

    /// On shutdown, wait this long for an in-flight job, in milliseconds
    #[arg(long, default_value = "30000")]
    shutdown_grace_ms: u64,

    /// Directory for cached solver executables
    #[arg(long)]
    solver_cache_dir: Option<PathBuf>,
}

// =============================================================================
// Client Arguments (shared by job commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Hub address
    #[arg(long, short = 'a', env = "HUB_URL", default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Bearer token for mutating calls
    #[arg(long, env = "FORGE_FLEET_TOKEN")]
    auth_token: Option<String>,
}

// =============================================================================
// Job Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum JobCommands {
    /// Submit a new job
    Submit {
        /// Job type, matched against worker type filters
        job_type: String,

        /// Opaque JSON params for the solver
        #[arg(long, default_value = "{}")]
        params: String,

        /// Higher priority jobs are claimed first
        #[arg(long, default_value = "0")]
        priority: i64,

        /// Attempts before quarantine
        #[arg(long, default_value = "3")]
        max_attempts: i64,

        /// Wall-clock budget per attempt, in milliseconds
        #[arg(long, default_value = "300000")]
        max_runtime_ms: i64,

        /// URL of the solver executable
        #[arg(long)]
        solver_url: Option<String>,

        /// SHA-256 checksum the solver must match
        #[arg(long)]
        solver_checksum: Option<String>,
    },
    /// Fetch one job by id
    Get {
        /// The job ID
        job_id: String,
    },
    /// List recent jobs
    List {
        /// Filter by status (pending, assigned, running, completed, failed, quarantined)
        #[arg(long)]
        status: Option<String>,

        /// Maximum number of jobs to return
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Cancel a pending or assigned job
    Cancel {
        /// The job ID
        job_id: String,
    },
}

// =============================================================================
// Entrypoints
// =============================================================================

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_hub_command(args: HubArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = HubConfig::new(args.listen, args.db).with_auth_token(args.auth_token);
    config.reap_interval_ms = args.reap_interval_ms;
    config.liveness_timeout_ms = args.liveness_timeout_ms;

    let shutdown = install_shutdown_handler();
    run_hub(config, shutdown).await?;
    Ok(())
}

async fn run_worker_command(args: WorkerArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_logging();

    let mut config = WorkerConfig::new(args.hub_url, args.worker_id);
    config.name = args.name;
    config.cores = args.cores;
    config.ram_gb = args.ram_gb;
    config.tags = args.tags;
    config.types = args.types;
    config.auth_token = args.auth_token;
    config.poll_interval_ms = args.poll_interval_ms;
    config.heartbeat_interval_ms = args.heartbeat_interval_ms;
    config.shutdown_grace_ms = args.shutdown_grace_ms;
    if let Some(dir) = args.solver_cache_dir {
        config.solver_cache_dir = dir;
    }

    let shutdown = install_shutdown_handler();
    WorkerAgent::new(config).run(shutdown).await;
    Ok(())
}

async fn run_job_command(
    client: ClientArgs,
    command: JobCommands,
) -> Result<(), Box<dyn std::error::Error>> {
    let hub = HubClient::new(client.addr, client.auth_token);

    match command {
        JobCommands::Submit {
            job_type,
            params,
            priority,
            max_attempts,
            max_runtime_ms,
            solver_url,
            solver_checksum,
        } => {
            let mut new = NewJob::new(job_type)
                .params(params)
                .priority(priority)
                .max_attempts(max_attempts)
                .max_runtime_ms(max_runtime_ms);
            if let Some(url) = solver_url {
                new = new.solver(url, solver_checksum);
            }
            let created = hub.create_job(&new).await?;
            println!("{}", serde_json::to_string_pretty(&created)?);
        }
        JobCommands::Get { job_id } => {
            let job = hub.get_job(&job_id).await?;
            println!("{}", serde_json::to_string_pretty(&job)?);
        }
        JobCommands::List { status, limit } => {
            let jobs = hub.list_jobs(status.as_deref(), limit).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        JobCommands::Cancel { job_id } => {
            if hub.cancel_job(&job_id).await? {
                println!("Job {job_id} cancelled");
            } else {
                eprintln!("Job {job_id} not found or not cancellable");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Hub(hub_args) => run_hub_command(hub_args).await,
        Commands::Worker(worker_args) => run_worker_command(worker_args).await,
        Commands::Job { client, command } => run_job_command(client, command).await,
    }
}
