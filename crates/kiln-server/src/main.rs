use clap::Parser;
use kiln_distro::select_distribution;
use kiln_queue::JobQueue;
use kiln_server::{bind_unix, run_api_server, run_job_server, ServerState};
use kiln_solver::SolverClient;
use kiln_store::BlueprintStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "kilnd", version, about = "Kiln OS image composer service")]
struct Cli {
    /// Unix socket for the blueprint API.
    #[arg(long, default_value = "/run/weldr/api.socket")]
    api_socket: PathBuf,

    /// Unix socket for the worker-facing job API.
    #[arg(long, default_value = "/run/kiln/job.socket")]
    job_socket: PathBuf,

    /// Blueprint store root directory.
    #[arg(long, default_value = "/var/lib/kiln")]
    store: PathBuf,

    /// Distribution to compose images for.
    #[arg(long, default_value = "fedora-30")]
    distro: String,

    /// Dependency solver program.
    #[arg(long, default_value = "kiln-depsolve")]
    solver: PathBuf,

    /// Seconds a job claim may long-poll before returning empty.
    #[arg(long, default_value_t = 30)]
    claim_timeout: u64,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Enable trace-level logging.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let store = match BlueprintStore::open(&cli.store) {
        Ok(store) => store,
        Err(e) => {
            error!("cannot open blueprint store at {}: {e}", cli.store.display());
            return ExitCode::from(1);
        }
    };
    let distro = match select_distribution(&cli.distro) {
        Ok(distro) => distro,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };

    let state = Arc::new(ServerState {
        store,
        distro,
        solver: SolverClient::new(&cli.solver),
        queue: JobQueue::new(),
        claim_timeout: Duration::from_secs(cli.claim_timeout),
    });

    let api_server = match bind_unix(&cli.api_socket) {
        Ok(server) => server,
        Err(e) => {
            error!("cannot bind {}: {e}", cli.api_socket.display());
            return ExitCode::from(1);
        }
    };
    let job_server = match bind_unix(&cli.job_socket) {
        Ok(server) => server,
        Err(e) => {
            error!("cannot bind {}: {e}", cli.job_socket.display());
            return ExitCode::from(1);
        }
    };

    let api_socket = cli.api_socket.clone();
    let job_socket = cli.job_socket.clone();
    ctrlc::set_handler(move || {
        info!("shutting down");
        let _ = std::fs::remove_file(&api_socket);
        let _ = std::fs::remove_file(&job_socket);
        std::process::exit(0);
    })
    .expect("install signal handler");

    info!(
        "listening on {} (blueprints) and {} (jobs)",
        cli.api_socket.display(),
        cli.job_socket.display()
    );

    {
        let state = Arc::clone(&state);
        std::thread::spawn(move || run_job_server(&state, &job_server));
    }
    run_api_server(&state, &api_server);

    ExitCode::SUCCESS
}
