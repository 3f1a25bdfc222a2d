use clap::Parser;
use kiln_client::ApiClient;
use kiln_distro::{select_distribution, Distribution};
use kiln_queue::{Job, JobStatus};
use kiln_worker::run_build;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};

/// Consecutive claim failures tolerated before the socket is considered
/// gone for good.
const MAX_CLAIM_FAILURES: u32 = 5;

#[derive(Parser)]
#[command(name = "kiln-worker", version, about = "Kiln build worker")]
struct Cli {
    /// Unix socket of the job API.
    #[arg(long, default_value = "/run/kiln/job.socket")]
    job_socket: PathBuf,

    /// External image-build engine program.
    #[arg(long, default_value = "build-engine")]
    engine: PathBuf,

    /// Content-addressed artifact store directory.
    #[arg(long, default_value = "/var/lib/kiln/artifacts")]
    store: PathBuf,

    /// Scratch directory for engine output trees.
    #[arg(long, default_value = "/var/lib/kiln/outputs")]
    output_directory: PathBuf,

    /// Distribution whose format table maps formats to artifact names.
    #[arg(long, default_value = "fedora-30")]
    distro: String,

    /// Enable verbose (debug) logging output.
    #[arg(short, long, default_value_t = false)]
    verbose: bool,
}

fn handle_job(cli: &Cli, distro: &dyn Distribution, client: &ApiClient, job: Job) {
    info!("running job {} ({})", job.id, job.format);

    let built = distro
        .filename_mime(&job.format)
        .map_err(|e| e.to_string())
        .and_then(|(filename, mime_type)| {
            run_build(
                &cli.engine,
                &cli.store,
                &cli.output_directory,
                &job,
                &filename,
                &mime_type,
            )
            .map_err(|e| e.to_string())
        });

    let update = match built {
        Ok(image) => {
            info!("job {} finished: {}", job.id, image.output_ref);
            client.update_job(job.id, JobStatus::Finished, Some(image))
        }
        Err(reason) => {
            error!("job {} failed: {reason}", job.id);
            client.update_job(job.id, JobStatus::Failed, None)
        }
    };
    if let Err(e) = update {
        error!("could not report status for job {}: {e}", job.id);
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("KILN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    ctrlc::set_handler(|| {
        info!("shutting down");
        std::process::exit(0);
    })
    .expect("install signal handler");

    let distro = match select_distribution(&cli.distro) {
        Ok(distro) => distro,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };
    let client = ApiClient::new(&cli.job_socket);
    info!("polling {} for jobs", cli.job_socket.display());

    let mut claim_failures = 0;
    loop {
        match client.claim_job() {
            Ok(Some(job)) => {
                claim_failures = 0;
                handle_job(&cli, distro.as_ref(), &client, job);
            }
            Ok(None) => {
                claim_failures = 0;
            }
            Err(e) => {
                claim_failures += 1;
                if claim_failures >= MAX_CLAIM_FAILURES {
                    error!("job socket unreachable: {e}");
                    return ExitCode::from(1);
                }
                warn!("claim failed ({claim_failures}/{MAX_CLAIM_FAILURES}): {e}");
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}
