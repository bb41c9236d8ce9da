//! `hottub-dispatch` — invoked by the host cron once per scheduled job.
//! Deliberately synchronous; see `hottub::dispatch` for the rationale.

use clap::Parser;
use hottub::dispatch::{run, DispatchConfig};

#[derive(Parser)]
#[command(name = "hottub-dispatch")]
struct Args {
    /// Job id embedded in the crontab line that invoked this process.
    job_id: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config = match DispatchConfig::from_env() {
        Ok(config) => config,
        Err(error) => {
            tracing::error!(%error, "dispatcher misconfigured");
            std::process::exit(1);
        }
    };

    let outcome = run(&config, &args.job_id);
    std::process::exit(outcome.exit_code());
}
