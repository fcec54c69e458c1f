use std::{io, process::ExitCode, sync::Arc};

use arrow_fetch::{config::Args, report, stats::StatsRecorder};
use clap::Parser;
use tracing::error;
use tracing_subscriber::{EnvFilter, fmt};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    // stdout carries the report, so logs go to stderr.
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(url = %args.url, %err, "fetch failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> arrow_fetch::Result<()> {
    let client = args.client()?;
    let recorder = StatsRecorder::new();

    let mut request = args.request(&client);
    if args.stats {
        request = request.recorder(Arc::new(recorder.clone()));
    }

    report::fetch_and_report(request, &mut io::stdout()).await?;

    if args.stats {
        eprint!("{}", recorder.finish());
    }
    Ok(())
}
