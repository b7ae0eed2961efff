use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use noonsong_pipeline::config::PipelineConfig;
use noonsong_worker::{execute, Command, WorkerError, USAGE};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "noonsong_worker=info,noonsong_pipeline=info,noonsong_comfyui=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %e, "Worker failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), WorkerError> {
    let command = Command::parse(std::env::args().skip(1))?;
    if command == Command::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = PipelineConfig::from_env()?;
    tracing::info!(
        service = %config.service.url,
        output_dir = %config.output_dir.display(),
        concurrency = config.scheduler.concurrency,
        selection = %config.scheduler.selection,
        "Loaded pipeline configuration",
    );

    // --- Shutdown on Ctrl-C ---
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling in-flight renders");
            on_signal.cancel();
        }
    });

    execute(command, &config, cancel).await
}
