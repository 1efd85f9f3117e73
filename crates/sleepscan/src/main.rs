use clap::Parser;
use pipeline::RunControl;
use sleepscan::Cli;
use std::ops::ControlFlow;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sleepscan=info,pipeline=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    tracing::info!("sleepscan starting with {}", cli.config.display());

    let token = CancellationToken::new();
    let control = RunControl::with_token(token.clone()).with_progress(|p| {
        debug!("{}: {} done ({}/{})", p.run, p.channel, p.completed, p.total);
        ControlFlow::Continue(())
    });

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, cancelling run");
            token.cancel();
        }
    });

    let summary = tokio::task::spawn_blocking(move || sleepscan::analyze(&cli, &control)).await??;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
