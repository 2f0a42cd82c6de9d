//! `attendance-functions` -- hosts the attendance queue functions.
//!
//! Watches the queue paths of the configured Realtime Database and runs the
//! matching function for every change until interrupted. See
//! [`attendance_functions::config`] for the environment variables it reads.

use attendance_functions::config::Config;
use attendance_functions::functions::Runtime;
use attendance_functions::{handlers, FunctionsApp};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_functions=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().await?;
    tracing::info!(?config, "Loaded configuration");

    let app = FunctionsApp::new(&config)?;
    let mut runtime = Runtime::new(app.database()).with_timeout(config.function_timeout);
    handlers::register(&app, &mut runtime)?;

    for function in runtime.functions() {
        tracing::info!(
            function = %function.name,
            path = %function.pattern,
            trigger = ?function.trigger,
            "Registered function",
        );
    }

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Shutdown requested, waiting for running invocations");
                shutdown.cancel();
            }
            Err(e) => tracing::error!(error = %e, "Cannot listen for shutdown signal"),
        }
    });

    runtime.run(cancel).await?;
    tracing::info!("Functions runtime stopped");
    Ok(())
}
