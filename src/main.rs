//! Status relay binary entrypoint.
//! Boots the dispatch loop in the background and serves the registration API.

use shuttle_axum::ShuttleAxum;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use status_relay::api::{self, AppState};
use status_relay::config::AppConfig;
use status_relay::metrics::Metrics;

/// Compact logs filtered by `RUST_LOG` (default `status_relay=info,warn`).
/// A subscriber installed by the host runtime takes precedence.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("status_relay=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    // Install the recorder before anything emits metrics.
    let metrics = Metrics::init()
        .map_err(|e| tracing::warn!(error = %e, "prometheus recorder not installed"))
        .ok();

    let cfg = AppConfig::from_env();
    let (dispatch, notifier) = status_relay::build_dispatch(&cfg).await?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received");
                cancel.cancel();
            }
        });
    }

    // First cycle waits until the delivery backend is usable.
    let ready = async move { notifier.wait_ready().await };
    tokio::spawn(dispatch.clone().run(ready, cancel));

    let mut router = api::router(AppState { dispatch });
    if let Some(m) = &metrics {
        router = router.merge(m.router());
    }

    Ok(router.into())
}
