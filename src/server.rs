//! HTTP front end.
//!
//! A single fallback handler feeds every request path to the [`Dispatcher`],
//! so routing, parameter defaults and the 404 listing all live in one place.
//! The server runs on the harness's shared context next to a [`LoopMonitor`]
//! that measures how long requests keep that context busy.

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures::FutureExt;
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info};

use crate::bridge::panic_message;
use crate::dispatch::{Dispatcher, Reply, ReplyBody};
use crate::error::{HarnessError, Result};
use crate::monitor::LoopMonitor;
use crate::runtime::HarnessRuntime;

const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        match self.body {
            ReplyBody::Json(value) => (status, Json(value)).into_response(),
            ReplyBody::Text(text) => {
                (status, [(header::CONTENT_TYPE, METRICS_CONTENT_TYPE)], text).into_response()
            }
        }
    }
}

/// Router sending every path to `dispatcher`.
pub fn router(dispatcher: Arc<Dispatcher>) -> Router {
    Router::new().fallback(handle).with_state(dispatcher)
}

async fn handle(State(dispatcher): State<Arc<Dispatcher>>, uri: Uri) -> Response {
    let params: HashMap<String, String> = Query::try_from_uri(&uri)
        .map(|Query(params)| params)
        .unwrap_or_default();
    let path = uri.path();
    guard_reply(path, dispatcher.dispatch(path, &params)).await
}

/// Await `reply`, turning a panic into a 500 `Internal Server Error` envelope.
pub async fn guard_reply<F>(path: &str, reply: F) -> Response
where
    F: Future<Output = Reply>,
{
    match AssertUnwindSafe(reply).catch_unwind().await {
        Ok(reply) => reply.into_response(),
        Err(payload) => {
            error!(path, panic = %panic_message(payload.as_ref()), "request handler panicked");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Internal Server Error" })),
            )
                .into_response()
        }
    }
}

/// Bind the configured address and serve until SIGINT or SIGTERM.
///
/// Must be driven by `runtime.block_on`. Once a signal arrives, a watchdog
/// thread exits the process with status 1 if shutdown outlasts the grace
/// period.
pub async fn run(runtime: &HarnessRuntime) -> Result<()> {
    let addr = runtime.config().bind_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|source| HarnessError::Bind {
            addr: addr.clone(),
            source,
        })?;

    let grace = runtime.config().shutdown_grace();
    serve(runtime, listener, async move {
        shutdown_signal().await;
        spawn_watchdog(grace);
    })
    .await
}

/// Serve on `listener` until `shutdown` resolves, then drain tracked work.
pub async fn serve<F>(runtime: &HarnessRuntime, listener: TcpListener, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let config = runtime.config();
    let monitor = Arc::new(
        LoopMonitor::new(config.monitor.threshold(), config.monitor.interval())
            .with_metrics(runtime.metrics().clone()),
    );
    monitor.start(runtime.tokio_handle());

    let mut samples = monitor.subscribe();
    runtime.spawn_async(async move {
        loop {
            match samples.recv().await {
                Ok(sample) => debug!(
                    lag_ms = sample.lag.as_millis() as u64,
                    violation = sample.violation,
                    "lag sample"
                ),
                Err(RecvError::Lagged(skipped)) => debug!(skipped, "lag sample feed overrun"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let dispatcher = Arc::new(Dispatcher::for_runtime(runtime));
    let app = router(dispatcher);

    info!(
        addr = %listener.local_addr()?,
        variant = %config.variant,
        threshold_ms = monitor.threshold().as_millis() as u64,
        interval_ms = monitor.interval().as_millis() as u64,
        "{} listening",
        config.variant.service_name()
    );

    let stopping = Arc::clone(&monitor);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.await;
            info!("shutdown requested, closing listener");
            stopping.stop();
            info!(stats = ?stopping.stats(), "final lag statistics");
        })
        .await;

    // Closes the sample feed so the logging task ends
    monitor.stop();
    drop(monitor);

    runtime.shutdown();
    runtime.wait_for_shutdown().await;
    served?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(%e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(%e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Exit with status 1 unless the process ends within `grace`.
///
/// Runs on its own OS thread so a monopolized context cannot hold it back.
fn spawn_watchdog(grace: Duration) {
    let spawned = std::thread::Builder::new()
        .name("looplag-watchdog".to_string())
        .spawn(move || {
            std::thread::sleep(grace);
            error!(grace_ms = grace.as_millis() as u64, "forced shutdown after grace period");
            std::process::exit(1);
        });
    if let Err(e) = spawned {
        error!(%e, "failed to start shutdown watchdog");
    }
}
