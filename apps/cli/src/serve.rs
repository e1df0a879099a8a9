//! Server-sent-event surface for watching a run live.
//!
//! `GET /sse` starts one pipeline run per client. Enriched castles are sent
//! as `data: {"message": <castle>}`, failures as `error` events and the end
//! of the run as `data: {"finished":"finished"}`. Disconnecting cancels the
//! run.

use std::convert::Infallible;
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use color_eyre::eyre::{Result, WrapErr};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use castlefinder_core::{Orchestrator, PipelineStreams};

#[derive(Clone)]
struct ServeState {
    orchestrator: Orchestrator,
    timeout: Duration,
}

/// Bind `port` and serve until the process is stopped.
pub(crate) async fn serve(orchestrator: Orchestrator, timeout: Duration, port: u16) -> Result<()> {
    let app = router(ServeState {
        orchestrator,
        timeout,
    });

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    info!(%addr, "server listening");
    println!("Streaming castles on http://localhost:{port}/sse");

    axum::serve(listener, app).await.wrap_err("server failed")?;
    Ok(())
}

fn router(state: ServeState) -> Router {
    Router::new().route("/sse", get(sse)).with_state(state)
}

async fn sse(State(state): State<ServeState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let cancel = crate::commands::run_token(state.timeout);
    let streams = state.orchestrator.run(&cancel);

    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(forward_events(streams, tx, cancel));

    Sse::new(ReceiverStream::new(rx).map(Ok)).keep_alive(KeepAlive::default())
}

/// Turn pipeline output into events until both streams end or the client
/// goes away.
async fn forward_events(streams: PipelineStreams, tx: mpsc::Sender<Event>, cancel: CancellationToken) {
    let PipelineStreams {
        mut castles,
        mut errors,
    } = streams;
    let (mut castles_open, mut errors_open) = (true, true);

    while castles_open || errors_open {
        let event = tokio::select! {
            castle = castles.recv(), if castles_open => match castle {
                Some(castle) => match serde_json::to_string(&castle) {
                    Ok(json) => Event::default().data(format!("{{\"message\": {json}}}")),
                    Err(e) => {
                        warn!(name = %castle.name, error = %e, "failed to serialize castle");
                        continue;
                    }
                },
                None => {
                    castles_open = false;
                    continue;
                }
            },
            err = errors.recv(), if errors_open => match err {
                Some(err) => Event::default().event("error").data(err.to_string()),
                None => {
                    errors_open = false;
                    continue;
                }
            },
        };

        if tx.send(event).await.is_err() {
            debug!("client disconnected, cancelling run");
            cancel.cancel();
            return;
        }
    }

    if tx
        .send(Event::default().data("{\"finished\":\"finished\"}"))
        .await
        .is_err()
    {
        debug!("client disconnected before the finished event");
    }
    cancel.cancel();
}
