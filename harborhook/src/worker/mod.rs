//! The delivery worker binary's consumer loop: a single subscription on the
//! `deliveries` subject, fanned out across a bounded pool of concurrent
//! tasks so that one slow endpoint cannot stall the whole worker.

pub mod classify;
pub mod process;

use crate::state::AppState;
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::Semaphore;

pub async fn run(state: AppState, http_client: reqwest::Client, mut shutdown: tokio::sync::broadcast::Receiver<()>) {
    let mut stream = match state.bus.subscribe("deliveries").await {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(error = %e, "failed to subscribe to deliveries subject");
            return;
        }
    };

    let semaphore = Arc::new(Semaphore::new(state.config.worker_max_inflight));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("worker shutting down");
                break;
            }
            maybe_msg = stream.next() => {
                let Some(msg) = maybe_msg else {
                    tracing::warn!("delivery subscription stream closed");
                    break;
                };

                let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
                let state = state.clone();
                let http_client = http_client.clone();

                tokio::spawn(async move {
                    let result = process::process_task(&state, &http_client, msg).await;
                    tracing::debug!(?result, "delivery task processed");
                    drop(permit);
                });
            }
        }
    }
}
