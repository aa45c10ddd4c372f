//! # Watch Loop
//!
//! Runs the DockhandSecret controller together with its secondary watches and
//! restarts it if the stream ends without a shutdown request.

use crate::controller::reconciler::watches::{spawn_output_secret_watch, spawn_workload_watches};
use crate::controller::reconciler::{Reconciler, reconcile};
use crate::controller::server::ServerState;
use crate::crd::DockhandSecret;
use crate::runtime::error_policy::{handle_reconciliation_error, handle_watch_stream_error};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Secret;
use kube::Api;
use kube_runtime::controller::{self, Controller};
use kube_runtime::watcher;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Run the controller until SIGINT/SIGTERM
pub async fn run_watch_loop(
    secrets: Api<DockhandSecret>,
    reconciler: Arc<Reconciler>,
    server_state: Arc<ServerState>,
    namespace: Option<String>,
) -> Result<(), anyhow::Error> {
    let shutdown_state = Arc::clone(&server_state);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal (SIGINT/SIGTERM), initiating graceful shutdown...");
        shutdown_state.set_ready(false);
    });

    let client = reconciler.client.clone();
    let workload_watches =
        spawn_workload_watches(&client, namespace.as_deref(), &reconciler.secret_lookup);
    let output_secrets: Api<Secret> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let config = reconciler.config.clone();

    loop {
        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }

        info!("Starting controller watch loop...");
        let (requeue_tx, requeue_rx) = futures::channel::mpsc::unbounded();
        let controller = Controller::new(secrets.clone(), watcher::Config::default().any_semantic())
            .with_config(
                controller::Config::default()
                    .concurrency(config.max_concurrent_reconciliations),
            )
            .reconcile_on(requeue_rx)
            .shutdown_on_signal();

        let secret_watch =
            spawn_output_secret_watch(output_secrets.clone(), controller.store(), requeue_tx, &config);

        let restart_delay = config.watch_restart_delay();
        controller
            .run(reconcile, handle_reconciliation_error, Arc::clone(&reconciler))
            .then(|result| async move {
                match result {
                    Ok((object, _)) => {
                        debug!(resource.name = %object.name, "watch.event.reconciled");
                        true
                    }
                    Err(controller::Error::ReconcilerFailed(e, object)) => {
                        debug!(resource.name = %object.name, error = %e, "watch.event.reconciliation_failed");
                        true
                    }
                    Err(e) => handle_watch_stream_error(&format!("{e:?}"), restart_delay).await,
                }
            })
            // Dropping the stream stops the controller so the outer loop can restart it
            .take_while(|keep_going| futures::future::ready(*keep_going))
            .for_each(|_| futures::future::ready(()))
            .await;

        secret_watch.abort();

        if !server_state.ready() {
            info!("Shutdown requested, exiting watch loop");
            break;
        }
        warn!(
            "Controller watch stream ended, restarting in {} seconds...",
            restart_delay.as_secs()
        );
        tokio::time::sleep(restart_delay).await;
    }

    for handle in workload_watches {
        handle.abort();
    }
    info!("Controller stopped gracefully");
    Ok(())
}
