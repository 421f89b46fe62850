// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

use anyhow::Result;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use dynakube_operator::{
    config::OperatorConfig,
    context::Context,
    crd::DynaKube,
    dtclient::http::HttpClientFactory,
    kubeclient::KubeApiClient,
    metrics::Metrics,
    reconcilers::{error_policy, reconcile_dynakube},
    selector::find_dynakubes_for_namespace,
};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{DaemonSet, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use kube::{
    runtime::{watcher::Config, Controller},
    Api, Client,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .thread_name("dynakube-controller")
        .enable_all()
        .build()?;

    runtime.block_on(async_main())
}

async fn async_main() -> Result<()> {
    // Format: timestamp file:line LEVEL message
    //
    // Respects RUST_LOG (default INFO) and RUST_LOG_FORMAT=json|text
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let log_format = std::env::var("RUST_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    match log_format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .json()
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_file(true)
                .with_line_number(true)
                .with_thread_names(true)
                .with_target(false)
                .with_ansi(true)
                .compact()
                .init();
        }
    }

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }

    let config = OperatorConfig::load();
    info!(
        pod_namespace = %config.pod_namespace,
        watch_namespace = %config.watch_namespace(),
        "Starting DynaKube controller"
    );

    debug!("Initializing Kubernetes client");
    let client = Client::try_default().await?;

    let cancel = CancellationToken::new();
    let metrics = Metrics::new()?;
    let ctx = Arc::new(Context::new(
        Arc::new(KubeApiClient::new(client.clone(), cancel.clone())),
        Arc::new(HttpClientFactory::new(cancel.clone())),
        config.clone(),
        metrics.clone(),
        cancel.clone(),
    ));

    tokio::spawn(cancel_on_signal(cancel.clone()));

    let controller = run_dynakube_controller(client, config.clone(), ctx);
    tokio::pin!(controller);

    tokio::select! {
        result = run_metrics_server(metrics, config.metrics_port, cancel.clone()) => {
            after_metrics_server_exit(result, &cancel, controller).await
        }
        () = &mut controller => {
            info!("DynaKube controller stopped");
            cancel.cancel();
            Ok(())
        }
    }
}

/// Decide the process result once the metrics server returned.
///
/// After cancellation a clean return is part of shutdown, and the controller is
/// awaited so it can drain. Anything else is fatal and cancels the controller.
async fn after_metrics_server_exit<F>(
    result: Result<()>,
    cancel: &CancellationToken,
    controller: F,
) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    match result {
        Ok(()) if cancel.is_cancelled() => {
            info!("Metrics server stopped, waiting for the controller to drain");
            controller.await;
            Ok(())
        }
        Ok(()) => {
            error!("CRITICAL: metrics server exited unexpectedly");
            cancel.cancel();
            anyhow::bail!("metrics server exited unexpectedly without error")
        }
        Err(e) => {
            error!("CRITICAL: metrics server failed: {e:?}");
            cancel.cancel();
            Err(e)
        }
    }
}

/// Run the `DynaKube` controller until shutdown.
async fn run_dynakube_controller(client: Client, config: OperatorConfig, ctx: Arc<Context>) {
    let namespace = config.watch_namespace().to_string();
    info!(namespace = %namespace, "Starting DynaKube controller loop");

    let dynakubes = Api::<DynaKube>::namespaced(client.clone(), &namespace);
    let controller = Controller::new(dynakubes, Config::default());
    let store = controller.store();
    let operator_namespace = config.pod_namespace.clone();

    controller
        .owns::<StatefulSet>(Api::namespaced(client.clone(), &namespace), Config::default())
        .owns::<DaemonSet>(Api::namespaced(client.clone(), &namespace), Config::default())
        .owns::<Service>(Api::namespaced(client.clone(), &namespace), Config::default())
        .owns::<Secret>(Api::namespaced(client.clone(), &namespace), Config::default())
        .owns::<ConfigMap>(Api::namespaced(client.clone(), &namespace), Config::default())
        .watches(
            Api::<Namespace>::all(client),
            Config::default(),
            move |ns: Namespace| find_dynakubes_for_namespace(&store, &ns, &operator_namespace),
        )
        .shutdown_on_signal()
        .run(reconcile_dynakube, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!(name = %obj.name, "Reconciled DynaKube"),
                Err(e) => warn!(error = %e, "DynaKube reconcile failed"),
            }
        })
        .await;
}

/// Serve `/metrics`, `/healthz` and `/readyz` until `cancel` fires.
async fn run_metrics_server(metrics: Metrics, port: u16, cancel: CancellationToken) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(|| async { "ok" }))
        .with_state(metrics);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Metrics server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;
    Ok(())
}

async fn metrics_handler(State(metrics): State<Metrics>) -> Result<String, StatusCode> {
    metrics.gather().map_err(|e| {
        error!(error = %e, "Failed to encode metrics");
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Fire the cancellation token on SIGTERM or Ctrl-C so in-flight calls abort.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = ctrl_c.await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
    info!("Shutdown signal received, cancelling in-flight work");
    cancel.cancel();
}
