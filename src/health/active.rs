//! Active health checking.
//!
//! # Responsibilities
//! - Periodically probe the upstreams of the current route table
//! - Feed results back through each target's `mark_up` / `mark_down`
//!
//! # Design Decisions
//! - Reads the table on every round, so probing follows hot reloads
//! - An address shared by several routes is probed once per round
//! - `https` upstreams are skipped: the prober has no TLS connector

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use axum::body::Body;
use axum::http::{header, Request};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time;

use crate::config::ActiveHealthConfig;
use crate::load_balancer::{Scheme, UpstreamAddr, UpstreamTarget};
use crate::routing::RouteTable;

pub struct HealthMonitor {
    table: Arc<ArcSwap<RouteTable>>,
    config: ActiveHealthConfig,
    cooldown: Duration,
    client: Client<HttpConnector, Body>,
}

impl HealthMonitor {
    /// `cooldown` is how long a target that failed a probe stays out of rotation.
    pub fn new(table: Arc<ArcSwap<RouteTable>>, config: ActiveHealthConfig, cooldown: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            table,
            config,
            cooldown,
            client,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Active health checks disabled");
            return;
        }

        tracing::info!(
            interval = self.config.interval_secs,
            path = %self.config.path,
            "Health monitor starting"
        );

        let mut ticker = time::interval(Duration::from_secs(self.config.interval_secs));

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check_all().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Probe every distinct upstream once and apply the result.
    pub async fn check_all(&self) {
        let table = self.table.load_full();

        let mut targets: HashMap<UpstreamAddr, Vec<Arc<UpstreamTarget>>> = HashMap::new();
        for route in table.routes() {
            for target in route.upstreams() {
                targets.entry(target.addr().clone()).or_default().push(Arc::clone(target));
            }
        }

        let mut probes = JoinSet::new();
        for (addr, group) in targets {
            if addr.scheme == Scheme::Https {
                tracing::debug!(upstream = %addr, "Skipping probe of TLS upstream");
                continue;
            }
            let client = self.client.clone();
            let path = self.config.path.clone();
            let timeout = Duration::from_millis(self.config.timeout_ms);
            probes.spawn(async move {
                let healthy = probe(&client, &addr, &path, timeout).await;
                (addr, group, healthy)
            });
        }

        while let Some(joined) = probes.join_next().await {
            let Ok((addr, group, healthy)) = joined else {
                continue;
            };
            for target in group {
                let was_healthy = target.is_healthy();
                if healthy {
                    target.mark_up();
                } else {
                    target.mark_down(self.cooldown);
                }
                if was_healthy != healthy {
                    tracing::info!(upstream = %addr, healthy, "Upstream health changed by probe");
                }
            }
        }
    }
}

async fn probe(client: &Client<HttpConnector, Body>, addr: &UpstreamAddr, path: &str, timeout: Duration) -> bool {
    let uri = format!("{}{}", addr, path);
    let request = match Request::builder()
        .method("GET")
        .uri(uri)
        .header(header::USER_AGENT, "api-gateway-health-check")
        .body(Body::empty())
    {
        Ok(req) => req,
        Err(e) => {
            tracing::error!(upstream = %addr, error = %e, "Failed to build health check request");
            return false;
        }
    };

    match time::timeout(timeout, client.request(request)).await {
        Ok(Ok(response)) => {
            let success = response.status().is_success();
            if !success {
                tracing::warn!(upstream = %addr, status = %response.status(), "Health check failed: non-success status");
            }
            success
        }
        Ok(Err(e)) => {
            tracing::warn!(upstream = %addr, error = %e, "Health check failed: connection error");
            false
        }
        Err(_) => {
            tracing::warn!(upstream = %addr, "Health check failed: timeout");
            false
        }
    }
}
