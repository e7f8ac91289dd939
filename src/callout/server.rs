//! Callout server: wires the rule store, the shim and both transports

use super::grpc::ExternalCalloutServer;
use super::http::configure_routes;
use super::shim::CalloutShim;
use crate::config::Config;
use crate::error::{CalloutError, Result};
use crate::store::{build_source, RuleStore};
use actix_web::{middleware::Logger, web, App, HttpServer};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tonic::transport::Server;
use tracing::{error, info, warn};

/// The assembled callout service
pub struct CalloutServer {
    config: Config,
    shim: Arc<CalloutShim>,
}

impl CalloutServer {
    /// Build the rule source, the cache and the shim from configuration
    pub fn new(config: Config) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.rules.fetch_timeout_secs))
            .user_agent(format!("{}/{}", env!("CARGO_PKG_NAME"), crate::VERSION))
            .build()?;

        let source = build_source(&config.rules.source, http_client)?;
        let store = Arc::new(RuleStore::new(source, config.rules.cache_settings()));
        let shim = Arc::new(CalloutShim::new(store, config.callout.clone()));

        Ok(Self { config, shim })
    }

    pub fn shim(&self) -> &Arc<CalloutShim> {
        &self.shim
    }

    /// Load the rule table once before serving. A failure is logged, not
    /// fatal: requests deny until the source comes back.
    pub async fn warm_up(&self) {
        match self.shim.store().fetch().await {
            Ok(rules) => info!("Rule table ready: {} rules", rules.len()),
            Err(e) => warn!("Initial rule load failed, denying until the source recovers: {}", e),
        }
    }

    fn socket_addr(&self, port: u16) -> Result<SocketAddr> {
        format!("{}:{}", self.config.server.host, port)
            .parse()
            .map_err(|e| CalloutError::config(format!("Invalid listen address {}:{}: {}", self.config.server.host, port, e)))
    }

    /// Serve until ctrl-c
    pub async fn run(self) -> Result<()> {
        let server = &self.config.server;

        let grpc_task = if server.grpc_enabled {
            let grpc_addr = self.socket_addr(server.grpc_port)?;
            let service = ExternalCalloutServer::new(Arc::clone(&self.shim)).into_service();

            info!("Starting gRPC callout server on {}", grpc_addr);
            Some(tokio::spawn(async move {
                let result = Server::builder()
                    .add_service(service)
                    .serve_with_shutdown(grpc_addr, async {
                        let _ = tokio::signal::ctrl_c().await;
                    })
                    .await;
                if let Err(e) = &result {
                    error!("gRPC server failed: {}", e);
                }
                result
            }))
        } else {
            None
        };

        let http_server = if server.http_enabled {
            let http_addr = self.socket_addr(server.http_port)?;
            let shim_data = web::Data::new(Arc::clone(&self.shim));

            info!("Starting HTTP server on {}", http_addr);
            Some(
                HttpServer::new(move || {
                    App::new()
                        .app_data(shim_data.clone())
                        .wrap(Logger::default())
                        .configure(configure_routes)
                })
                .bind(http_addr)?
                .run(),
            )
        } else {
            None
        };

        // The gateway only talks gRPC: when that surface stops, HTTP stops with it
        match (http_server, grpc_task) {
            (Some(http), Some(mut grpc)) => {
                let http_handle = http.handle();
                tokio::select! {
                    result = http => {
                        result?;
                        grpc_outcome(grpc.await)?;
                    }
                    result = &mut grpc => {
                        http_handle.stop(true).await;
                        grpc_outcome(result)?;
                    }
                }
            }
            (Some(http), None) => http.await?,
            (None, Some(grpc)) => grpc_outcome(grpc.await)?,
            (None, None) => {}
        }

        info!("Callout servers stopped");
        Ok(())
    }
}

fn grpc_outcome(
    joined: std::result::Result<std::result::Result<(), tonic::transport::Error>, tokio::task::JoinError>,
) -> Result<()> {
    joined.map_err(|e| CalloutError::Internal(anyhow::anyhow!("gRPC server task failed: {}", e)))??;
    Ok(())
}
