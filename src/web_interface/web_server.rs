use std::future::Future;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinHandle;

use super::routes::{api_routes, RouteContext};
use crate::authority::lease_manager::AuthorityManager;
use crate::configuration::types::ServerConfig;
use crate::error_handling::types::WebError;

/// HTTP front of the authority.
pub struct WebServer {
    context: RouteContext,
    address: SocketAddr,
}

/// A server accepting connections in the background.
pub struct RunningServer {
    pub local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

impl RunningServer {
    /// Resolves once the server has shut down.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            error!("Web server task failed: {}", e);
        }
    }
}

impl WebServer {
    pub fn new(manager: Arc<AuthorityManager>, config: &ServerConfig) -> Result<Self, WebError> {
        let address = (config.bind_address.as_str(), config.port)
            .to_socket_addrs()
            .map_err(|e| {
                error!("Invalid bind address {}:{}: {}", config.bind_address, config.port, e);
                WebError::BindFailed(e.to_string())
            })?
            .next()
            .ok_or_else(|| WebError::BindFailed(format!("{} did not resolve", config.bind_address)))?;

        Ok(Self {
            context: RouteContext {
                manager,
                public_url: config.public_url.clone(),
            },
            address,
        })
    }

    /// Binds and starts serving until `shutdown` resolves.
    pub fn spawn<F>(&self, shutdown: F) -> Result<RunningServer, WebError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let routes = api_routes(self.context.clone());
        let (local_addr, server) = warp::serve(routes)
            .try_bind_with_graceful_shutdown(self.address, shutdown)
            .map_err(|e| {
                error!("Unable to bind web server on {}: {}", self.address, e);
                WebError::BindFailed(e.to_string())
            })?;

        info!("Web server listening on http://{}", local_addr);
        Ok(RunningServer {
            local_addr,
            handle: tokio::spawn(server),
        })
    }

    /// Serves until `shutdown` resolves.
    pub async fn start<F>(&self, shutdown: F) -> Result<(), WebError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.spawn(shutdown)?.wait().await;
        info!("Web server stopped");
        Ok(())
    }
}
