//! Application façade: a router plus the server that runs it.

use crate::http::{Request, Response};
use crate::net::SocketConfig;
use crate::router::{HandlerResult, Router};
use crate::server::{Server, ServerError, ServerOptions};
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::info;

const IDLE_CHECK_INTERVAL: Duration = Duration::from_millis(100);

/// Collects handlers, then listens.
///
/// ```no_run
/// use rexpress::App;
///
/// let mut app = App::new();
/// app.get("/", |_req, res| {
///     res.status(200)?.send("Hello world!")?;
///     Ok(())
/// });
/// app.listen(3000, |addr| println!("listening on {}", addr))?;
/// app.block_while_running();
/// # Ok::<(), rexpress::ServerError>(())
/// ```
#[derive(Debug, Default)]
pub struct App {
    router: Router,
    server: Option<Server>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn get<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.get(path, handler);
        self
    }

    pub fn post<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.post(path, handler);
        self
    }

    pub fn put<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.put(path, handler);
        self
    }

    pub fn del<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.router.del(path, handler);
        self
    }

    pub fn mount(&mut self, prefix: impl Into<String>, router: Router) -> &mut Self {
        self.router.mount(prefix, router);
        self
    }

    /// Listen on `port` on all interfaces with default options.
    pub fn listen<F>(&mut self, port: u16, on_ready: F) -> Result<(), ServerError>
    where
        F: FnOnce(SocketAddr),
    {
        self.listen_with(SocketConfig::new(port), ServerOptions::default(), on_ready)
    }

    /// Bind, start the accept loop and call `on_ready` with the bound
    /// address. Returns without blocking. Handlers registered afterwards are
    /// not seen by the running server.
    ///
    /// Listening again replaces the previous server, stopping it first.
    pub fn listen_with<F>(
        &mut self,
        config: SocketConfig,
        options: ServerOptions,
        on_ready: F,
    ) -> Result<(), ServerError>
    where
        F: FnOnce(SocketAddr),
    {
        self.shutdown();

        let mut server = Server::bind(config, self.router.clone(), options)?;
        server.launch()?;
        let addr = server.local_addr()?;
        self.server = Some(server);

        info!(addr = %addr, "Listening");
        on_ready(addr);
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref()?.local_addr().ok()
    }

    pub fn is_running(&self) -> bool {
        self.server.as_ref().is_some_and(Server::is_running)
    }

    /// Park the calling thread until the accept loop exits.
    pub fn block_while_running(&self) {
        while self.is_running() {
            thread::sleep(IDLE_CHECK_INTERVAL);
        }
    }

    /// Stop the server, if any. The handlers stay registered.
    pub fn shutdown(&mut self) {
        if let Some(mut server) = self.server.take() {
            server.stop();
        }
    }
}
