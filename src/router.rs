//! Verb-based request dispatch.
//!
//! Handlers are kept per verb in registration order. Only requests for the
//! root path `/` are dispatched; every handler registered for the request's
//! verb runs, in order, against the same request/response pair. Other paths
//! reach no handler.

use crate::http::{HttpVerb, Request, Response, VerbError};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Path that dispatch is performed for
pub const ROOT_PATH: &str = "/";

/// What a handler returns. Any error type can be propagated with `?`.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// A registered request handler.
pub type Handler = Arc<dyn Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync>;

/// Dispatch errors
#[derive(Debug)]
pub enum RouteError {
    /// The request method is not a routable verb
    Verb(VerbError),
    /// A handler returned an error; later handlers did not run
    Handler {
        verb: HttpVerb,
        index: usize,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteError::Verb(e) => write!(f, "{}", e),
            RouteError::Handler {
                verb,
                index,
                source,
            } => write!(f, "{} handler #{} failed: {}", verb, index, source),
        }
    }
}

impl std::error::Error for RouteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RouteError::Verb(e) => Some(e),
            RouteError::Handler { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<VerbError> for RouteError {
    fn from(e: VerbError) -> Self {
        RouteError::Verb(e)
    }
}

#[derive(Clone)]
struct Route {
    /// Recorded for diagnostics; not used for matching
    path: String,
    handler: Handler,
}

/// Verb → ordered handler table, plus mounted sub-routers.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<HttpVerb, Vec<Route>>,
    subrouters: HashMap<String, Router>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the list for `verb`.
    pub fn register<F>(&mut self, verb: HttpVerb, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.routes.entry(verb).or_default().push(Route {
            path: path.into(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn get<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(HttpVerb::Get, path, handler)
    }

    pub fn post<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(HttpVerb::Post, path, handler)
    }

    pub fn put<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(HttpVerb::Put, path, handler)
    }

    pub fn del<F>(&mut self, path: impl Into<String>, handler: F) -> &mut Self
    where
        F: Fn(&Request, &mut Response<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        self.register(HttpVerb::Delete, path, handler)
    }

    /// Mount `router` under `prefix`. Mounted routers are stored but not
    /// dispatched to.
    pub fn mount(&mut self, prefix: impl Into<String>, router: Router) -> &mut Self {
        self.subrouters.insert(prefix.into(), router);
        self
    }

    pub fn subrouter(&self, prefix: &str) -> Option<&Router> {
        self.subrouters.get(prefix)
    }

    /// Number of handlers registered for `verb`.
    pub fn handler_count(&self, verb: HttpVerb) -> usize {
        self.routes.get(&verb).map_or(0, Vec::len)
    }

    /// Paths handlers were registered with for `verb`, in order.
    pub fn paths(&self, verb: HttpVerb) -> impl Iterator<Item = &str> {
        self.routes
            .get(&verb)
            .into_iter()
            .flatten()
            .map(|route| route.path.as_str())
    }

    /// Run every handler for the request's verb when the path is `/`.
    ///
    /// Returns how many handlers ran. Handlers are not skipped when an
    /// earlier one already finalized the response; the first handler error
    /// stops the chain and is returned.
    pub fn run(&self, request: &Request, response: &mut Response<'_>) -> Result<usize, RouteError> {
        let verb = request.verb()?;

        if request.path() != ROOT_PATH {
            trace!(path = request.path(), "No route for path");
            return Ok(0);
        }

        let Some(routes) = self.routes.get(&verb) else {
            return Ok(0);
        };

        for (index, route) in routes.iter().enumerate() {
            trace!(%verb, index, registered = %route.path, "Running handler");
            (route.handler)(request, response).map_err(|source| RouteError::Handler {
                verb,
                index,
                source,
            })?;
        }

        Ok(routes.len())
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<HttpVerb, usize> = self
            .routes
            .iter()
            .map(|(verb, routes)| (*verb, routes.len()))
            .collect();
        f.debug_struct("Router")
            .field("handlers", &counts)
            .field("subrouters", &self.subrouters.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MemoryConnection, ResponseError};
    use std::sync::Mutex;

    fn request(raw: &str) -> Request {
        Request::from_slice(raw.as_bytes()).unwrap()
    }

    #[test]
    fn test_root_get_hello_world() {
        let mut router = Router::new();
        router.get("/", |_req, res| {
            res.status(200)?.send("Hello world!")?;
            Ok(())
        });

        let conn = MemoryConnection::new();
        let mut res = Response::new(conn.clone());
        let ran = router.run(&request("GET / HTTP/1.1\r\n\r\n"), &mut res).unwrap();

        assert_eq!(ran, 1);
        assert_eq!(res.status_code(), 200);
        assert!(res.headers_sent());
        assert_eq!(conn.transcript().body(), b"Hello world!");
    }

    #[test]
    fn test_handlers_run_in_registration_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut router = Router::new();
        for i in 0..3 {
            let order = Arc::clone(&order);
            router.post("/", move |_req, _res| {
                order.lock().unwrap().push(i);
                Ok(())
            });
        }

        let mut res = Response::new(MemoryConnection::new());
        let ran = router.run(&request("POST / HTTP/1.1\r\n\r\n"), &mut res).unwrap();

        assert_eq!(ran, 3);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_only_matching_verb_runs() {
        let mut router = Router::new();
        router.get("/", |_req, res| {
            res.send("get")?;
            Ok(())
        });
        router.del("/", |_req, res| {
            res.send("delete")?;
            Ok(())
        });

        let conn = MemoryConnection::new();
        let mut res = Response::new(conn.clone());
        router.run(&request("DELETE / HTTP/1.1\r\n\r\n"), &mut res).unwrap();
        assert_eq!(conn.transcript().body(), b"delete");
    }

    #[test]
    fn test_non_root_path_is_unrouted() {
        let mut router = Router::new();
        router.get("/users", |_req, res| {
            res.send("users")?;
            Ok(())
        });

        let conn = MemoryConnection::new();
        let mut res = Response::new(conn.clone());
        let ran = router.run(&request("GET /users HTTP/1.1\r\n\r\n"), &mut res).unwrap();

        assert_eq!(ran, 0);
        assert!(!res.headers_sent());
        assert!(conn.transcript().written().is_empty());
    }

    #[test]
    fn test_query_does_not_affect_root_match() {
        let mut router = Router::new();
        router.get("/", |req, res| {
            res.send(req.param("name").unwrap_or("nobody").to_string())?;
            Ok(())
        });

        let conn = MemoryConnection::new();
        let mut res = Response::new(conn.clone());
        router.run(&request("GET /?name=Ada HTTP/1.1\r\n\r\n"), &mut res).unwrap();
        assert_eq!(conn.transcript().body(), b"Ada");
    }

    #[test]
    fn test_unknown_verb_fails() {
        let router = Router::new();
        let mut res = Response::new(MemoryConnection::new());
        let err = router.run(&request("PATCH / HTTP/1.1\r\n\r\n"), &mut res).unwrap_err();
        assert!(matches!(err, RouteError::Verb(_)));
    }

    #[test]
    fn test_verb_without_handlers() {
        let router = Router::new();
        let mut res = Response::new(MemoryConnection::new());
        assert_eq!(router.run(&request("PUT / HTTP/1.1\r\n\r\n"), &mut res).unwrap(), 0);
    }

    #[test]
    fn test_second_sender_surfaces_already_sent() {
        let mut router = Router::new();
        router.get("/", |_req, res| {
            res.send("first")?;
            Ok(())
        });
        router.get("/", |_req, res| {
            res.send("second")?;
            Ok(())
        });

        let conn = MemoryConnection::new();
        let mut res = Response::new(conn.clone());
        let err = router.run(&request("GET / HTTP/1.1\r\n\r\n"), &mut res).unwrap_err();

        match err {
            RouteError::Handler { index, source, .. } => {
                assert_eq!(index, 1);
                let source = source.downcast_ref::<ResponseError>().unwrap();
                assert!(matches!(source, ResponseError::AlreadySent));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(conn.transcript().body(), b"first");
    }

    #[test]
    fn test_handler_after_send_still_runs() {
        let calls = Arc::new(Mutex::new(0));
        let mut router = Router::new();
        router.get("/", |_req, res| {
            res.send("done")?;
            Ok(())
        });
        let counter = Arc::clone(&calls);
        router.get("/", move |_req, res| {
            *counter.lock().unwrap() += 1;
            assert!(res.headers_sent());
            Ok(())
        });

        let mut res = Response::new(MemoryConnection::new());
        assert_eq!(router.run(&request("GET / HTTP/1.1\r\n\r\n"), &mut res).unwrap(), 2);
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_mount_stores_without_dispatch() {
        let mut api = Router::new();
        api.get("/", |_req, res| {
            res.send("api")?;
            Ok(())
        });

        let mut router = Router::new();
        router.mount("/api", api);
        assert_eq!(router.subrouter("/api").unwrap().handler_count(HttpVerb::Get), 1);
        assert!(router.subrouter("/other").is_none());

        let mut res = Response::new(MemoryConnection::new());
        assert_eq!(router.run(&request("GET /api HTTP/1.1\r\n\r\n"), &mut res).unwrap(), 0);
        assert_eq!(router.run(&request("GET / HTTP/1.1\r\n\r\n"), &mut res).unwrap(), 0);
    }

    #[test]
    fn test_registered_paths_recorded() {
        let mut router = Router::new();
        router
            .put("/a", |_req, _res| Ok(()))
            .put("/b", |_req, _res| Ok(()));
        assert_eq!(router.paths(HttpVerb::Put).collect::<Vec<_>>(), vec!["/a", "/b"]);
        assert_eq!(router.paths(HttpVerb::Get).count(), 0);
    }
}
