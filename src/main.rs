//! rexpress demo server
//!
//! Answers `GET`, `POST`, `PUT` and `DELETE` on `/`:
//! - `GET` greets, using the `name` query parameter when given
//! - `POST` echoes the request body as JSON
//! - `PUT` replies with the parsed query parameters
//! - `DELETE` replies `204 No Content`

use rexpress::{App, Config};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        backlog = config.backlog,
        max_request_kb = config.max_request_size / 1024,
        read_timeout_ms = config.read_timeout.as_millis() as u64,
        "Starting rexpress server"
    );

    let mut app = App::new();
    app.get("/", |req, res| {
        let name = req.param("name").unwrap_or("world");
        res.status(200)?.send(format!("Hello {}!", name))?;
        Ok(())
    })
    .post("/", |req, res| {
        res.status(201)?.json(&json!({
            "received": req.body_text(),
            "length": req.body().len(),
        }))?;
        Ok(())
    })
    .put("/", |req, res| {
        res.json(req.params())?;
        Ok(())
    })
    .del("/", |_req, res| {
        res.send(204)?;
        Ok(())
    });

    app.listen_with(config.socket_config(), config.server_options(), |addr| {
        info!(addr = %addr, "Ready for connections");
    })?;
    app.block_while_running();

    Ok(())
}
