use std::time::Duration;

use actix_web::{web, App, HttpServer};
use url::Url;

use eunomia_coordinator::config::{self, DEFAULT_PORT};
use eunomia_coordinator::error::{IoErrorContext, Result, ServerError};
use eunomia_coordinator::routes;
use eunomia_store::LockStore;

async fn inner_main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let c = config::load()?;

    // The store starts its TTL sweeper here, on the main runtime, which
    // outlives every server worker.
    let store = web::Data::new(LockStore::new(c.ttl(), c.sweep_interval()));
    let store_handle = store.clone();

    // The bind address may be given as an `http://` URL (the historical
    // `--urls=` launch convention); anything else is taken as a socket
    // address verbatim.
    let try_url = Url::parse(&c.bind);
    let bind = match try_url.as_ref() {
        Ok(url) if url.scheme() == "http" => match url.host_str() {
            Some(host) => format!("{host}:{}", url.port().unwrap_or(DEFAULT_PORT)),
            None => {
                return Err(ServerError::Startup {
                    reason: "http listen urls must include a host".to_string(),
                }
                .into())
            }
        },
        _ => c.bind.clone(),
    };

    tracing::info!("listening on {bind}");
    let server = HttpServer::new(move || {
        App::new()
            .app_data(store.clone())
            .configure(routes)
    })
    // Give hook scripts on loaded machines more than the 5 s default to get
    // their request across; this bounds reading the request, not the long poll.
    .client_request_timeout(Duration::from_secs(30))
    .workers(c.workers)
    .max_connection_rate(c.max_connection_rate)
    .bind(&bind)
    .io_context("Failed to bind server")?;

    server.run().await.io_context("Failed to start server")?;

    // Server drained; stop the sweeper before the store goes away.
    store_handle.shutdown();
    Ok(())
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    inner_main().await.map_err(std::io::Error::other)
}
