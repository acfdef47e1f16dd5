#![warn(clippy::dbg_macro)]

//! HTTP surface of the eunomia lock coordinator.
//!
//! Eight JSON endpoints over a shared [`eunomia_store::LockStore`]. All
//! endpoints answer 200 on well-formed requests; semantic outcomes
//! (contention, timeouts, rejected releases) travel in the response body.

pub mod config;
pub mod error;

mod health;
mod lock;
mod queues;
mod status;
mod unlock;

use actix_web::web;

/// Register every coordinator route. Shared between `main` and the
/// integration tests, which compose the app in-process.
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health::get))
        .route("/lock", web::post().to(lock::post))
        .route("/unlock", web::post().to(unlock::post))
        .route("/unlock-all", web::post().to(unlock::post_all))
        .route("/status", web::get().to(status::get))
        .route("/locks", web::get().to(status::get_locks))
        .route("/queues", web::get().to(queues::get))
        .route("/queue/{path:.*}", web::get().to(queues::get_one));
}
