//! `POST /unlock` and `POST /unlock-all`.

use actix_web::{web, HttpResponse};
use eunomia_store::LockStore;
use serde::{Deserialize, Serialize};

#[derive(Deserialize)]
pub(crate) struct UnlockRequest {
    session: String,
    file: String,
}

#[derive(Serialize)]
struct UnlockResponse {
    ok: bool,
}

/// Release a single path. Only its current holder may do so; anyone else
/// gets `ok: false` and the queue is left untouched.
pub(crate) async fn post(
    store: web::Data<LockStore>,
    body: web::Json<UnlockRequest>,
) -> HttpResponse {
    let UnlockRequest { session, file } = body.into_inner();
    let ok = store.try_release(&file, &session).await;
    HttpResponse::Ok().json(UnlockResponse { ok })
}

#[derive(Deserialize)]
pub(crate) struct UnlockAllRequest {
    session: String,
}

#[derive(Serialize)]
struct UnlockAllResponse {
    count: usize,
}

/// Drop a session everywhere: locks it holds are released (and counted),
/// queues it waits in forget it.
pub(crate) async fn post_all(
    store: web::Data<LockStore>,
    body: web::Json<UnlockAllRequest>,
) -> HttpResponse {
    let count = store.release_all(&body.session).await;
    HttpResponse::Ok().json(UnlockAllResponse { count })
}
