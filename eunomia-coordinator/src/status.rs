//! `GET /status` and `GET /locks`: the held-lock views.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use eunomia_store::{LockInfo, LockStore};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LockView {
    session: String,
    file: String,
    acquired_at: DateTime<Utc>,
}

impl From<LockInfo> for LockView {
    fn from(info: LockInfo) -> Self {
        LockView {
            session: info.session,
            file: info.file,
            acquired_at: info.acquired_at,
        }
    }
}

#[derive(Serialize)]
struct StatusResponse {
    locks: Vec<LockView>,
}

pub(crate) async fn get(store: web::Data<LockStore>) -> HttpResponse {
    let locks: Vec<LockView> = store.all_locks().await.into_iter().map(Into::into).collect();
    HttpResponse::Ok().json(StatusResponse { locks })
}

#[derive(Serialize)]
struct LocksResponse {
    count: usize,
    locks: Vec<LockView>,
}

pub(crate) async fn get_locks(store: web::Data<LockStore>) -> HttpResponse {
    let locks: Vec<LockView> = store.all_locks().await.into_iter().map(Into::into).collect();
    HttpResponse::Ok().json(LocksResponse {
        count: locks.len(),
        locks,
    })
}
