//! `GET /queues` and `GET /queue/{path}`: queue introspection.

use actix_web::{web, HttpResponse};
use chrono::{DateTime, Utc};
use eunomia_store::{LockStore, QueueInfo};
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueView {
    file: String,
    holder: String,
    acquired_at: DateTime<Utc>,
    queue_length: usize,
    waiters: Vec<String>,
}

impl From<QueueInfo> for QueueView {
    fn from(info: QueueInfo) -> Self {
        QueueView {
            file: info.file,
            holder: info.holder,
            acquired_at: info.acquired_at,
            queue_length: info.queue_length,
            waiters: info.waiters,
        }
    }
}

#[derive(Serialize)]
struct QueuesResponse {
    count: usize,
    queues: Vec<QueueView>,
}

pub(crate) async fn get(store: web::Data<LockStore>) -> HttpResponse {
    let queues: Vec<QueueView> = store.all_queues().await.into_iter().map(Into::into).collect();
    HttpResponse::Ok().json(QueuesResponse {
        count: queues.len(),
        queues,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueueStatus {
    file: String,
    holder: String,
    queue_length: usize,
    waiters: Vec<String>,
}

#[derive(Serialize)]
struct QueueMissing {
    exists: bool,
    file: String,
}

/// Look up one queue. The route captures everything after `/queue/`; the
/// leading slash of the original path is restored before the lookup, which
/// uses the resulting string verbatim.
pub(crate) async fn get_one(store: web::Data<LockStore>, path: web::Path<String>) -> HttpResponse {
    let file = format!("/{}", path.into_inner());
    match store.queue_info(&file).await {
        Some(info) => HttpResponse::Ok().json(QueueStatus {
            file: info.file,
            holder: info.holder,
            queue_length: info.queue_length,
            waiters: info.waiters,
        }),
        None => HttpResponse::Ok().json(QueueMissing {
            exists: false,
            file,
        }),
    }
}
