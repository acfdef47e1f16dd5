//! `POST /lock`: admission plus the long-poll wait for the head of the queue.

use std::time::{Duration, Instant};

use actix_web::{web, HttpResponse};
use eunomia_store::LockStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Hard ceiling on how long one long-poll request may block. Also the wait
/// applied when no `timeout` parameter is given.
const MAX_WAIT: Duration = Duration::from_secs(300);

/// Wait applied when the `timeout` parameter fails to parse.
const FALLBACK_WAIT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
pub(crate) struct LockRequest {
    session: String,
    file: String,
}

#[derive(Deserialize)]
pub(crate) struct LockQuery {
    wait: Option<bool>,
    timeout: Option<String>,
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct LockResponse {
    granted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    waited: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_length: Option<usize>,
}

pub(crate) async fn post(
    store: web::Data<LockStore>,
    body: web::Json<LockRequest>,
    query: web::Query<LockQuery>,
) -> HttpResponse {
    let LockRequest { session, file } = body.into_inner();
    let wait = query.wait.unwrap_or(true);
    let wait_timeout = query.timeout.as_deref().map_or(MAX_WAIT, parse_timeout);

    let admission = store.enqueue_or_acquire(&file, &session).await;
    if admission.acquired {
        return HttpResponse::Ok().json(LockResponse {
            granted: true,
            waited: Some(0.0),
            position: Some(1),
            queue_length: Some(admission.queue_length),
            ..Default::default()
        });
    }

    if !wait {
        return HttpResponse::Ok().json(LockResponse {
            granted: false,
            holder: store.holder(&file).await,
            error: Some(format!("Queued at position {}", admission.position)),
            position: Some(admission.position),
            queue_length: Some(admission.queue_length),
            ..Default::default()
        });
    }

    debug!(
        "session {session} waiting for {file} at position {} (timeout {wait_timeout:?})",
        admission.position
    );
    let started = Instant::now();
    let became_holder = tokio::time::timeout(wait_timeout, store.wait_for_turn(&file, &session))
        .await
        .unwrap_or(false);
    let waited = started.elapsed().as_secs_f64();

    if became_holder {
        let queue_length = store.queue_info(&file).await.map(|q| q.queue_length);
        return HttpResponse::Ok().json(LockResponse {
            granted: true,
            waited: Some(waited),
            position: Some(1),
            queue_length,
            ..Default::default()
        });
    }

    // Timed out. The session stays queued: clients retry or unlock-all, and
    // a stale head is the sweeper's business.
    let position = store.position(&file, &session).await;
    let queue_length = store.queue_info(&file).await.map(|q| q.queue_length);
    HttpResponse::Ok().json(LockResponse {
        granted: false,
        holder: store.holder(&file).await,
        error: Some(format!("Timeout waiting in queue at position {position}")),
        waited: Some(waited),
        position: Some(position),
        queue_length,
        ..Default::default()
    })
}

/// Parse the `timeout` query parameter: `<int>s` capped at 300 seconds, or
/// `<int>m` capped at 5 minutes. Anything else falls back to 60 seconds.
fn parse_timeout(raw: &str) -> Duration {
    let raw = raw.trim();
    let Some(unit) = raw.chars().last() else {
        return FALLBACK_WAIT;
    };
    let Ok(value) = raw[..raw.len() - unit.len_utf8()].parse::<u64>() else {
        return FALLBACK_WAIT;
    };
    match unit {
        's' => Duration::from_secs(value.min(300)),
        'm' => Duration::from_secs(value.min(5) * 60),
        _ => FALLBACK_WAIT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seconds_are_capped_at_five_minutes() {
        assert_eq!(parse_timeout("30s"), Duration::from_secs(30));
        assert_eq!(parse_timeout("300s"), Duration::from_secs(300));
        assert_eq!(parse_timeout("301s"), Duration::from_secs(300));
        assert_eq!(parse_timeout("9999s"), Duration::from_secs(300));
    }

    #[test]
    fn minutes_are_capped_at_five() {
        assert_eq!(parse_timeout("2m"), Duration::from_secs(120));
        assert_eq!(parse_timeout("5m"), Duration::from_secs(300));
        assert_eq!(parse_timeout("60m"), Duration::from_secs(300));
    }

    #[test]
    fn garbage_falls_back_to_a_minute() {
        for raw in ["", "s", "10", "10h", "-5s", "1.5m", "ms", "five s"] {
            assert_eq!(parse_timeout(raw), Duration::from_secs(60), "input {raw:?}");
        }
    }
}
