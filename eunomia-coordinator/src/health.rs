use actix_web::HttpResponse;
use serde::Serialize;

#[derive(Serialize)]
struct Health {
    ok: bool,
}

pub(crate) async fn get() -> HttpResponse {
    HttpResponse::Ok().json(Health { ok: true })
}
