use actix_web::HttpResponse;

#[derive(serde::Serialize)]
struct HealthResponse {
    ok: bool,
}

/// Endpoint used by clients to know if the server is working
#[tracing::instrument(name = "Health Check handler")]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(HealthResponse { ok: true })
}
