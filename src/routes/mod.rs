use actix_web::{web, HttpResponse, Responder};
use log::warn;
use serde_json::json;

use crate::models::AppState;
use crate::websocket::authority::Describe;

/// HTTP handler for the index page
pub async fn index() -> impl Responder {
    HttpResponse::Ok().body("Chess sync server")
}

/// Reports whether a session code is live
pub async fn session_info(path: web::Path<String>, app_state: web::Data<AppState>) -> HttpResponse {
    let code = path.into_inner();
    let authority = match app_state.directory.resolve(&code) {
        Ok(authority) => authority,
        Err(e) => return HttpResponse::NotFound().json(json!({ "error": e.to_string() })),
    };
    match authority.send(Describe).await {
        Ok(info) => HttpResponse::Ok().json(info),
        Err(e) => {
            // stopped between lookup and query
            warn!("Session {} did not answer: {}", code, e);
            HttpResponse::NotFound().json(json!({ "error": format!("session {} not found", code) }))
        }
    }
}

/// Configure the HTTP routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/ws").route(web::get().to(crate::websocket::ws_index)))
        .service(web::resource("/").route(web::get().to(index)))
        .service(web::resource("/sessions/{code}").route(web::get().to(session_info)));
}
