pub mod authority;
pub mod handler;

use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;

use crate::models::AppState;
pub use handler::ChessWebSocket;

/// WebSocket upgrade endpoint
pub async fn ws_index(
    req: HttpRequest,
    stream: web::Payload,
    app_state: web::Data<AppState>,
) -> Result<HttpResponse, Error> {
    ws::start(ChessWebSocket::new(app_state), &req, stream)
}
