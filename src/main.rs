use actix_web::{web, App, HttpServer};
use log::{error, info};

use chess_sync::models::AppState;
use chess_sync::routes::configure_routes;
use chess_sync::ServerConfig;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()));
        }
    };
    let bind_addr = config.bind_addr.clone();
    info!("Starting chess sync server at ws://{}/ws", bind_addr);

    let app_state = web::Data::new(AppState::new(config));

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .configure(configure_routes)
    })
    .bind(bind_addr)?
    .run()
    .await
}
