use actix_web::dev::Server;
use actix_web::{middleware::Logger, web, App, HttpServer, Scope};
use std::net::TcpListener;
use std::sync::Arc;

use crate::configuration::{ClientSettings, JwtSettings, SecuritySettings};
use crate::logger::LoggerMiddleware;
use crate::middleware::JwtMiddleware;
use crate::routes::{
    check_email, check_phone, client_config, health_check, login, logout, profile, refresh,
    register,
};
use crate::store::AuthStore;

/// Auth endpoints, mounted once per path prefix
fn auth_scope(prefix: &str, jwt_config: &JwtSettings) -> Scope {
    web::scope(prefix)
        // Public routes
        .route("/register", web::post().to(register))
        .route("/login", web::post().to(login))
        .route("/refresh", web::post().to(refresh))
        .route("/client-config", web::get().to(client_config))
        .route("/check-phone", web::get().to(check_phone))
        .route("/check-email", web::get().to(check_email))
        // Protected routes (require JWT authentication)
        .service(
            web::resource("/logout")
                .wrap(JwtMiddleware::new(jwt_config.clone()))
                .route(web::post().to(logout)),
        )
        .service(
            web::resource("/profile")
                .wrap(JwtMiddleware::new(jwt_config.clone()))
                .route(web::get().to(profile)),
        )
}

pub fn run(
    listener: TcpListener,
    store: Arc<dyn AuthStore>,
    jwt_config: JwtSettings,
    client_settings: ClientSettings,
    security_settings: SecuritySettings,
) -> Result<Server, std::io::Error> {
    let store = web::Data::from(store);
    let jwt_config_data = web::Data::new(jwt_config.clone());
    let client_data = web::Data::new(client_settings);
    let security_data = web::Data::new(security_settings);

    let server = HttpServer::new(move || {
        App::new()
            // Global middleware
            .wrap(Logger::default())      // Standard logging
            .wrap(LoggerMiddleware)       // Custom logging

            // Shared state
            .app_data(store.clone())
            .app_data(jwt_config_data.clone())
            .app_data(client_data.clone())
            .app_data(security_data.clone())

            .route("/health_check", web::get().to(health_check))
            .service(auth_scope("/api/auth", &jwt_config))
            // Older clients post to /auth/* directly
            .service(auth_scope("/auth", &jwt_config))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
