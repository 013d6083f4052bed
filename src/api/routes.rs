// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .route("/", web::get().to(handlers::health_check))
        .route("/games/app", web::get().to(handlers::get_apps))
        .route("/games/sub", web::get().to(handlers::get_subs))
        .route("/games/rcv", web::get().to(handlers::get_rcv))
        .route("/games/ncv", web::get().to(handlers::get_ncv))
        .route("/games/sgids", web::get().to(handlers::get_sgids))
        .route("/user/{steam_id}/uh", web::get().to(handlers::get_user_history))
        .route("/info/timestamps", web::get().to(handlers::get_info));
}
