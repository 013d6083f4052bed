// HTTP request handlers for API endpoints

use crate::api::models::*;
use crate::database_ops::lookup::LookupService;
use actix_web::{web, HttpResponse, Result};

/// Health check endpoint; the store is checked through the ledger read.
pub async fn health_check(lookup: web::Data<LookupService>) -> Result<HttpResponse> {
    let database = match lookup.info().await {
        Ok(_) => "connected",
        Err(e) => {
            tracing::warn!(error = %e, "health check store read failed");
            "disconnected"
        }
    };
    Ok(HttpResponse::Ok().json(ApiResponse::success(HealthResponse {
        status: "healthy".to_string(),
        database: database.to_string(),
    })))
}

fn bad_request(message: String) -> HttpResponse {
    HttpResponse::BadRequest().json(ApiResponse::<()>::error(message))
}

fn store_failure(e: impl std::fmt::Display) -> HttpResponse {
    tracing::error!(error = %e, "lookup failed");
    HttpResponse::InternalServerError().json(ApiResponse::<()>::error("store unavailable"))
}

pub async fn get_apps(
    query: web::Query<IdsQuery>,
    lookup: web::Data<LookupService>,
) -> Result<HttpResponse> {
    let ids = match query.parse() {
        Ok(ids) => ids,
        Err(message) => return Ok(bad_request(message)),
    };
    tracing::debug!(count = ids.len(), "app lookup");
    Ok(match lookup.apps(&ids).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::success(result)),
        Err(e) => store_failure(e),
    })
}

pub async fn get_subs(
    query: web::Query<IdsQuery>,
    lookup: web::Data<LookupService>,
) -> Result<HttpResponse> {
    let ids = match query.parse() {
        Ok(ids) => ids,
        Err(message) => return Ok(bad_request(message)),
    };
    tracing::debug!(count = ids.len(), "sub lookup");
    Ok(match lookup.subs(&ids).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::success(result)),
        Err(e) => store_failure(e),
    })
}

pub async fn get_rcv(
    query: web::Query<TimelineParams>,
    lookup: web::Data<LookupService>,
) -> Result<HttpResponse> {
    let query = match query.parse() {
        Ok(query) => query,
        Err(message) => return Ok(bad_request(message)),
    };
    Ok(match lookup.rcv(&query).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::success(result)),
        Err(e) => store_failure(e),
    })
}

pub async fn get_ncv(
    query: web::Query<TimelineParams>,
    lookup: web::Data<LookupService>,
) -> Result<HttpResponse> {
    let query = match query.parse() {
        Ok(query) => query,
        Err(message) => return Ok(bad_request(message)),
    };
    Ok(match lookup.ncv(&query).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::success(result)),
        Err(e) => store_failure(e),
    })
}

pub async fn get_sgids(
    query: web::Query<GiftIdParams>,
    lookup: web::Data<LookupService>,
) -> Result<HttpResponse> {
    let (apps, subs) = match query.parse() {
        Ok(ids) => ids,
        Err(message) => return Ok(bad_request(message)),
    };
    Ok(match lookup.sgids(&apps, &subs).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::success(result)),
        Err(e) => store_failure(e),
    })
}

pub async fn get_user_history(
    path: web::Path<String>,
    lookup: web::Data<LookupService>,
) -> Result<HttpResponse> {
    let steam_id = match parse_steam_id(&path) {
        Ok(id) => id,
        Err(message) => return Ok(bad_request(message)),
    };
    Ok(match lookup.user_history(&steam_id).await {
        Ok(result) => HttpResponse::Ok().json(ApiResponse::success(result)),
        Err(e) => store_failure(e),
    })
}

pub async fn get_info(lookup: web::Data<LookupService>) -> Result<HttpResponse> {
    Ok(match lookup.info().await {
        Ok(info) => HttpResponse::Ok().json(ApiResponse::success(info)),
        Err(e) => store_failure(e),
    })
}
