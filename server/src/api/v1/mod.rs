mod imports;
mod uploads;

use axum::{
    routing::{delete, get, post},
    Router,
};

pub(crate) fn get_router() -> Router {
    Router::new()
        .route("/uploads/initialize", post(uploads::initialize))
        .route("/uploads/chunk", post(uploads::chunk))
        .route("/uploads/:id/complete", post(uploads::complete))
        .route("/uploads/:id/status", get(uploads::status))
        .route("/uploads/:id/resume", get(uploads::resume))
        .route("/uploads/:id/verify", get(uploads::verify))
        .route("/uploads/:id/cancel", delete(uploads::cancel))
        .route("/imports/products", post(imports::import_products))
        .route(
            "/imports/products/validate",
            post(imports::validate_products),
        )
        .route("/imports/products/columns", get(imports::product_columns))
        .route("/imports/history", get(imports::history))
        .route("/imports/statistics", get(imports::statistics))
        .route("/imports/:id", get(imports::detail))
}
