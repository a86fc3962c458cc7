//! Static player assets

use std::path::Path;

use axum::handler::HandlerWithoutStateExt;
use axum::http::StatusCode;
use axum::Router;
use tower_http::services::ServeDir;

/// Serve `public_dir` for every route not matched on `router`
///
/// Directories resolve to their `index.html`. Missing files get a plain
/// 404 with body "Not Found".
pub(crate) fn with_public_dir(router: Router, public_dir: &Path) -> Router {
    let files = ServeDir::new(public_dir).not_found_service(not_found.into_service());
    router.fallback_service(files)
}

async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
