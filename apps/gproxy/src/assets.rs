use axum::extract::Path;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use rust_embed::RustEmbed;

/// The stub page and the Client Agent script it loads; embedded into the
/// binary so a deployed proxy ships as a single executable with no assets
/// directory to keep alongside it.
#[derive(RustEmbed)]
#[folder = "assets"]
struct BridgeAssets;

pub async fn agent_page() -> Response {
    serve("agent.html")
}

pub async fn agent_asset(Path(path): Path<String>) -> Response {
    serve(&path)
}

fn serve(path: &str) -> Response {
    match BridgeAssets::get(path) {
        Some(content) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let mut response = Response::new(axum::body::Body::from(content.data));
            response.headers_mut().insert(
                axum::http::header::CONTENT_TYPE,
                HeaderValue::from_str(mime.as_ref())
                    .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
            );
            response
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}
