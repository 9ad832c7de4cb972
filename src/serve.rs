//! Local static server for the packed output with HTTP range support.
//!
//! The browser client reads `index.json` once and then fetches single
//! stations with `Range: bytes=start-end` requests against `stations.jsonl`.
//! This server answers those requests the way a static host would, so the
//! contract can be exercised locally.

use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use axum::{
    extract::{Extension, Path as UrlPath},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tracing::{debug, info, warn};

use crate::error::{PrepError, Result};

/// What a `Range` header asks for, resolved against a file length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// No usable range; send the whole file.
    Full,
    /// Inclusive start and end offsets.
    Partial(u64, u64),
    Unsatisfiable,
}

/// Resolve a single-range `bytes=` header. Malformed or multi-range headers
/// are ignored, as a static host would.
pub fn parse_range(header: &str, len: u64) -> ByteRange {
    let Some(spec) = header.trim().strip_prefix("bytes=") else {
        return ByteRange::Full;
    };
    if spec.contains(',') {
        return ByteRange::Full;
    }
    let Some((start, end)) = spec.split_once('-') else {
        return ByteRange::Full;
    };
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        // Suffix form: the last `end` bytes.
        return match end.parse::<u64>() {
            Ok(0) => ByteRange::Unsatisfiable,
            Ok(_) if len == 0 => ByteRange::Unsatisfiable,
            Ok(suffix) => ByteRange::Partial(len.saturating_sub(suffix), len - 1),
            Err(_) => ByteRange::Full,
        };
    }
    let Ok(start) = start.parse::<u64>() else {
        return ByteRange::Full;
    };
    let end = if end.is_empty() {
        len.saturating_sub(1)
    } else {
        match end.parse::<u64>() {
            Ok(end) if end < start => return ByteRange::Full,
            Ok(end) => end.min(len.saturating_sub(1)),
            Err(_) => return ByteRange::Full,
        }
    };
    if start >= len {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial(start, end)
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") | Some("jsonl") => "application/json",
        Some("geojson") => "application/geo+json",
        _ => "application/octet-stream",
    }
}

/// Map a request path onto a file under `root`, refusing anything that
/// would escape it.
pub fn resolve(root: &Path, request: &str) -> Option<PathBuf> {
    let relative = Path::new(request.trim_start_matches('/'));
    if relative.as_os_str().is_empty() {
        return None;
    }
    if !relative.components().all(|c| matches!(c, Component::Normal(_))) {
        return None;
    }
    Some(root.join(relative))
}

/// Build the response for `body` under an optional `Range` header.
pub fn range_response(body: Vec<u8>, range: Option<&str>, mime: &'static str) -> Response {
    let len = body.len() as u64;
    let common = [
        (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*".to_string()),
        (
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            "Content-Range, Content-Length".to_string(),
        ),
        (header::ACCEPT_RANGES, "bytes".to_string()),
        (header::CONTENT_TYPE, mime.to_string()),
    ];
    match range.map(|r| parse_range(r, len)).unwrap_or(ByteRange::Full) {
        ByteRange::Full => (StatusCode::OK, common, body).into_response(),
        ByteRange::Partial(start, end) => {
            let content_range: [(HeaderName, String); 1] =
                [(header::CONTENT_RANGE, format!("bytes {start}-{end}/{len}"))];
            let slice = body[start as usize..=end as usize].to_vec();
            (StatusCode::PARTIAL_CONTENT, common, content_range, slice).into_response()
        }
        ByteRange::Unsatisfiable => {
            let content_range: [(HeaderName, String); 1] =
                [(header::CONTENT_RANGE, format!("bytes */{len}"))];
            (StatusCode::RANGE_NOT_SATISFIABLE, common, content_range, ()).into_response()
        }
    }
}

async fn serve_file(
    Extension(root): Extension<Arc<PathBuf>>,
    UrlPath(request): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    let Some(path) = resolve(&root, &request) else {
        return StatusCode::FORBIDDEN.into_response();
    };
    let body = match tokio::fs::read(&path).await {
        Ok(body) => body,
        Err(e) => {
            debug!("{}: {}", path.display(), e);
            return StatusCode::NOT_FOUND.into_response();
        }
    };
    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    debug!("GET {} range={:?}", request, range);
    range_response(body, range, content_type(&path))
}

pub fn router(root: PathBuf) -> Router {
    Router::new()
        .route("/*path", get(serve_file))
        .layer(Extension(Arc::new(root)))
}

/// Serve `root` on `addr` until the process is stopped.
pub async fn serve(root: PathBuf, addr: SocketAddr) -> Result<()> {
    if !root.is_dir() {
        warn!("{} is not a directory", root.display());
    }
    info!("Serving {} on http://{}", root.display(), addr);
    axum::Server::bind(&addr)
        .serve(router(root).into_make_service())
        .await
        .map_err(|e| PrepError::Server {
            message: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_range_forms() {
        assert_eq!(parse_range("bytes=0-127", 640), ByteRange::Partial(0, 127));
        assert_eq!(parse_range("bytes=256-", 640), ByteRange::Partial(256, 639));
        assert_eq!(parse_range("bytes=-128", 640), ByteRange::Partial(512, 639));
        assert_eq!(parse_range("bytes=600-9999", 640), ByteRange::Partial(600, 639));
        assert_eq!(parse_range("bytes=640-700", 640), ByteRange::Unsatisfiable);
        assert_eq!(parse_range("bytes=10-5", 640), ByteRange::Full);
        assert_eq!(parse_range("bytes=0-1,4-5", 640), ByteRange::Full);
        assert_eq!(parse_range("items=0-1", 640), ByteRange::Full);
    }

    #[test]
    fn refuses_paths_outside_root() {
        let root = Path::new("/srv/public");
        assert_eq!(
            resolve(root, "/stations.jsonl"),
            Some(PathBuf::from("/srv/public/stations.jsonl"))
        );
        assert_eq!(resolve(root, "/../secret"), None);
        assert_eq!(resolve(root, "/"), None);
    }

    #[test]
    fn partial_response_carries_content_range() {
        let body = b"0123456789".to_vec();
        let response = range_response(body.clone(), Some("bytes=2-5"), "application/json");
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes 2-5/10");
        assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let response = range_response(body.clone(), None, "application/json");
        assert_eq!(response.status(), StatusCode::OK);

        let response = range_response(body, Some("bytes=20-"), "application/json");
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[header::CONTENT_RANGE], "bytes */10");
    }
}
