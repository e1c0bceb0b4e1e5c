//! Static asset resolution for the single-page frontend.
//!
//! Any path that does not name a regular file under the root resolves to the
//! fallback document, so the frontend can own its client-side routes.

use std::{
    borrow::Cow,
    io,
    path::{Path, PathBuf},
};

/// Content type of the fallback document.
pub const FALLBACK_CONTENT_TYPE: &str = "text/html; charset=utf-8";

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("no asset at `{0}`")]
    NotFound(String),
    #[error("path `{0}` escapes the asset root")]
    Traversal(String),
    #[error("invalid fallback document `{0}`")]
    InvalidFallback(String),
    #[error("fallback document {} is unreadable: {source}", .path.display())]
    FallbackUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub body: Vec<u8>,
    pub content_type: &'static str,
    pub is_fallback: bool,
}

#[derive(Debug, Clone)]
pub struct StaticAssetRouter {
    root: PathBuf,
    fallback: PathBuf,
}

impl StaticAssetRouter {
    /// `fallback` is relative to `root` and may not leave it.
    pub fn new(root: impl Into<PathBuf>, fallback: &str) -> Result<Self, AssetError> {
        let fallback = match sanitize_path(fallback) {
            Ok(p) if !p.as_os_str().is_empty() => p,
            _ => return Err(AssetError::InvalidFallback(fallback.to_string())),
        };
        Ok(Self {
            root: root.into(),
            fallback,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `request_path` to a file under the root, or to the fallback document.
    ///
    /// Only fails when the fallback document itself cannot be read.
    pub async fn resolve(&self, request_path: &str) -> Result<Asset, AssetError> {
        match self.lookup(request_path).await {
            Ok(asset) => Ok(asset),
            Err(err) => {
                log::debug!("serving fallback document: {err}");
                self.fallback().await
            }
        }
    }

    async fn lookup(&self, request_path: &str) -> Result<Asset, AssetError> {
        let relative = sanitize_request_path(request_path)?;
        let not_found = || AssetError::NotFound(request_path.to_string());
        if relative.as_os_str().is_empty() {
            return Err(not_found());
        }

        // symlinks may still point outside the root
        let root = tokio::fs::canonicalize(&self.root).await.map_err(|_| not_found())?;
        let target = tokio::fs::canonicalize(root.join(&relative)).await.map_err(|_| not_found())?;
        if !target.starts_with(&root) {
            return Err(AssetError::Traversal(request_path.to_string()));
        }

        let meta = tokio::fs::metadata(&target).await.map_err(|_| not_found())?;
        if !meta.is_file() {
            return Err(not_found());
        }
        let body = tokio::fs::read(&target).await.map_err(|_| not_found())?;
        Ok(Asset {
            body,
            content_type: content_type_for(&target),
            is_fallback: false,
        })
    }

    async fn fallback(&self) -> Result<Asset, AssetError> {
        let path = self.root.join(&self.fallback);
        let unavailable = |source: io::Error| AssetError::FallbackUnavailable { path: path.clone(), source };

        // same containment rule as lookup
        let root = tokio::fs::canonicalize(&self.root).await.map_err(unavailable)?;
        let target = tokio::fs::canonicalize(&path).await.map_err(unavailable)?;
        if !target.starts_with(&root) {
            return Err(AssetError::Traversal(self.fallback.display().to_string()));
        }

        let body = tokio::fs::read(&target).await.map_err(unavailable)?;
        Ok(Asset {
            body,
            content_type: FALLBACK_CONTENT_TYPE,
            is_fallback: true,
        })
    }
}

/// Turn a configured path into a relative path below the root.
fn sanitize_path(path: &str) -> Result<PathBuf, AssetError> {
    push_segments(path, path.split('/').map(Cow::Borrowed))
}

/// Like [`sanitize_path`], but each segment is percent-decoded first, so
/// `%2e%2e` is caught as `..` and an encoded `/` never splits a segment.
fn sanitize_request_path(request_path: &str) -> Result<PathBuf, AssetError> {
    let mut segments = Vec::new();
    for raw in request_path.split('/') {
        let segment = urlencoding::decode(raw).map_err(|_| AssetError::NotFound(request_path.to_string()))?;
        if segment.contains('/') {
            return Err(AssetError::Traversal(request_path.to_string()));
        }
        segments.push(segment);
    }
    push_segments(request_path, segments)
}

/// `..` segments and backslashes are rejected outright; dot files are treated
/// as missing.
fn push_segments<'a>(original: &str, segments: impl IntoIterator<Item = Cow<'a, str>>) -> Result<PathBuf, AssetError> {
    let mut relative = PathBuf::new();
    for segment in segments {
        match segment.as_ref() {
            "" | "." => continue,
            ".." => return Err(AssetError::Traversal(original.to_string())),
            s if s.contains('\\') || s.contains(':') || s.contains('\0') => {
                return Err(AssetError::Traversal(original.to_string()));
            }
            s if s.starts_with('.') => return Err(AssetError::NotFound(original.to_string())),
            s => relative.push(s),
        }
    }
    Ok(relative)
}

pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_ascii_lowercase();
    match ext.as_str() {
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css; charset=utf-8",
        "js" | "mjs" => "text/javascript; charset=utf-8",
        "json" | "map" => "application/json",
        "webmanifest" => "application/manifest+json",
        "txt" => "text/plain; charset=utf-8",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "otf" => "font/otf",
        "wasm" => "application/wasm",
        "pdf" => "application/pdf",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}
