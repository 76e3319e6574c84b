//! Content sources for [`HttpRequest::serve_url`](super::HttpRequest::serve_url).
use std::path::{Path, PathBuf};

use bytes::Bytes;
use futures::future::BoxFuture;
use url::Url;

use crate::{Error, Result};

/// A fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Content {
    pub status: u16,
    /// Content type reported by the source. When `None` it is derived from the URL.
    pub content_type: Option<String>,
    pub body: Bytes,
}

impl Content {
    /// A `200` response carrying `body`.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self {
            status: 200,
            content_type: None,
            body: body.into(),
        }
    }

    /// An empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: Bytes::new(),
        }
    }

    pub fn not_found() -> Self {
        Self::status(404)
    }

    pub fn with_content_type(self, content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
            ..self
        }
    }
}

/// Retrieves the resources served by [`HttpRequest::serve_url`](super::HttpRequest::serve_url).
///
/// Failures are expressed as a [`Content`] with an error status, which is what the client gets.
pub trait ContentSource: Send + Sync {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Content>;
}

/// Returns the MIME type for the extension of `url`, falling back to `text/plain`.
pub fn mime_type(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let extension = path
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.contains('/'));

    match extension.map(str::to_ascii_lowercase).as_deref() {
        Some("css") => "text/css",
        Some("html" | "htm") => "text/html",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("js") => "text/javascript",
        Some("png") => "image/png",
        Some("svg") => "image/svg+xml",
        _ => "text/plain",
    }
}

/// Serves files below a document root.
///
/// Request URLs are resolved against the root as relative references, so `..` segments are
/// normalized before the file is looked up. A URL that resolves outside of the root gets a `403`.
#[derive(Debug, Clone)]
pub struct FileSource {
    root: Url,
}

impl FileSource {
    /// Creates a source serving the files in `root`, which must be an absolute directory path.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        let root = Url::from_directory_path(root)
            .map_err(|_| Error::NotFound(root.display().to_string()))?;
        Ok(Self { root })
    }

    /// Maps a request URL to a path below the root.
    pub fn resolve(&self, url: &str) -> Result<PathBuf> {
        let resolved = self.root.join(url.trim_start_matches('/'))?;
        if resolved.scheme() != "file" || !resolved.path().starts_with(self.root.path()) {
            return Err(Error::NotFound(url.to_owned()));
        }

        let mut path = resolved
            .to_file_path()
            .map_err(|_| Error::NotFound(url.to_owned()))?;
        if resolved.path().ends_with('/') {
            path.push("index.html");
        }
        Ok(path)
    }
}

impl ContentSource for FileSource {
    fn fetch<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Content> {
        Box::pin(async move {
            let path = match self.resolve(url) {
                Ok(path) => path,
                Err(err) => {
                    log::warn!("Refusing {url}: {err}");
                    return Content::status(403);
                }
            };

            match tokio::fs::read(&path).await {
                Ok(body) => Content::ok(body),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Content::not_found(),
                Err(err) => {
                    log::error!("Error reading {}: {err}", path.display());
                    Content::status(500)
                }
            }
        })
    }
}
