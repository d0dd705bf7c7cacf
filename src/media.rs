//! Image fetcher: downloads a product image to a scoped temp file, works out
//! a usable file extension, and hands the file to the media store.
//!
//! The temp file is owned by a `NamedTempFile`, so it is removed on every
//! exit path. All transport failures collapse into one `Transport` variant
//! with the underlying cause attached; "network unreachable" is not special.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use reqwest::{header, Client};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::time::Duration;
use tracing::debug;

use crate::catalog::{ImageId, MediaStore, ProductId, StoreError};
use crate::config::SyncConfig;

/// Media types the store accepts when the URL itself carries no extension.
/// Media types do not always end in a valid extension (see the .doc entry),
/// so anything outside this list is rejected.
const EXT_BY_MEDIA_TYPE: &[(&str, &str)] = &[
    ("text/plain", "txt"),
    ("text/csv", "csv"),
    ("application/msword", "doc"),
    ("image/jpg", "jpg"),
    ("image/jpeg", "jpeg"),
    ("image/gif", "gif"),
    ("image/png", "png"),
    ("video/mp4", "mp4"),
];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("image download failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("unsupported media type `{0}`")]
    UnsupportedMediaType(String),
    #[error("temp file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("media store rejected upload: {0}")]
    Store(#[from] StoreError),
}

/// Seam between the reconciler and the image pipeline.
#[async_trait::async_trait]
pub trait ImageUploader: Send + Sync {
    async fn upload(
        &self,
        url: &str,
        title: &str,
        owner: ProductId,
    ) -> Result<ImageId, UploadError>;
}

pub struct ImageFetcher {
    http: Client,
    media: Arc<dyn MediaStore>,
}

impl ImageFetcher {
    pub fn new(config: &SyncConfig, media: Arc<dyn MediaStore>) -> Result<Self, UploadError> {
        let http = Client::builder()
            .user_agent("feedsync/0.1")
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()?;
        Ok(Self { http, media })
    }
}

#[async_trait::async_trait]
impl ImageUploader for ImageFetcher {
    async fn upload(
        &self,
        url: &str,
        title: &str,
        owner: ProductId,
    ) -> Result<ImageId, UploadError> {
        let resp = self.http.get(url).send().await?.error_for_status()?;
        let media_type = resp
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or("").trim().to_ascii_lowercase());
        let bytes = resp.bytes().await?;

        // Scoped temp resource; Drop unlinks it on success and on every error.
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all(&bytes)?;
        tmp.flush()?;

        let (stem, url_ext) = filename_parts(url);
        let extension = match url_ext {
            Some(ext) => ext,
            None => sniff_extension(&bytes, media_type.as_deref())?,
        };
        let filename = format!("{stem}.{extension}");

        debug!(%owner, %filename, bytes = bytes.len(), "storing product image");
        let image_id = self.media.store(tmp.path(), &filename, title, owner).await?;
        Ok(image_id)
    }
}

/// Split a URL into a filename stem and optional extension
/// (`.../photo.png` → `("photo", Some("png"))`). Query strings and fragments
/// are ignored.
fn filename_parts(raw_url: &str) -> (String, Option<String>) {
    let path = match url::Url::parse(raw_url) {
        Ok(u) => u.path().to_string(),
        Err(_) => raw_url.split(['?', '#']).next().unwrap_or("").to_string(),
    };
    let last = path.rsplit('/').next().unwrap_or("");
    let p = Path::new(last);
    let stem = p
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
        .to_string();
    let ext = p
        .extension()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_ascii_lowercase());
    (stem, ext)
}

/// Probe the downloaded bytes for their media type and map it through the
/// allow-list. The transport header is only consulted for types that carry no
/// magic bytes (plain text, csv); when the bytes identify as a known type the
/// header is ignored entirely, even if it disagrees.
fn sniff_extension(bytes: &[u8], header_media_type: Option<&str>) -> Result<String, UploadError> {
    if let Some(kind) = infer::get(bytes) {
        return extension_for_media_type(kind.mime_type())
            .map(str::to_string)
            .ok_or_else(|| UploadError::UnsupportedMediaType(kind.mime_type().to_string()));
    }
    let mt = header_media_type.unwrap_or_default();
    extension_for_media_type(mt)
        .map(str::to_string)
        .ok_or_else(|| UploadError::UnsupportedMediaType(mt.to_string()))
}

fn extension_for_media_type(media_type: &str) -> Option<&'static str> {
    EXT_BY_MEDIA_TYPE
        .iter()
        .find(|(mt, _)| *mt == media_type)
        .map(|(_, ext)| *ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_parts_with_extension() {
        assert_eq!(
            filename_parts("https://cdn.example.com/img/photo.PNG"),
            ("photo".to_string(), Some("png".to_string()))
        );
    }

    #[test]
    fn filename_parts_ignores_query_string() {
        assert_eq!(
            filename_parts("https://cdn.example.com/photo.jpeg?w=640&h=480"),
            ("photo".to_string(), Some("jpeg".to_string()))
        );
    }

    #[test]
    fn filename_parts_without_extension() {
        assert_eq!(
            filename_parts("https://cdn.example.com/images/12345"),
            ("12345".to_string(), None)
        );
    }

    #[test]
    fn filename_parts_unparsable_url_falls_back() {
        let (stem, ext) = filename_parts("/relative/pic.gif");
        assert_eq!(stem, "pic");
        assert_eq!(ext.as_deref(), Some("gif"));
    }

    #[test]
    fn media_type_allow_list() {
        assert_eq!(extension_for_media_type("image/png"), Some("png"));
        assert_eq!(extension_for_media_type("application/msword"), Some("doc"));
        assert_eq!(extension_for_media_type("application/pdf"), None);
        assert_eq!(extension_for_media_type(""), None);
    }

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0, 0, 0, 0];

    #[test]
    fn sniffed_bytes_beat_wrong_header() {
        // a server mislabeling a png must not make the upload fail
        let ext = sniff_extension(PNG_MAGIC, Some("application/octet-stream")).unwrap();
        assert_eq!(ext, "png");
        let ext = sniff_extension(PNG_MAGIC, None).unwrap();
        assert_eq!(ext, "png");
    }

    #[test]
    fn header_fallback_for_magicless_text() {
        let ext = sniff_extension(b"sku,name\nA1,widget\n", Some("text/csv")).unwrap();
        assert_eq!(ext, "csv");
    }

    #[test]
    fn sniffed_unsupported_type_is_rejected() {
        // %PDF magic identifies regardless of what the header claims
        let err = sniff_extension(b"%PDF-1.4 garbage", Some("image/png")).unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedMediaType(mt) if mt == "application/pdf"));
    }

    #[test]
    fn unknown_bytes_without_header_are_rejected() {
        assert!(matches!(
            sniff_extension(b"no magic here", None),
            Err(UploadError::UnsupportedMediaType(_))
        ));
    }
}
