//! Off-thread image decoding and the texture cache
//!
//! Sprites arrive inline as `data:` URLs inside asset sets; the world backdrop
//! is read from disk. Both are decoded on the runtime's blocking pool and
//! handed back to the frame loop, which turns them into GPU textures.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, error};
use macroquad::texture::{FilterMode, Image, Texture2D};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;

#[derive(Debug, Error)]
pub enum AssetError {
    #[error("invalid data URL: {0}")]
    InvalidDataUrl(String),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("image decode failed: {0}")]
    Decode(String),
}

/// Where an image comes from; also the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetSource {
    Inline(Arc<str>),
    File(PathBuf),
}

impl AssetSource {
    pub fn inline(reference: &str) -> Self {
        AssetSource::Inline(Arc::from(reference))
    }

    fn describe(&self) -> String {
        match self {
            AssetSource::Inline(data) => {
                let prefix: String = data.chars().take(32).collect();
                format!("inline image {}...", prefix)
            }
            AssetSource::File(path) => path.display().to_string(),
        }
    }
}

/// Extracts the payload of a `data:<mime>;base64,<payload>` URL. A bare base64
/// string without the `data:` prefix is accepted as well.
pub fn decode_data_url(reference: &str) -> Result<Vec<u8>, AssetError> {
    let payload = match reference.strip_prefix("data:") {
        Some(rest) => {
            let (meta, payload) = rest
                .split_once(',')
                .ok_or_else(|| AssetError::InvalidDataUrl("missing ',' separator".to_string()))?;
            if !meta.ends_with(";base64") {
                return Err(AssetError::InvalidDataUrl(format!(
                    "unsupported encoding '{}'",
                    meta
                )));
            }
            payload
        }
        None => reference,
    };

    Ok(STANDARD.decode(payload.trim())?)
}

pub fn decode_image(bytes: &[u8]) -> Result<Image, AssetError> {
    Image::from_file_with_format(bytes, None).map_err(|e| AssetError::Decode(e.to_string()))
}

fn load(source: &AssetSource) -> Result<Image, AssetError> {
    let bytes = match source {
        AssetSource::Inline(reference) => decode_data_url(reference)?,
        AssetSource::File(path) => std::fs::read(path).map_err(|source| AssetError::Io {
            path: path.clone(),
            source,
        })?,
    };
    decode_image(&bytes)
}

/// A finished decode travelling back to the frame loop.
#[derive(Debug)]
pub struct Decoded {
    pub source: AssetSource,
    pub result: Result<Image, AssetError>,
}

/// Dispatches decodes onto the runtime's blocking pool.
pub struct AssetLoader {
    runtime: Handle,
    decoded_tx: mpsc::UnboundedSender<Decoded>,
    decoded_rx: mpsc::UnboundedReceiver<Decoded>,
}

impl AssetLoader {
    pub fn new(runtime: Handle) -> Self {
        let (decoded_tx, decoded_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            decoded_tx,
            decoded_rx,
        }
    }

    pub fn dispatch(&self, source: AssetSource) {
        let decoded_tx = self.decoded_tx.clone();
        self.runtime.spawn_blocking(move || {
            let result = load(&source);
            // Receiver gone means the app is shutting down.
            let _ = decoded_tx.send(Decoded { source, result });
        });
    }

    pub fn try_next(&mut self) -> Option<Decoded> {
        self.decoded_rx.try_recv().ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssetStatus {
    Missing,
    Loading,
    Ready,
    Failed,
}

enum Slot {
    Loading,
    Ready(Texture2D),
    Failed,
}

/// Texture cache keyed by source. Each source is decoded at most once; a
/// source that failed stays failed.
pub struct AssetCache {
    loader: AssetLoader,
    slots: HashMap<AssetSource, Slot>,
}

impl AssetCache {
    pub fn new(loader: AssetLoader) -> Self {
        Self {
            loader,
            slots: HashMap::new(),
        }
    }

    /// Starts loading `source` unless it is already loading, loaded or failed.
    pub fn request(&mut self, source: &AssetSource) -> AssetStatus {
        match self.status(source) {
            AssetStatus::Missing => {
                debug!("Loading {}", source.describe());
                self.slots.insert(source.clone(), Slot::Loading);
                self.loader.dispatch(source.clone());
                AssetStatus::Loading
            }
            status => status,
        }
    }

    pub fn status(&self, source: &AssetSource) -> AssetStatus {
        match self.slots.get(source) {
            None => AssetStatus::Missing,
            Some(Slot::Loading) => AssetStatus::Loading,
            Some(Slot::Ready(_)) => AssetStatus::Ready,
            Some(Slot::Failed) => AssetStatus::Failed,
        }
    }

    pub fn texture(&self, source: &AssetSource) -> Option<&Texture2D> {
        match self.slots.get(source) {
            Some(Slot::Ready(texture)) => Some(texture),
            _ => None,
        }
    }

    /// Collects finished decodes and returns the sources that settled this
    /// call. Must run on the thread that owns the graphics context.
    pub fn poll(&mut self) -> Vec<AssetSource> {
        let mut settled = Vec::new();
        while let Some(Decoded { source, result }) = self.loader.try_next() {
            let slot = match result {
                Ok(image) => {
                    let texture = Texture2D::from_image(&image);
                    texture.set_filter(FilterMode::Nearest);
                    Slot::Ready(texture)
                }
                Err(e) => {
                    error!("Failed to load {}: {}", source.describe(), e);
                    Slot::Failed
                }
            };
            self.slots.insert(source.clone(), slot);
            settled.push(source);
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_decode_data_url_with_prefix() {
        let bytes = decode_data_url("data:image/png;base64,aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_bare_base64() {
        let bytes = decode_data_url("aGVsbG8=").unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn test_decode_data_url_rejects_bad_input() {
        assert!(matches!(
            decode_data_url("data:image/png;base64"),
            Err(AssetError::InvalidDataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:text/plain,hello"),
            Err(AssetError::InvalidDataUrl(_))
        ));
        assert!(matches!(
            decode_data_url("data:image/png;base64,@@@"),
            Err(AssetError::Base64(_))
        ));
    }

    #[test]
    fn test_decode_image_rejects_garbage() {
        assert!(matches!(
            decode_image(b"definitely not an image"),
            Err(AssetError::Decode(_))
        ));
    }

    #[test]
    fn test_inline_png_decodes() {
        let path = std::env::temp_dir().join("presence_client_asset_test.png");
        let path_str = path.to_string_lossy().to_string();
        Image::gen_image_color(3, 2, macroquad::color::RED).export_png(&path_str);
        let encoded = STANDARD.encode(std::fs::read(&path).unwrap());

        let image = load(&AssetSource::inline(&format!(
            "data:image/png;base64,{}",
            encoded
        )))
        .unwrap();
        assert_eq!((image.width, image.height), (3, 2));

        let _ = std::fs::remove_file(path);
    }

    #[tokio::test]
    async fn test_failed_source_is_not_retried() {
        let loader = AssetLoader::new(Handle::current());
        let mut cache = AssetCache::new(loader);
        let source = AssetSource::File(PathBuf::from("/nonexistent/backdrop.png"));

        assert_eq!(cache.request(&source), AssetStatus::Loading);
        assert_eq!(cache.request(&source), AssetStatus::Loading);

        let mut settled = Vec::new();
        for _ in 0..100 {
            settled = cache.poll();
            if !settled.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert_eq!(settled, vec![source.clone()]);
        assert_eq!(cache.status(&source), AssetStatus::Failed);
        assert_eq!(cache.request(&source), AssetStatus::Failed);
        assert!(cache.texture(&source).is_none());
    }
}
