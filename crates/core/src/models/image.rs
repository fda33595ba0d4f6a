//! Image payloads handed out by the image cache

use std::sync::Arc;

/// Where a loaded image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageOrigin {
    Memory,
    Disk,
    Network,
    /// Index into the ordered backup template list
    Fallback(usize),
    Placeholder,
}

/// Raw image bytes plus their origin
#[derive(Debug, Clone)]
pub struct LoadedImage {
    pub bytes: Arc<[u8]>,
    pub origin: ImageOrigin,
}

impl LoadedImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>, origin: ImageOrigin) -> Self {
        Self {
            bytes: bytes.into(),
            origin,
        }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn is_placeholder(&self) -> bool {
        self.origin == ImageOrigin::Placeholder
    }
}
