// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Image sources the chunk provider serves from

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use log::debug;
use parking_lot::Mutex;

/// Resolves a resource id to image bytes.
pub trait ImageSource: Send + Sync {
    fn read(&self, resource_id: &[u8]) -> Option<Vec<u8>>;
}

/// Images registered in memory, keyed by resource id.
#[derive(Default)]
pub struct MemoryImageSource {
    images: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
}

impl MemoryImageSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, resource_id: &[u8], image: Vec<u8>) {
        self.images.lock().insert(resource_id.to_vec(), image);
    }

    pub fn remove(&self, resource_id: &[u8]) -> Option<Vec<u8>> {
        self.images.lock().remove(resource_id)
    }
}

impl ImageSource for MemoryImageSource {
    fn read(&self, resource_id: &[u8]) -> Option<Vec<u8>> {
        self.images.lock().get(resource_id).cloned()
    }
}

/// Serves files from one directory. `file://name`, `#name` and `name` all map to
/// `<root>/name`; ids naming anything outside the directory are rejected.
pub struct DirImageSource {
    root: PathBuf,
}

impl DirImageSource {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    fn resolve(&self, resource_id: &[u8]) -> Option<PathBuf> {
        let uri = std::str::from_utf8(resource_id).ok()?;
        let name = uri.strip_prefix("file://").or_else(|| uri.strip_prefix('#')).unwrap_or(uri);
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." || name == "." {
            return None;
        }
        Some(self.root.join(name))
    }
}

impl ImageSource for DirImageSource {
    fn read(&self, resource_id: &[u8]) -> Option<Vec<u8>> {
        let path = self.resolve(resource_id)?;
        match fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                debug!("suit-stream: {} unavailable: {}", path.display(), err);
                None
            }
        }
    }
}
