// Copyright 2026 Open Nexus OS Contributors
// SPDX-License-Identifier: Apache-2.0

//! CONTEXT: Host file-backed flash image

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::{FlashDevice, FlashError, MemFlash, ERASED_BYTE};

/// Flash image kept in memory and written back to a host file on `sync()`.
pub struct FileFlash {
    path: PathBuf,
    inner: MemFlash,
}

impl FileFlash {
    /// Opens `path`, creating an erased image of `size` bytes when it does not exist.
    pub fn open(path: &Path, size: usize, erase_block_size: usize) -> io::Result<Self> {
        let image = match fs::read(path) {
            Ok(mut bytes) => {
                bytes.resize(size, ERASED_BYTE);
                bytes
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => vec![ERASED_BYTE; size],
            Err(err) => return Err(err),
        };
        Ok(Self { path: path.to_path_buf(), inner: MemFlash::from_image(image, erase_block_size) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl FlashDevice for FileFlash {
    fn size(&self) -> usize {
        self.inner.size()
    }

    fn erase_block_size(&self) -> usize {
        self.inner.erase_block_size()
    }

    fn read(&self, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        self.inner.read(offset, buf)
    }

    fn write(&mut self, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        self.inner.write(offset, data)
    }

    fn erase(&mut self, offset: usize, len: usize) -> Result<(), FlashError> {
        self.inner.erase(offset, len)
    }

    fn sync(&mut self) -> Result<(), FlashError> {
        fs::write(&self.path, self.inner.raw_storage()).map_err(|_| FlashError::IoError)
    }
}
