use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::Deref;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use memmap2::{Mmap, MmapOptions};

const MMAP_THRESHOLD: u64 = 64 * 1024 * 1024; // 64 MiB

/// Bytes of a local file about to be uploaded.
pub enum UploadBytes {
    Buffered(Vec<u8>),
    Mapped(Mmap),
}

impl Deref for UploadBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            UploadBytes::Buffered(bytes) => bytes,
            UploadBytes::Mapped(map) => map,
        }
    }
}

pub struct LocalFile {
    pub name: String,
    pub bytes: UploadBytes,
}

pub fn read_local_file(path: &Path) -> Result<LocalFile> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("{:?} has no usable file name", path))?
        .to_string();

    let file = File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let len = file.metadata()?.len();

    let bytes = if len >= MMAP_THRESHOLD {
        // Large uploads are mapped rather than copied. The file must not be
        // truncated while the upload is in flight.
        let map = unsafe { MmapOptions::new().map(&file)? };
        UploadBytes::Mapped(map)
    } else {
        let mut reader = BufReader::new(file);
        let mut buffer = Vec::with_capacity(len as usize);
        reader.read_to_end(&mut buffer)?;
        UploadBytes::Buffered(buffer)
    };

    Ok(LocalFile { name, bytes })
}
