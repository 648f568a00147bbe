//! The local tree of built site files that gets uploaded into a content bucket.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetEntry {
    /// object key, always `/` separated and relative to the asset root
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub content_type: &'static str,
    pub checksum: u32,
}

#[derive(Debug, Clone)]
pub struct AssetManifest {
    pub root: PathBuf,
    /// sorted by key
    pub entries: Vec<AssetEntry>,
}

fn iter_files_recursively(dir: &Path, callback: &mut impl FnMut(PathBuf) -> Result<()>) -> Result<()> {
    let readdir = std::fs::read_dir(dir)
        .map_err(|e| Error::config(format!("Failed to read asset dir {}: {e}", dir.display())))?;
    for entry in readdir {
        let direntry = entry?;
        let path = direntry.path();
        let file_type = direntry.file_type()?;
        if file_type.is_dir() {
            iter_files_recursively(&path, callback)?;
        } else if file_type.is_symlink() && path.is_dir() {
            // linked directories are not followed, they can point back up the tree
            tracing::debug!(path = %path.display(), "skipping linked directory");
        } else {
            callback(path)?;
        }
    }
    Ok(())
}

pub fn content_type(path: &Path) -> &'static str {
    let ext = path.extension().map(|e| e.to_string_lossy().to_ascii_lowercase()).unwrap_or_default();
    match ext.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" | "map" => "application/json",
        "txt" => "text/plain",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "woff" => "font/woff",
        "woff2" => "font/woff2",
        "ttf" => "font/ttf",
        "pdf" => "application/pdf",
        "webmanifest" => "application/manifest+json",
        "wasm" => "application/wasm",
        _ => "application/octet-stream",
    }
}

impl AssetManifest {
    pub fn scan<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(Error::config(format!("Asset path {} is not a directory", root.display())));
        }
        let mut entries = vec![];
        iter_files_recursively(&root, &mut |path| {
            let relative = path.strip_prefix(&root)
                .map_err(|_| Error::config(format!("{} is outside of {}", path.display(), root.display())))?;
            let key = relative.components()
                .map(|c| c.as_os_str().to_string_lossy().to_string())
                .collect::<Vec<_>>()
                .join("/");
            let bytes = std::fs::read(&path)?;
            entries.push(AssetEntry {
                key,
                size: bytes.len() as u64,
                content_type: content_type(&path),
                checksum: adler::adler32_slice(&bytes),
                path,
            });
            Ok(())
        })?;
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        tracing::debug!(root = %root.display(), files = entries.len(), "scanned assets");
        Ok(Self { root, entries })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.binary_search_by(|e| e.key.as_str().cmp(key)).is_ok()
    }

    pub fn total_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }

    /// a checksum over every key and content checksum. Changes whenever any
    /// file is added, removed, renamed or edited.
    pub fn fingerprint(&self) -> String {
        let mut hasher = adler::Adler32::new();
        for entry in &self.entries {
            hasher.write_slice(entry.key.as_bytes());
            hasher.write_slice(&[0]);
            hasher.write_slice(&entry.checksum.to_be_bytes());
        }
        format!("{:08x}", hasher.checksum())
    }

    /// the distribution serves the default document for `/`, so a bundle
    /// without one would answer every root request with an error.
    pub fn require_default_document(&self, default_document: &str) -> Result<()> {
        if !self.contains(default_document) {
            return Err(Error::config(format!(
                "Asset path {} has no {default_document} at its root", self.root.display()
            )));
        }
        Ok(())
    }
}
