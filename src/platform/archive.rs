// src/platform/archive.rs

use super::ArchiveExtractor;
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::{self, File};
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Unpacks `.tar`, `.tar.gz` and `.tgz` archives
#[derive(Debug, Clone, Default)]
pub struct TarArchiveExtractor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArchiveKind {
    Tar,
    TarGz,
}

impl TarArchiveExtractor {
    pub fn new() -> Self {
        Self
    }

    fn detect(archive: &Path) -> Result<ArchiveKind> {
        let name = archive
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            return Ok(ArchiveKind::TarGz);
        }
        if name.ends_with(".tar") {
            return Ok(ArchiveKind::Tar);
        }

        // Fall back to gzip magic bytes
        let mut magic = [0u8; 2];
        let mut file = File::open(archive)?;
        if file.read_exact(&mut magic).is_ok() && magic == [0x1f, 0x8b] {
            return Ok(ArchiveKind::TarGz);
        }

        Err(Error::ValidationError(format!(
            "Unsupported archive format: {}",
            archive.display()
        )))
    }
}

impl ArchiveExtractor for TarArchiveExtractor {
    fn extract(&self, archive: &Path, dest: &Path) -> Result<()> {
        let kind = Self::detect(archive)?;
        debug!("Extracting {} ({:?}) to {}", archive.display(), kind, dest.display());

        fs::create_dir_all(dest)?;
        let file = File::open(archive).map_err(|e| {
            Error::IoError(format!("Failed to open archive {}: {}", archive.display(), e))
        })?;

        // tar::Archive::unpack refuses entries escaping `dest`
        let result = match kind {
            ArchiveKind::Tar => tar::Archive::new(file).unpack(dest),
            ArchiveKind::TarGz => tar::Archive::new(GzDecoder::new(file)).unpack(dest),
        };

        result.map_err(|e| {
            Error::IoError(format!(
                "Failed to extract {} to {}: {}",
                archive.display(),
                dest.display(),
                e
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempfile::TempDir;

    fn build_tar_gz(path: &Path) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);

        let content = b"#!/bin/sh\necho hi\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder
            .append_data(&mut header, "bin/tool", &content[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn test_extract_tar_gz() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("tool.tar.gz");
        build_tar_gz(&archive);

        let dest = temp_dir.path().join("out");
        TarArchiveExtractor::new().extract(&archive, &dest).unwrap();

        assert!(dest.join("bin/tool").exists());
    }

    #[test]
    fn test_gzip_detected_by_magic() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("tool.pkg");
        build_tar_gz(&archive);

        assert_eq!(TarArchiveExtractor::detect(&archive).unwrap(), ArchiveKind::TarGz);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("tool.bin");
        fs::write(&archive, b"not an archive").unwrap();

        let err = TarArchiveExtractor::new()
            .extract(&archive, &temp_dir.path().join("out"))
            .unwrap_err();
        assert!(matches!(err, Error::ValidationError(_)));
    }
}
