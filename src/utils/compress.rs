use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use walkdir::WalkDir;
use zip::{write::FileOptions, ZipWriter};

use crate::constants::{
    COMPRESSED_EXTENSIONS, COMPRESSION_CHUNK_SIZE as CHUNK_SIZE, LARGE_FILE_COMPRESSION_THRESHOLD,
};
use crate::utils::hash::calculate_sha256;

/// Result of packaging a finished run directory
#[derive(Debug, Clone)]
pub struct EvidencePackage {
    pub path: PathBuf,
    pub sha256: String,
    pub file_count: usize,
}

/// Pick the deflate level for one file.
///
/// Already-compressed formats and very large files get the fastest level.
pub fn get_compression_options(path: &Path, size: u64) -> FileOptions {
    let low_compression = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|ext| COMPRESSED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false);
    let level = if low_compression || size > LARGE_FILE_COMPRESSION_THRESHOLD { 1 } else { 6 };

    FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .compression_level(Some(level))
        .large_file(size >= u32::MAX as u64)
        .unix_permissions(0o644)
}

/// Archive path for a run directory: `<dir>.zip` next to it
pub fn package_path(run_dir: &Path) -> Result<PathBuf> {
    let name = run_dir
        .file_name()
        .context(format!("{} has no directory name", run_dir.display()))?;
    let mut file_name = name.to_os_string();
    file_name.push(".zip");
    Ok(run_dir.with_file_name(file_name))
}

/// Zip the finished run directory into `<dir>.zip` and hash the archive.
///
/// Entries are added in sorted path order with `/` separators. The run
/// directory itself is left untouched.
pub fn package_run_directory(run_dir: &Path) -> Result<EvidencePackage> {
    let start = Instant::now();
    if !run_dir.is_dir() {
        bail!("{} is not a directory", run_dir.display());
    }

    let zip_path = package_path(run_dir)?;
    info!("Packaging {} into {}", run_dir.display(), zip_path.display());

    let zip_file = fs::File::create(&zip_path)
        .context(format!("Failed to create zip file: {}", zip_path.display()))?;
    let mut zip = ZipWriter::new(zip_file);
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut file_count = 0;

    for entry in WalkDir::new(run_dir).sort_by_file_name() {
        let entry = entry.context("Failed to walk run directory")?;
        let relative = entry.path().strip_prefix(run_dir).unwrap_or(entry.path());
        if relative.as_os_str().is_empty() {
            continue;
        }
        let rel_name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", rel_name), FileOptions::default())
                .context(format!("Failed to add directory {}", rel_name))?;
            continue;
        }
        if !entry.file_type().is_file() {
            debug!("Skipping non-regular entry {}", entry.path().display());
            continue;
        }

        let file = fs::File::open(entry.path())
            .context(format!("Failed to open {}", entry.path().display()))?;
        let size = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        zip.start_file(rel_name.clone(), get_compression_options(entry.path(), size))
            .context(format!("Failed to start file entry for {}", rel_name))?;
        loop {
            let bytes_read = reader
                .read(&mut buffer)
                .context(format!("Failed to read from {}", entry.path().display()))?;
            if bytes_read == 0 {
                break;
            }
            zip.write_all(&buffer[..bytes_read])
                .context(format!("Failed to write to zip for {}", rel_name))?;
        }
        file_count += 1;
    }

    let file = zip.finish().context("Failed to finalize zip file")?;
    file.sync_all().context("Failed to sync zip file")?;

    let sha256 = calculate_sha256(&zip_path)?;
    info!(
        "Packaged {} file(s) into {} in {:?} (SHA-256 {})",
        file_count,
        zip_path.display(),
        start.elapsed(),
        sha256
    );

    Ok(EvidencePackage { path: zip_path, sha256, file_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_package_path_is_sibling_zip() {
        let path = package_path(Path::new("/cases/host-20240115")).unwrap();
        assert_eq!(path, PathBuf::from("/cases/host-20240115.zip"));
    }

    #[test]
    fn test_compression_level_for_compressed_formats() {
        let temp_dir = TempDir::new().unwrap();
        let image = temp_dir.path().join("disk.E01");
        fs::write(&image, b"x").unwrap();

        // Smoke check: options build for both kinds of file
        let _ = get_compression_options(&image, 1);
        let _ = get_compression_options(&temp_dir.path().join("notes.txt"), 1);
    }

    #[test]
    fn test_package_run_directory() {
        let temp_dir = TempDir::new().unwrap();
        let run_dir = temp_dir.path().join("run-1");
        fs::create_dir_all(run_dir.join("network")).unwrap();
        fs::write(run_dir.join("manifest.json"), b"{}").unwrap();
        fs::write(run_dir.join("network").join("interfaces.json"), b"[]").unwrap();

        let package = package_run_directory(&run_dir).unwrap();
        assert_eq!(package.file_count, 2);
        assert_eq!(package.path, temp_dir.path().join("run-1.zip"));
        assert_eq!(package.sha256.len(), 64);

        let file = fs::File::open(&package.path).unwrap();
        let mut archive = zip::ZipArchive::new(file).unwrap();
        let mut contents = String::new();
        archive
            .by_name("network/interfaces.json")
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert_eq!(contents, "[]");
        assert!(archive.by_name("manifest.json").is_ok());
    }

    #[test]
    fn test_package_rejects_missing_directory() {
        let temp_dir = TempDir::new().unwrap();
        assert!(package_run_directory(&temp_dir.path().join("absent")).is_err());
    }
}
