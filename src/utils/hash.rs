use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::constants::DEFAULT_BUFFER_SIZE;
use crate::errors::HashIoError;

/// Digest algorithms the pipeline can compute.
///
/// Declaration order is the canonical order of a [`DigestSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 3] = [Self::Md5, Self::Sha1, Self::Sha256];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unsupported hash algorithm: {}", other)),
        }
    }
}

/// Final digests of one byte source, keyed by algorithm (lowercase hex).
pub type DigestSet = BTreeMap<HashAlgorithm, String>;

/// Incremental state for several algorithms fed from a single pass.
pub struct MultiHasher {
    md5: Option<Md5>,
    sha1: Option<Sha1>,
    sha256: Option<Sha256>,
}

impl MultiHasher {
    pub fn new<'a>(algorithms: impl IntoIterator<Item = &'a HashAlgorithm>) -> Self {
        let selected: BTreeSet<HashAlgorithm> = algorithms.into_iter().copied().collect();
        Self {
            md5: selected.contains(&HashAlgorithm::Md5).then(Md5::default),
            sha1: selected.contains(&HashAlgorithm::Sha1).then(Sha1::default),
            sha256: selected.contains(&HashAlgorithm::Sha256).then(Sha256::default),
        }
    }

    pub fn update(&mut self, chunk: &[u8]) {
        if let Some(h) = self.md5.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha1.as_mut() {
            h.update(chunk);
        }
        if let Some(h) = self.sha256.as_mut() {
            h.update(chunk);
        }
    }

    pub fn finalize(self) -> DigestSet {
        let mut digests = DigestSet::new();
        if let Some(h) = self.md5 {
            digests.insert(HashAlgorithm::Md5, hex::encode(h.finalize()));
        }
        if let Some(h) = self.sha1 {
            digests.insert(HashAlgorithm::Sha1, hex::encode(h.finalize()));
        }
        if let Some(h) = self.sha256 {
            digests.insert(HashAlgorithm::Sha256, hex::encode(h.finalize()));
        }
        digests
    }
}

/// Digest a byte source in one forward pass using a fixed-size buffer.
///
/// Memory use is bounded by `chunk_size` regardless of the source length.
pub fn digest_reader<R: Read>(
    mut reader: R,
    algorithms: &[HashAlgorithm],
    chunk_size: usize,
) -> io::Result<DigestSet> {
    let mut hasher = MultiHasher::new(algorithms);
    let mut buffer = vec![0u8; chunk_size.max(1)];

    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Digest a finished file with every requested algorithm
pub fn digest_file(path: &Path, algorithms: &[HashAlgorithm]) -> Result<DigestSet, HashIoError> {
    let file = File::open(path).map_err(|source| HashIoError {
        path: path.to_path_buf(),
        source,
    })?;

    digest_reader(file, algorithms, DEFAULT_BUFFER_SIZE).map_err(|source| HashIoError {
        path: path.to_path_buf(),
        source,
    })
}

/// Calculate the SHA-256 of a file as lowercase hex
pub fn calculate_sha256(path: &Path) -> Result<String, HashIoError> {
    let mut digests = digest_file(path, &[HashAlgorithm::Sha256])?;
    Ok(digests.remove(&HashAlgorithm::Sha256).unwrap_or_default())
}

/// Re-hash a file and compare against a previously recorded digest.
///
/// Comparison is case-insensitive on the hex string.
pub fn verify_file_digest(
    path: &Path,
    algorithm: HashAlgorithm,
    expected: &str,
) -> Result<bool, HashIoError> {
    let digests = digest_file(path, &[algorithm])?;
    Ok(digests
        .get(&algorithm)
        .map(|actual| actual.eq_ignore_ascii_case(expected))
        .unwrap_or(false))
}
