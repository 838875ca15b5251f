//! Global constants for the evidence collector.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Buffer size constants
/// Default buffer size for hashing and file operations (1MB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Chunk size for compression operations (512KB)
pub const COMPRESSION_CHUNK_SIZE: usize = 512 * 1024;

// Scheduling constants
/// Upper bound on concurrently running units when no limit is configured.
/// Keeps the collector from overwhelming the host under investigation.
pub const MAX_DEFAULT_CONCURRENCY: usize = 4;

/// Default time to wait for units to acknowledge cancellation
pub const DEFAULT_CANCEL_TIMEOUT_SECS: u64 = 30;

/// Default timeout for an external tool invocation (1 hour, memory imaging can be slow)
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 3600;

// Output layout
/// Audit log file name inside the output directory
pub const AUDIT_LOG_FILE_NAME: &str = "audit_log.jsonl";

/// Manifest file name inside the output directory
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Diagnostic text log file name inside the output directory
pub const DIAGNOSTIC_LOG_FILE_NAME: &str = "collection.log";

/// Probe file used to check that the destination is writable
pub const WRITE_PROBE_FILE_NAME: &str = ".write_probe";

/// Manifest serialization version
pub const MANIFEST_SCHEMA_VERSION: u32 = 1;

/// Hash-chain value preceding the first audit event
pub const AUDIT_GENESIS_HASH: &str =
    "0000000000000000000000000000000000000000000000000000000000000000";

// Files that are already compressed gain nothing from deflate
pub const COMPRESSED_EXTENSIONS: &[&str] = &[
    "zip", "gz", "xz", "bz2", "7z", "rar", "e01", "aff4", "jpg", "jpeg", "png", "mp4",
];

/// Large file threshold for compression decisions (100MB)
pub const LARGE_FILE_COMPRESSION_THRESHOLD: u64 = 100 * 1024 * 1024;
