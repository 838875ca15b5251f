//! Utility functions for evidence processing.
//!
//! ## Components
//!
//! - **Hashing**: single-pass multi-algorithm digests for artifacts
//! - **Summary**: run manifest model, builder and persistence
//! - **Compression**: ZIP packaging of a finished run directory
//!
//! ### Digesting a File
//!
//! ```no_run
//! use evidence_collector::utils::hash::{digest_file, HashAlgorithm};
//! use std::path::Path;
//!
//! # fn example() -> anyhow::Result<()> {
//! let digests = digest_file(
//!     Path::new("/evidence/memory.raw"),
//!     &[HashAlgorithm::Md5, HashAlgorithm::Sha256],
//! )?;
//! for (algorithm, hex) in &digests {
//!     println!("{}: {}", algorithm, hex);
//! }
//! # Ok(())
//! # }
//! ```

/// Run manifest generation and reporting
pub mod summary;

/// ZIP packaging of run directories
pub mod compress;

/// Cryptographic hash calculation utilities
pub mod hash;
