//! Collection units.
//!
//! Every evidence category is a [`CollectionUnit`](unit::CollectionUnit):
//! a self-describing component with a resource class, a `prepare` step that
//! checks preconditions and a `run` step that writes files into its own
//! output directory and hands each finished file to the engine.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │           UnitRegistry                  │
//! │      id -> fresh unit per run           │
//! ├─────────────────────────────────────────┤
//! │          Built-in units                 │
//! │  ┌─────────────┬──────────┬─────────┐   │
//! │  │ live_system │ network  │  tool   │   │
//! │  └─────────────┴──────────┴─────────┘   │
//! ├─────────────────────────────────────────┤
//! │   ProgressSink        ArtifactSink      │
//! │   (progress feed)     (hash pipeline)   │
//! └─────────────────────────────────────────┘
//! ```
//!
//! ## Usage Example
//!
//! ```no_run
//! use evidence_collector::collectors::registry::UnitRegistry;
//!
//! let registry = UnitRegistry::with_builtin_units(&[]);
//! for id in registry.ids() {
//!     println!("{}", id);
//! }
//! ```

pub mod live_system;
pub mod network;
pub mod registry;
pub mod tool;
pub mod unit;
pub mod volatile;

pub use registry::UnitRegistry;
pub use unit::{ArtifactHandler, ArtifactSink, CollectionUnit, PrepareContext, ProgressSink, UnitContext};
