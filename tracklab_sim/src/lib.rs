//! TrackLab Deterministic Simulation Harness
//!
//! Runs the whole tracking pipeline against synthetic data whose ground
//! truth is known, and checks what the model promises:
//! - **Idempotence**: clearing and re-running with the same input yields the
//!   same topology, track indices and feature values
//! - **Stability**: link edits that leave a track's members untouched never
//!   move its index
//! - **Rejection**: speckle clutter never reaches the graph
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐ frames ┌───────────────────────┐ spots ┌─────────┐
//! │  Oracle  │ ─────► │  SyntheticSegmenter   │ ────► │         │
//! │ (seeded) │        └───────────────────────┘       │  Model  │
//! └──────────┘        ┌───────────────────────┐ links │         │
//!                     │ NearestNeighborLinker │ ────► │         │
//!                     └───────────────────────┘       └────┬────┘
//!                                                          │
//!                                       Fingerprint / StatsTables
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use tracklab_sim::{ScenarioId, ScenarioRunner};
//!
//! let result = ScenarioRunner::new(42).with_frames(20).run(ScenarioId::Blinking);
//! assert!(result.passed);
//! ```

pub mod error;
pub mod exporter;
pub mod fingerprint;
pub mod linker;
pub mod oracle;
pub mod runner;
pub mod scenarios;
pub mod segmenter;

pub use error::SimError;
pub use exporter::RunExport;
pub use fingerprint::Fingerprint;
pub use linker::{LinkError, NearestNeighborLinker};
pub use oracle::{Blob, Oracle, OracleConfig, Particle, SyntheticFrame};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use scenarios::ScenarioId;
pub use segmenter::{SegmentError, SyntheticSegmenter};
