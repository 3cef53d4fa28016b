//! Transcript reconciliation
//!
//! Merges a stream of possibly overlapping or duplicated transcript events
//! into one stable (final, interim) text pair. Pure state transitions, no
//! I/O; reconciliation never fails.

mod reconciler;

pub use reconciler::{Transcript, TranscriptReconciler};
