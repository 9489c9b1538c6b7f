//! Save-blocking consistency across the resource graph.

mod blocker;
pub mod diagnostics;
pub mod propagation;
mod save_blockers;

pub use blocker::Blocker;
pub use diagnostics::{BlockerReport, DiagnosticContext};
pub use propagation::{PropagationEdge, PropagationEdges};
pub use save_blockers::{FieldListenerId, SaveBlockers};
