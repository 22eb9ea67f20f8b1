//! Terminal output helpers
//!
//! Interactive terminals get spinners and a build progress bar; CI and
//! piped output fall back to plain text.

mod context;
mod progress;

pub use context::UiContext;
pub use progress::{BuildProgress, TaskSpinner};
