//! Public API for mdstore workspaces.
//!
//! [`EventWorkspace`] is the entry point: create one (or load a snapshot), feed it events,
//! split it, query it by region and save it again.

pub mod cancel;
pub mod iter;
pub mod workspace;

pub use cancel::CancellationToken;
pub use iter::{BoxEvents, EventIter};
pub use workspace::{BoxSummary, EventWorkspace};

#[cfg(test)]
mod tests;
