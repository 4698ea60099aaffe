//! State module for tracking reporter progress
//!
//! Every reporter in a cover walks the same lifecycle:
//! `Created -> Fetching -> {Fetched | FetchFailed} -> Dispatching -> Done`.
//! Reporters seeded from intel skip the fetch and go straight to `Fetched`.

mod node_state;

pub use node_state::NodeState;
