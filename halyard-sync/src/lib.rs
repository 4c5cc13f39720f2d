//! # halyard-sync
//!
//! Pushing a local workspace into a running component.
//!
//! [`Pusher::push`] drives the whole flow; the pieces it composes are usable
//! on their own:
//! - [`archive`] packs a component directory into a tar
//! - [`revision`] hashes payloads and decides whether to push
//! - [`watcher`] waits for a component to reach a phase
//! - [`executor`] runs ordered remote steps and builds the push sequences
//! - [`capability`] matches and binds required capabilities

pub mod archive;
pub mod capability;
pub mod error;
pub mod executor;
pub mod pipeline;
pub mod revision;
pub mod watcher;

pub use archive::{archive, ArchiveOptions};
pub use capability::{CapabilitySelector, FirstMatch, Resolution};
pub use error::SyncError;
pub use executor::{PushPlan, RemoteExecutor, Step, StepAction};
pub use pipeline::{PushOutcome, PushTarget, Pusher};
pub use watcher::ReadinessWatcher;
