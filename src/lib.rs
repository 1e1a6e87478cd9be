//! Statistics HTTP service backed by a document store.
//!
//! Besides the HTTP surface, the service keeps its local document store in
//! step with a shared snapshot: it imports the snapshot on start when the
//! local copy is older, and offers to export and publish a new snapshot
//! version when it is interrupted.

pub mod config;
pub mod database;
pub mod lifecycle;
pub mod logging;
pub mod meta;
pub mod server;
pub mod sync;
