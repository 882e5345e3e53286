/*
 * Wire types for the backup data processor.
 *
 * This crate contains:
 * - spec: the coordinator's per-node assignment message
 * - export: the request/response contract with the KV store
 * - progress: what the processor streams back to the coordinator
 *
 * Everything here is serde-serializable; the transports that carry these
 * messages live with the coordinator and are out of scope.
 */

pub mod export;
pub mod progress;
pub mod spec;

pub use export::*;
pub use progress::*;
pub use spec::*;
