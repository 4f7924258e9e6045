//! Per-frame upload of modified application data.
//!
//! A [`scheduler::TransferScheduler`] owns two [`phase::TransferPhase`]s, one flushed
//! before command buffers are recorded and one after. Each phase packs what changed
//! into the staging buffer of the current frame slot and submits the copies.

pub mod block;
pub mod config;
pub mod image_copy;
pub mod mask;
pub mod phase;
pub mod scheduler;
