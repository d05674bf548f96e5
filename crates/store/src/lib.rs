//! Vigil store: the per-cycle observation cache (`SyncMediator`) and the bounded work
//! distributor it uses to parallelize fetches and resource syncs.

#![forbid(unsafe_code)]

pub mod distribute;
pub mod mediator;

pub use distribute::{chunk_sizes, distribute};
pub use mediator::{SyncMediator, SyncTarget};
