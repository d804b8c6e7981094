//! A fixed-size group of cooperating ranks and the collectives they share.
//!
//! Rank 0 is the hub of a star topology: every other rank holds exactly one
//! link to it. A collective is one round trip per peer: each rank sends its
//! frame up, the hub combines them and answers every peer with the same
//! result. Frames carry a sequence number and the collective kind, so ranks
//! that issue collectives in different orders are detected instead of
//! silently mixing payloads.

mod bootstrap;
mod collective;
pub mod config;
pub mod error;
mod group;
pub mod rendezvous;

pub use comms::specs::{
    collective::{CollectiveOp, ReduceOp},
    group::AbortCause,
};
pub use config::GroupConfig;
pub use error::{BootstrapErr, ConfigErr, GroupErr, Result};
pub use group::{GroupState, ProcessGroup};
pub use rendezvous::{Link, MemoryRendezvous, Rendezvous, TcpRendezvous};
