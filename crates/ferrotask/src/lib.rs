#![doc = include_str!("../README.md")]

mod allocator;
mod config;
mod error;
mod handle;
mod kernels;
mod queue;
mod server;
mod stats;
mod store;
mod sync;
mod task;
mod worker;

#[cfg(test)]
mod tests;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::handle::*;
pub use crate::kernels::*;
pub use crate::server::{Server, ServerState};
pub use crate::stats::StatsSnapshot;
pub use crate::task::*;
