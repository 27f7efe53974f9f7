//! # mirrorchat-server
//!
//! One node of a replicated chat service. Every node keeps a full copy of
//! all chat entities in memory, serves reads from it, and broadcasts each
//! local write to its peers. A shared counter issues entity IDs and one
//! designated node periodically snapshots the store for restarts.

pub mod api;
pub mod config;
pub mod coord;
pub mod counter;
pub mod durable;
pub mod error;
pub mod persistence;
pub mod replication;
pub mod service;
