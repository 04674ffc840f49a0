//! FleetFlow dispatch core.
//!
//! - [`queue`]: which files may run and in what order
//! - [`ipc`]: the correlated RPC channel shared by runner, node and server
//! - [`node`]: processing node lifecycle and runner supervision
//! - [`runner`]: the isolated process that works on one file

pub mod dirs;
pub mod domain;
pub mod ipc;
pub mod node;
pub mod queue;
pub mod runner;

pub use domain::config;
pub use node::{Node, NodeError};
