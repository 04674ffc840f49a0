//! Domain types - core business entities
//!
//! This module contains the canonical domain types used throughout the application.
//! These types are independent of the RPC plumbing that carries them.

pub mod config;
pub mod library;
pub mod runner;
pub mod work_item;
