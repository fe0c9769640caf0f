#![doc = "box-traverse-core: per-user, rate-limited traversal of Box content."]

//! This crate holds the traversal engine and everything it needs that is not HTTP or file I/O:
//! the rate-limited queues, the user registry, traversal policy, enumeration of target users,
//! completion tracking and the built-in user-defined actions.
//!
//! The outside world is reached only through the traits in [`contract`], so every pipeline
//! here can be driven by mocks in tests.
//!
//! # Usage
//! Build a [`traverse::Services`] from concrete clients and call [`traverse::traverse`].

pub mod actions;
pub mod completion;
pub mod config;
pub mod contract;
pub mod correlation;
pub mod dispatcher;
pub mod engine;
pub mod enumerate;
pub mod error;
pub mod fetcher;
pub mod input;
pub mod model;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod stats;
pub mod traverse;
pub mod users_queue;
