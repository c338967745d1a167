//! # dolani-server
//!
//! HTTP daemon library for the dolani beacon positioning system.
//!
//! This library provides the API handlers, logging setup and state
//! management used by the `dolani-server` binary.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
