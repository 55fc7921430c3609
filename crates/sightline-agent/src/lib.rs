//! # sightline-agent
//!
//! HTTP daemon around the sightline beacon pipeline.
//!
//! This library provides the API handlers and shared state; the binary wires
//! them to configuration, logging and a TCP listener.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

pub mod api;
pub mod logging;
pub mod state;
