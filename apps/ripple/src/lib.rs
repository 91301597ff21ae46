//! # Ripple
//!
//! Host application around the `ripple-core` engine: a TOML pipeline
//! definition layer over a fixed catalog of string transforms, a CLI and an
//! HTTP server that keeps one live driver.

pub mod api;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod replay;
