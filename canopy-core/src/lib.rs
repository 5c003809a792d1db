//! Canopy Core
//!
//! Core types and helpers for the Canopy delivery pipeline.
//!
//! This crate contains:
//! - Domain types: build descriptors, image specs, run and rollout state
//! - Hidden-state markers: the comment-embedded persistence codec
//! - Parameter helpers: `--set key.sub=value` override merging and
//!   run-duration formatting

pub mod markers;
pub mod params;
pub mod types;
