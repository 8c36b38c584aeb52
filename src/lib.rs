//! Shelfkeeper -- scheduled maintenance jobs for a digital library platform.
//!
//! This crate provides the maintenance harness the web application leaves to
//! cron: an ordered batch of jobs (guest event archival, book statistics,
//! exam statistics) run fail-fast under a group lease, with one append-only
//! log row per job execution and the overall outcome reported through the
//! process exit code.

pub mod jobs;
pub mod runner;
pub mod storage;
