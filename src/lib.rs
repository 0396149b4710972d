//! Trade Reconciliation Library
//!
//! Fetches UAT and PROD trade datasets in parallel, matches them by trade id,
//! manages deviation thresholds and aggregates deviations into buckets.

pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;
pub mod persistence;
pub mod task_runner;
