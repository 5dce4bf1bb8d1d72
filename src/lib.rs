//! redeem-nestcv: unbiased accuracy estimation by nested cross-validation.
//!
//! Each learner is trained and tuned inside outer folds of a dataset, scored on
//! the held-out examples and summarized into a report with a stability flag.
//! Stable learners are combined into a weighted consensus. Failures are
//! isolated per learner and results are snapshotted after every learner.
pub mod config;
pub mod consensus;
pub mod data_handling;
pub mod engine;
pub mod error;
pub mod evaluation;
pub mod folds;
pub mod io;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod persist;
pub mod preprocessing;
pub mod report;
pub mod run_log;
pub mod stats;
pub mod trainer;
pub mod validation;
