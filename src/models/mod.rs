//! # Models
//!
//! Paired-comparison models and the small matrix helpers they share.

pub mod matrix_ops;
pub mod paired;
