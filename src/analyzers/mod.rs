//! Batch cleaning of accumulated segments.
//!
//! This module keys segments by route, stop pair and UTC time-of-week,
//! applies hard travel-time bounds, computes median/MAD/percentile stats per
//! group, flags outliers by modified z-score, and replaces the cleaned tables.

pub mod aggregate;
pub mod analyzer;
pub mod classify;
pub mod types;
pub mod utility;
