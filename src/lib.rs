#![warn(missing_docs)]
#![doc = include_str!("../README.md")]

pub mod error;
pub mod predictor;
pub mod rss_query;
pub mod toeplitz;
