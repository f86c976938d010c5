pub mod backoff;
pub mod checksum;
pub mod cluster;
pub mod collector;
pub mod controller;
pub mod error;
pub mod jar;
pub mod leader;
pub mod metrics;
pub mod telemetry;
pub mod topology;
pub mod workerpool;

pub use error::{Error, Result};
