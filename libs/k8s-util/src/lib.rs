pub mod client;
pub mod metrics;
pub mod shutdown;
pub mod url;
