pub mod cluster;
pub mod common;
pub mod topology;
pub mod workerpool;

pub use cluster::{StormCluster, StormClusterPhase, StormClusterSpec, StormClusterStatus};
pub use topology::{StormTopology, StormTopologyPhase, StormTopologySpec, StormTopologyStatus};
pub use workerpool::{
    StormWorkerPool, StormWorkerPoolPhase, StormWorkerPoolSpec, StormWorkerPoolStatus,
};
