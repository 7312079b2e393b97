pub mod cluster;
pub mod config;
pub mod error;
pub mod logger;
pub mod network;
pub mod node;
pub mod paxos;
pub mod state_machine;

pub use cluster::{Cluster, ClusterReport};
pub use config::ClusterConfig;
pub use error::{ConfigError, PaxosError};
