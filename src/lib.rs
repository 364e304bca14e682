#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

mod equality;
pub mod distance;
pub mod forest;
mod node;
pub mod serialization;
mod telemetry;

pub use distance::{compute_pairwise_distances, DistanceError, DistanceOptions, DistanceResult};
pub use forest::{Forest, ForestError};
pub use node::NodeId;
pub use serialization::{deserialize_forest, serialize_forest, CodecError};
