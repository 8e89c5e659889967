//! Data model and in-memory index for the discovery state an Istio-style
//! control plane maintains per mesh: services, endpoints, destination
//! rules, and the proxy-local views over them. `mesh-endpoints` reads
//! this state to assemble cluster load assignments; it never mutates it
//! directly.

pub mod index;
pub mod types;

pub use index::{EndpointIndex, EndpointShards};
pub use types::*;
