//! Hand-modeled Envoy xDS v3 wire types used by the endpoint assembly
//! pipeline. These are not generated from `.proto` sources: there is no
//! proto toolchain wired into this workspace, so the wire shape is
//! expressed directly as plain, serde-derived Rust structs covering only
//! the fields this subsystem actually populates.

use std::collections::HashMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

/// The internal listener name the transport selector rewrites tunneled
/// endpoints to point at.
pub const CONNECT_ORIGINATE_CLUSTER: &str = "connect_originate";

/// The HBONE tunnel's well-known inbound port on a waypoint proxy.
pub const HBONE_INBOUND_PORT: u32 = 15008;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClusterLoadAssignment {
	pub cluster_name: String,
	pub endpoints: Vec<LocalityLbEndpoints>,
}

impl ClusterLoadAssignment {
	pub fn empty(cluster_name: impl Into<String>) -> Self {
		Self {
			cluster_name: cluster_name.into(),
			endpoints: Vec::new(),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.endpoints.is_empty()
	}

	pub fn total_endpoints(&self) -> usize {
		self.endpoints.iter().map(|g| g.lb_endpoints.len()).sum()
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LocalityLbEndpoints {
	pub locality: Locality,
	pub lb_endpoints: Vec<LbEndpoint>,
	pub load_balancing_weight: u32,
	pub priority: u32,
}

/// `(region, zone, subzone)` as it appears on the wire. The cluster ID
/// that also participates in Istio's internal locality tuple is not part
/// of the Envoy locality proto and is carried separately by the data
/// model (`mesh_discovery::Locality`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Locality {
	pub region: String,
	pub zone: String,
	pub sub_zone: String,
}

impl Locality {
	/// Stable `region/zone/subzone` rendering used both for bucketing and
	/// for the lexicographic locality-group sort.
	pub fn label(&self) -> String {
		format!("{}/{}/{}", self.region, self.zone, self.sub_zone)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LbEndpoint {
	pub health_status: HealthStatus,
	pub load_balancing_weight: u32,
	pub address: Address,
	pub metadata: Metadata,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HealthStatus {
	#[default]
	Unknown,
	Healthy,
	Unhealthy,
	Draining,
	Degraded,
}

impl HealthStatus {
	pub fn is_available(&self) -> bool {
		matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Address {
	Socket { address: IpAddr, port: u32 },
	/// A tunneled endpoint, addressed through an Envoy internal listener
	/// rather than a routable socket address.
	Internal {
		server_listener_name: String,
		endpoint_id: String,
	},
}

impl Address {
	pub fn socket(address: IpAddr, port: u32) -> Self {
		Address::Socket { address, port }
	}

	pub fn connect_originate(endpoint_id: impl Into<String>) -> Self {
		Address::Internal {
			server_listener_name: CONNECT_ORIGINATE_CLUSTER.to_string(),
			endpoint_id: endpoint_id.into(),
		}
	}
}

/// Filter metadata attached to an `LbEndpoint`. Only the `tunnel` key
/// used by the transport selector is modeled explicitly; everything else
/// is a free-form string map, matching how Envoy metadata is consumed
/// downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Metadata {
	pub labels: HashMap<String, String>,
	pub tunnel: Option<TunnelMetadata>,
	/// `transport_socket` metadata, e.g. `{tunnel: "http"}`.
	pub transport_socket: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelMetadata {
	pub address: String,
	pub destination: String,
	pub destination_port: u32,
	pub tunnel_port: u32,
}

impl TunnelMetadata {
	pub fn new(address: impl Into<String>, destination: String, destination_port: u32) -> Self {
		Self {
			address: address.into(),
			destination,
			destination_port,
			tunnel_port: HBONE_INBOUND_PORT,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn locality_label_renders_stable_key() {
		let l = Locality {
			region: "us-east".into(),
			zone: "a".into(),
			sub_zone: "1".into(),
		};
		assert_eq!(l.label(), "us-east/a/1");
	}

	#[test]
	fn empty_cla_has_no_endpoints() {
		let cla = ClusterLoadAssignment::empty("outbound|9080||reviews.default.svc");
		assert!(cla.is_empty());
		assert_eq!(cla.total_endpoints(), 0);
	}
}
