//! Collaborator traits modeling the upstream control-plane state this
//! subsystem consumes but does not own (§6). Test fakes implement these
//! directly rather than linking a real control plane.

use std::sync::Arc;

use mesh_discovery::{DestinationRule, IstioEndpoint, Locality, ProxyView, Service, WaypointScope};
use strng::Strng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
	NoInstances,
}

/// The immutable, per-push snapshot of mesh state a builder reads from.
pub trait PushContext {
	fn service_for_hostname(&self, proxy: &dyn Proxy, host: &str) -> Option<Arc<Service>>;

	fn service_endpoints_by_port(
		&self,
		service: &Service,
		port: u16,
		subset_labels: Option<&std::collections::HashMap<Strng, Strng>>,
	) -> Vec<Arc<IstioEndpoint>>;

	fn is_cluster_local(&self, service: &Service) -> bool;

	/// Resolved gateway addresses per network, keyed by network ID.
	fn network_gateways(&self, network: &str) -> Vec<mesh_discovery::NetworkAddress>;

	/// Unresolved (DNS hostname) gateway addresses per network, used by
	/// DNS-cluster builds (§4.8).
	fn unresolved_network_gateways(&self, network: &str) -> Vec<String>;

	fn waypoints_for(&self, scope: &WaypointScope) -> Vec<std::net::IpAddr>;

	fn supports_tunnel(&self, network: &str, address: &str) -> bool;

	fn locality_lb_setting(&self) -> Option<mesh_discovery::LocalityLbSetting>;

	fn authn_policy_version(&self) -> String;

	fn add_metric(&self, kind: MetricKind, cluster_name: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyType {
	Sidecar,
	Waypoint,
	Router,
}

/// The requesting proxy's identity and feature flags.
pub trait Proxy {
	fn network(&self) -> Strng;
	fn cluster_id(&self) -> Strng;
	fn namespace(&self) -> Strng;
	fn labels(&self) -> &std::collections::HashMap<Strng, Strng>;
	fn node_name(&self) -> Strng;
	fn proxy_type(&self) -> ProxyType;
	fn locality(&self) -> &Locality;
	fn view(&self) -> &ProxyView;

	fn is_proxyless_grpc(&self) -> bool;
	fn enable_hbone(&self) -> bool;
	fn is_waypoint_proxy(&self) -> bool {
		self.proxy_type() == ProxyType::Waypoint
	}
	fn is_ambient(&self) -> bool;
	fn waypoint_scope(&self) -> Option<WaypointScope>;

	fn destination_rule(&self, host: &str) -> Option<Arc<DestinationRule>>;
}
