//! Shared fakes and builders for unit tests across this crate's modules.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};

use mesh_discovery::{
	DestinationRule, HealthStatus, IstioEndpoint, Locality, LocalityLbSetting, NetworkAddress, Port, PrecomputedArtifact,
	ProxyView, Resolution, Service, WaypointScope,
};
use strng::Strng;

use crate::traits::{MetricKind, Proxy, ProxyType, PushContext};

pub fn service() -> Service {
	Service {
		hostname: "reviews.default.svc.cluster.local".into(),
		namespace: "default".into(),
		ports: vec![Port {
			name: "http".into(),
			number: 9080,
			app_protocol: None,
		}],
		resolution: Resolution::Static,
		mesh_external: false,
		node_local: false,
		cluster_local: false,
		persistent_session: false,
		canonical_labels: HashMap::new(),
	}
}

pub fn endpoint(version: &str, port_name: &str) -> IstioEndpoint {
	IstioEndpoint {
		address: Some("10.0.0.1".parse().unwrap()),
		endpoint_port: 9080,
		service_port_name: port_name.into(),
		network: "network1".into(),
		source_cluster: "cluster1".into(),
		locality: Locality {
			region: "us-east".into(),
			zone: "a".into(),
			subzone: "1".into(),
			cluster_id: "cluster1".into(),
		},
		node_name: "node1".into(),
		namespace: "default".into(),
		labels: HashMap::from([(Strng::from("version"), Strng::from(version))]),
		service_account: "reviews-sa".into(),
		health_status: HealthStatus::Healthy,
		load_balancing_weight: 1,
		tls_mode: "istio".into(),
		supports_tunnel: false,
		managed_by_waypoint: false,
		transport_artifact: PrecomputedArtifact::new(),
	}
}

pub struct StubProxy {
	pub network: Strng,
	pub cluster_id: Strng,
	pub namespace: Strng,
	pub node_name: Strng,
	pub labels: HashMap<Strng, Strng>,
	pub proxy_type: ProxyType,
	pub locality: Locality,
	pub view: ProxyView,
	pub proxyless_grpc: bool,
	pub hbone: bool,
	pub ambient: bool,
	pub waypoint_scope: Option<WaypointScope>,
	pub destination_rules: HashMap<String, Arc<DestinationRule>>,
}

impl Default for StubProxy {
	fn default() -> Self {
		Self {
			network: "network1".into(),
			cluster_id: "cluster1".into(),
			namespace: "default".into(),
			node_name: "node1".into(),
			labels: HashMap::new(),
			proxy_type: ProxyType::Sidecar,
			locality: Locality::default(),
			view: ProxyView::All,
			proxyless_grpc: false,
			hbone: true,
			ambient: false,
			waypoint_scope: None,
			destination_rules: HashMap::new(),
		}
	}
}

impl Proxy for StubProxy {
	fn network(&self) -> Strng {
		self.network.clone()
	}

	fn cluster_id(&self) -> Strng {
		self.cluster_id.clone()
	}

	fn namespace(&self) -> Strng {
		self.namespace.clone()
	}

	fn labels(&self) -> &HashMap<Strng, Strng> {
		&self.labels
	}

	fn node_name(&self) -> Strng {
		self.node_name.clone()
	}

	fn proxy_type(&self) -> ProxyType {
		self.proxy_type
	}

	fn locality(&self) -> &Locality {
		&self.locality
	}

	fn view(&self) -> &ProxyView {
		&self.view
	}

	fn is_proxyless_grpc(&self) -> bool {
		self.proxyless_grpc
	}

	fn enable_hbone(&self) -> bool {
		self.hbone
	}

	fn is_ambient(&self) -> bool {
		self.ambient
	}

	fn waypoint_scope(&self) -> Option<WaypointScope> {
		self.waypoint_scope.clone()
	}

	fn destination_rule(&self, host: &str) -> Option<Arc<DestinationRule>> {
		self.destination_rules.get(host).cloned()
	}
}

#[derive(Default)]
pub struct StubPushContext {
	pub services: HashMap<String, Arc<Service>>,
	pub endpoints: HashMap<String, Vec<Arc<IstioEndpoint>>>,
	pub gateways: HashMap<String, Vec<NetworkAddress>>,
	pub unresolved_gateways: HashMap<String, Vec<String>>,
	pub waypoints: HashMap<String, Vec<IpAddr>>,
	pub tunnel_capable: bool,
	pub locality_lb: Option<LocalityLbSetting>,
	pub authn_version: String,
	pub metrics: Mutex<Vec<(MetricKind, String)>>,
}

impl PushContext for StubPushContext {
	fn service_for_hostname(&self, _proxy: &dyn Proxy, host: &str) -> Option<Arc<Service>> {
		self.services.get(host).cloned()
	}

	fn service_endpoints_by_port(
		&self,
		service: &Service,
		_port: u16,
		_subset_labels: Option<&HashMap<Strng, Strng>>,
	) -> Vec<Arc<IstioEndpoint>> {
		self.endpoints.get(service.hostname.as_str()).cloned().unwrap_or_default()
	}

	fn is_cluster_local(&self, service: &Service) -> bool {
		service.cluster_local
	}

	fn network_gateways(&self, network: &str) -> Vec<NetworkAddress> {
		self.gateways.get(network).cloned().unwrap_or_default()
	}

	fn unresolved_network_gateways(&self, network: &str) -> Vec<String> {
		self.unresolved_gateways.get(network).cloned().unwrap_or_default()
	}

	fn waypoints_for(&self, scope: &WaypointScope) -> Vec<IpAddr> {
		self.waypoints.get(scope.namespace.as_str()).cloned().unwrap_or_default()
	}

	fn supports_tunnel(&self, _network: &str, _address: &str) -> bool {
		self.tunnel_capable
	}

	fn locality_lb_setting(&self) -> Option<LocalityLbSetting> {
		self.locality_lb.clone()
	}

	fn authn_policy_version(&self) -> String {
		self.authn_version.clone()
	}

	fn add_metric(&self, kind: MetricKind, cluster_name: &str) {
		self.metrics.lock().unwrap().push((kind, cluster_name.to_string()));
	}
}
