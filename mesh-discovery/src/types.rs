use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;

use mesh_xds::LbEndpoint as WireLbEndpoint;
use serde::Serialize;
use strng::Strng;

/// Primary key for a [`Service`]: `(hostname, namespace)`.
#[derive(Debug, Eq, PartialEq, Hash, Clone, Serialize)]
pub struct NamespacedHostname {
	pub namespace: Strng,
	pub hostname: Strng,
}

/// Primary key into the network gateway table: `(network, address)`.
#[derive(Debug, Eq, PartialEq, Hash, Clone)]
pub struct NetworkAddress {
	pub network: Strng,
	pub address: IpAddr,
	/// The gateway's routable port (e.g. `15443`). Not part of the key's
	/// identity, only carried along for split-horizon address rewriting.
	pub port: u16,
}

impl fmt::Display for NetworkAddress {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}/{}:{}", self.network, self.address, self.port)
	}
}

/// `(region, zone, subzone, cluster)` routing-preference tuple.
#[derive(Debug, Default, Eq, PartialEq, Hash, Clone, Serialize)]
pub struct Locality {
	pub region: Strng,
	pub zone: Strng,
	pub subzone: Strng,
	pub cluster_id: Strng,
}

impl Locality {
	/// Stable `region/zone/subzone` rendering, used for bucketing (§4.7)
	/// and the lexicographic locality sort (invariant 3). Deliberately
	/// excludes `cluster_id`, which is not part of the Envoy locality wire
	/// shape.
	pub fn label(&self) -> String {
		format!("{}/{}/{}", self.region, self.zone, self.subzone)
	}
}

#[derive(Debug, Default, Eq, PartialEq, Clone, Copy, Serialize)]
pub enum HealthStatus {
	#[default]
	Healthy,
	Unhealthy,
	Draining,
	Degraded,
}

impl HealthStatus {
	/// Endpoints considered serviceable absent a persistent-session
	/// override (invariant 4 handles the draining exception separately).
	pub fn is_available(&self) -> bool {
		matches!(self, HealthStatus::Healthy | HealthStatus::Degraded)
	}

	pub fn is_draining(&self) -> bool {
		matches!(self, HealthStatus::Draining)
	}
}

#[derive(Debug, Default, Eq, PartialEq, Clone, Copy, Serialize)]
pub enum Resolution {
	#[default]
	Static,
	Dns,
	DnsRoundRobin,
	Passthrough,
}

impl Resolution {
	/// Invariant 5: EDS emission is suppressed for DNS-family services.
	pub fn is_dns_family(&self) -> bool {
		matches!(self, Resolution::Dns | Resolution::DnsRoundRobin)
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct Port {
	pub name: Strng,
	pub number: u16,
	pub app_protocol: Option<Strng>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
	pub hostname: Strng,
	pub namespace: Strng,
	pub ports: Vec<Port>,
	pub resolution: Resolution,
	pub mesh_external: bool,
	pub node_local: bool,
	pub cluster_local: bool,
	/// Carries the persistent-session attribute gating invariant 4.
	pub persistent_session: bool,
	/// Canonical-service labels, injected into mesh-external endpoint
	/// metadata by the transport selector (§4.6).
	pub canonical_labels: HashMap<Strng, Strng>,
}

impl Service {
	pub fn namespaced_hostname(&self) -> NamespacedHostname {
		NamespacedHostname {
			namespace: self.namespace.clone(),
			hostname: self.hostname.clone(),
		}
	}

	pub fn port_by_name(&self, name: &str) -> Option<&Port> {
		self.ports.iter().find(|p| p.name.as_str() == name)
	}

	pub fn port_by_number(&self, number: u16) -> Option<&Port> {
		self.ports.iter().find(|p| p.number == number)
	}
}

/// A cached, precomputed LB-endpoint artifact. Invalidated whenever the
/// mTLS decision for the owning endpoint flips, or globally when HBONE
/// is on (§4.10). The key is opaque to `mesh-discovery`; `mesh-endpoints`
/// defines what it stores.
#[derive(Debug, Default)]
pub struct PrecomputedArtifact<T> {
	inner: Mutex<Option<(u64, T)>>,
}

impl<T: Clone> PrecomputedArtifact<T> {
	pub fn new() -> Self {
		Self {
			inner: Mutex::new(None),
		}
	}

	/// Returns the cached value if `key` still matches, else `None`.
	pub fn get(&self, key: u64) -> Option<T> {
		let guard = self.inner.lock().unwrap();
		guard
			.as_ref()
			.and_then(|(k, v)| if *k == key { Some(v.clone()) } else { None })
	}

	/// Races are benign: last writer wins (§5).
	pub fn set(&self, key: u64, value: T) {
		*self.inner.lock().unwrap() = Some((key, value));
	}
}

#[derive(Debug)]
pub struct IstioEndpoint {
	/// `None` when the address must be resolved to a network gateway
	/// (split-horizon, §4.8).
	pub address: Option<IpAddr>,
	pub endpoint_port: u32,
	pub service_port_name: Strng,
	pub network: Strng,
	pub source_cluster: Strng,
	pub locality: Locality,
	pub node_name: Strng,
	pub namespace: Strng,
	pub labels: HashMap<Strng, Strng>,
	pub service_account: Strng,
	pub health_status: HealthStatus,
	pub load_balancing_weight: u32,
	/// `"istio"` or empty; only `"istio"`-tagged endpoints are eligible
	/// for mTLS (§4.4).
	pub tls_mode: Strng,
	pub supports_tunnel: bool,
	pub managed_by_waypoint: bool,
	/// Hot-path memoization slot for this endpoint's built `LbEndpoint`,
	/// keyed by `mesh-endpoints` on the current mTLS decision. Only the
	/// `EndpointIndex`-driven (EDS) build path consults or updates it; the
	/// inline service-snapshot (CDS) path always leaves it untouched.
	pub transport_artifact: PrecomputedArtifact<WireLbEndpoint>,
}

impl IstioEndpoint {
	pub fn is_mtls_capable(&self) -> bool {
		self.tls_mode.as_str() == "istio"
	}

	pub fn weight_or_default(&self) -> u32 {
		if self.load_balancing_weight == 0 {
			1
		} else {
			self.load_balancing_weight
		}
	}
}

/// A predicate over network visibility, used by the proxy's own view of
/// the mesh to decide whether a remote-network endpoint is reachable at
/// all before split-horizon rewriting kicks in.
#[derive(Debug, Clone, Default)]
pub enum ProxyView {
	/// nil view ≡ "all networks visible".
	#[default]
	All,
	Networks(Vec<Strng>),
}

impl ProxyView {
	pub fn is_visible(&self, network: &Strng) -> bool {
		match self {
			ProxyView::All => true,
			ProxyView::Networks(networks) => networks.contains(network),
		}
	}
}

/// `(namespace, service-account?)` pair identifying which endpoints a
/// waypoint proxy is authoritative for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaypointScope {
	pub namespace: Strng,
	pub service_account: Option<Strng>,
}

impl WaypointScope {
	pub fn matches(&self, namespace: &Strng, service_account: &Strng) -> bool {
		if self.namespace != *namespace {
			return false;
		}
		match &self.service_account {
			None => true,
			Some(sa) => sa == service_account,
		}
	}
}

#[derive(Debug, Clone, Default)]
pub struct TlsSettings {
	pub mode_enabled: bool,
}

#[derive(Debug, Clone, Default)]
pub struct LocalityLbSetting {
	pub distribute: Vec<LocalityLbDistribute>,
	pub failover: Vec<LocalityLbFailover>,
	pub failover_priority: Vec<Strng>,
	pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct LocalityLbDistribute {
	pub from: Strng,
	pub to: HashMap<Strng, u32>,
}

#[derive(Debug, Clone)]
pub struct LocalityLbFailover {
	pub from: Strng,
	pub to: Strng,
}

#[derive(Debug, Clone, Default)]
pub struct TrafficPolicy {
	pub tls: Option<TlsSettings>,
	pub outlier_detection_enabled: bool,
	pub load_balancer: Option<LocalityLbSetting>,
}

#[derive(Debug, Clone)]
pub struct Subset {
	pub name: Strng,
	pub labels: HashMap<Strng, Strng>,
	pub traffic_policy: Option<TrafficPolicy>,
}

/// Merged view of overlapping destination rules (§3).
#[derive(Debug, Clone, Default)]
pub struct DestinationRule {
	pub name: Strng,
	pub namespace: Strng,
	/// The rules that were merged to form this view; used for cache
	/// invalidation keying (§4.10).
	pub from_set: Vec<(Strng, Strng)>,
	pub traffic_policy: TrafficPolicy,
	pub port_traffic_policy: HashMap<u16, TrafficPolicy>,
	pub subsets: Vec<Subset>,
}

impl DestinationRule {
	/// Tie-break: first matching subset wins; later duplicates ignored
	/// (§4.3).
	pub fn subset(&self, name: &str) -> Option<&Subset> {
		if name.is_empty() {
			return None;
		}
		self.subsets.iter().find(|s| s.name.as_str() == name)
	}

	pub fn subset_labels(&self, name: &str) -> Option<&HashMap<Strng, Strng>> {
		self.subset(name).map(|s| &s.labels)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn locality_label_excludes_cluster_id() {
		let l = Locality {
			region: "us-east".into(),
			zone: "a".into(),
			subzone: "1".into(),
			cluster_id: "c1".into(),
		};
		assert_eq!(l.label(), "us-east/a/1");
	}

	#[test]
	fn subset_lookup_first_match_wins() {
		let rule = DestinationRule {
			subsets: vec![
				Subset {
					name: "v1".into(),
					labels: HashMap::from([(Strng::from("version"), Strng::from("v1"))]),
					traffic_policy: None,
				},
				Subset {
					name: "v1".into(),
					labels: HashMap::from([(Strng::from("version"), Strng::from("v1-dup"))]),
					traffic_policy: None,
				},
			],
			..Default::default()
		};
		let labels = rule.subset_labels("v1").unwrap();
		assert_eq!(labels.get("version").unwrap().as_str(), "v1");
	}

	#[test]
	fn empty_subset_name_has_no_labels() {
		let rule = DestinationRule::default();
		assert!(rule.subset_labels("").is_none());
	}
}
