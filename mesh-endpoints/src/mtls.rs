//! Per-`(push generation, port, rule, subset)` mTLS decision, memoized so
//! that repeated endpoints in the same build reuse one policy evaluation
//! rather than re-deriving it per endpoint.

use std::collections::HashMap;

use mesh_discovery::IstioEndpoint;

#[derive(Debug, Clone, Eq, PartialEq, Hash)]
struct DeciderKey {
	push_generation: u64,
	port: u16,
	rule_id: String,
	subset: String,
}

/// A decider lives for one builder (one CLA build); it is not shared
/// across builds, so the cache dies with it rather than needing explicit
/// invalidation (§4.4).
#[derive(Debug, Default)]
pub struct MtlsDecider {
	cache: HashMap<DeciderKey, bool>,
}

impl MtlsDecider {
	pub fn new() -> Self {
		Self::default()
	}

	/// `tls_configured` is whether the resolved destination-rule TLS
	/// settings request mTLS for this port/subset.
	pub fn decide(
		&mut self,
		push_generation: u64,
		port: u16,
		rule_id: &str,
		subset: &str,
		tls_configured: bool,
		endpoint: &IstioEndpoint,
	) -> bool {
		if !endpoint.is_mtls_capable() {
			return false;
		}

		let key = DeciderKey {
			push_generation,
			port,
			rule_id: rule_id.to_string(),
			subset: subset.to_string(),
		};
		*self.cache.entry(key).or_insert(tls_configured)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use mesh_discovery::{HealthStatus, Locality, PrecomputedArtifact};

	fn endpoint(tls_mode: &str) -> IstioEndpoint {
		IstioEndpoint {
			address: Some("10.0.0.1".parse().unwrap()),
			endpoint_port: 9080,
			service_port_name: "http".into(),
			network: "network1".into(),
			source_cluster: "cluster1".into(),
			locality: Locality::default(),
			node_name: "".into(),
			namespace: "default".into(),
			labels: Default::default(),
			service_account: "".into(),
			health_status: HealthStatus::Healthy,
			load_balancing_weight: 1,
			tls_mode: tls_mode.into(),
			supports_tunnel: false,
			managed_by_waypoint: false,
			transport_artifact: PrecomputedArtifact::new(),
		}
	}

	#[test]
	fn non_istio_tls_mode_always_disabled() {
		let mut decider = MtlsDecider::new();
		let ep = endpoint("");
		assert!(!decider.decide(1, 9080, "rule1", "", true, &ep));
	}

	#[test]
	fn istio_tls_mode_follows_policy() {
		let mut decider = MtlsDecider::new();
		let ep = endpoint("istio");
		assert!(decider.decide(1, 9080, "rule1", "", true, &ep));
	}

	#[test]
	fn decision_is_memoized_per_key() {
		let mut decider = MtlsDecider::new();
		let ep = endpoint("istio");
		assert!(decider.decide(1, 9080, "rule1", "", true, &ep));
		// Second call with a different `tls_configured` for the same key is
		// ignored; the cached decision wins.
		assert!(decider.decide(1, 9080, "rule1", "", false, &ep));
	}
}
