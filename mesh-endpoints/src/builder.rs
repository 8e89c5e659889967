//! Endpoint Builder Façade (§4.10): orchestrates A–I, exposes the two
//! public entry points, and computes the cache key / dependent-config
//! list the xDS cache layer uses for invalidation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::net::IpAddr;
use std::sync::Arc;

use mesh_discovery::{EndpointIndex, IstioEndpoint, NamespacedHostname, Resolution, WaypointScope};
use mesh_xds::ClusterLoadAssignment;
use tracing::{debug, info};

use crate::cluster_key::{self, Direction};
use crate::filter::{self, FilterInput};
use crate::locality;
use crate::localitylb;
use crate::mtls::MtlsDecider;
use crate::policy;
use crate::splithorizon;
use crate::traits::{MetricKind, Proxy, PushContext};
use crate::transport::{self, ClusterDirection};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConfigKind {
	DestinationRule,
	ServiceEntry,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConfigKey {
	pub kind: ConfigKind,
	pub name: String,
	pub namespace: String,
}

fn direction_for(d: Direction) -> ClusterDirection {
	match d {
		Direction::Inbound => ClusterDirection::Inbound,
		Direction::InboundVip => ClusterDirection::InboundVip,
		Direction::Outbound => ClusterDirection::Outbound,
	}
}

/// Created per `(proxy, cluster)` build; lives only for the duration of
/// one CLA construction (§3 Lifecycle).
pub struct EndpointBuilder<'a> {
	ctx: &'a dyn PushContext,
	proxy: &'a dyn Proxy,
	cluster_name: &'a str,
	mtls: MtlsDecider,
}

impl<'a> EndpointBuilder<'a> {
	pub fn new(ctx: &'a dyn PushContext, proxy: &'a dyn Proxy, cluster_name: &'a str) -> Self {
		Self {
			ctx,
			proxy,
			cluster_name,
			mtls: MtlsDecider::new(),
		}
	}

	/// `FromServiceEndpoints` — snapshots endpoints directly from the push
	/// context's service index (CDS inline assembly). Never reads or
	/// writes the precomputed per-endpoint artifact slot (§4.10).
	pub fn from_service_endpoints(&mut self) -> ClusterLoadAssignment {
		self.build_from(None)
	}

	/// `BuildClusterLoadAssignment` — snapshots from the `EndpointIndex`
	/// (EDS). Consults and refreshes each endpoint's precomputed artifact
	/// slot, keyed on its current mTLS decision, as a hot-path shortcut
	/// around `transport::select` — except when HBONE is enabled on this
	/// proxy, since a tunneled `LbEndpoint` is proxy-specific and the slot
	/// is bypassed entirely in that case (§4.10).
	pub fn build_cluster_load_assignment(&mut self, index: &EndpointIndex) -> ClusterLoadAssignment {
		self.build_from(Some(index))
	}

	fn build_from(&mut self, index: Option<&EndpointIndex>) -> ClusterLoadAssignment {
		let empty = || ClusterLoadAssignment::empty(self.cluster_name.to_string());

		let Some(key) = cluster_key::parse(self.cluster_name) else {
			debug!(cluster = self.cluster_name, "malformed cluster name, returning empty CLA");
			return empty();
		};

		let Some(service) = self.ctx.service_for_hostname(self.proxy, &key.host) else {
			debug!(cluster = self.cluster_name, host = key.host, "service not found");
			self.ctx.add_metric(MetricKind::NoInstances, self.cluster_name);
			return empty();
		};

		if matches!(service.resolution, Resolution::Dns | Resolution::DnsRoundRobin) {
			info!(cluster = self.cluster_name, "cluster in EDS but resolution is DNS, skipping");
			return empty();
		}

		let Some(svc_port) = service.port_by_number(key.port) else {
			debug!(cluster = self.cluster_name, port = key.port, "port not found on service");
			return empty();
		};
		let svc_port_name = svc_port.name.clone();

		let rule = self.proxy.destination_rule(&key.host);
		let subset_labels = policy::subset_labels(rule.as_deref(), &key.subset).cloned();
		let resolved_policy = policy::resolve(rule.as_deref(), key.port, &key.subset);

		let raw_endpoints: Vec<Arc<IstioEndpoint>> = match index {
			Some(idx) => {
				let host = NamespacedHostname {
					namespace: service.namespace.clone(),
					hostname: service.hostname.clone(),
				};
				let (shards, _found) = idx.shards_for_service(&host);
				shards.snapshot()
			}
			None => self.ctx.service_endpoints_by_port(&service, key.port, subset_labels.as_ref()),
		};

		let filter_input = FilterInput {
			service: &service,
			svc_port_name: svc_port_name.as_str(),
			subset_labels: subset_labels.as_ref(),
		};
		let filtered = filter::filter_endpoints(self.ctx, self.proxy, &filter_input, &raw_endpoints);

		let dns_cluster = false;
		let routed = splithorizon::rewrite(self.ctx, self.proxy, dns_cluster, filtered);

		let rule_id = rule.as_ref().map(|r| format!("{}/{}", r.namespace, r.name)).unwrap_or_default();

		// The decider's push generation is scoped to this build; deriving it
		// from the live authn policy version means a decision memoized under
		// one version is never reused under another, should a decider ever
		// outlive a single build (§4.4, §6 `AuthnPolicies.GetVersion()`).
		let authn_version = self.ctx.authn_policy_version();
		let mut gen_hasher = DefaultHasher::new();
		authn_version.hash(&mut gen_hasher);
		let push_generation = gen_hasher.finish();

		// Only the EDS entry point consults the per-endpoint artifact slot,
		// and only while HBONE is not globally enabled for this proxy: a
		// tunneled LbEndpoint is proxy-specific, so caching it on the shared
		// endpoint would leak one proxy's tunnel metadata into another's CLA
		// (§3, §4.10).
		let use_artifact = index.is_some() && !self.proxy.enable_hbone();

		let mut pairs = Vec::with_capacity(routed.len());
		for re in &routed {
			let mtls_enabled = self
				.mtls
				.decide(push_generation, key.port, &rule_id, &key.subset, resolved_policy.tls_configured, &re.source);
			let artifact_key = mtls_enabled as u64;

			if use_artifact {
				if let Some(lb) = re.source.transport_artifact.get(artifact_key) {
					pairs.push((re.source.locality.clone(), lb));
					continue;
				}
			}

			let destination_waypoint = self.resolve_destination_waypoint(&re.source);
			let direction = direction_for(key.direction);
			let Some(lb) = transport::select(self.ctx, self.proxy, direction, &service, re, mtls_enabled, destination_waypoint) else {
				continue;
			};

			if use_artifact {
				re.source.transport_artifact.set(artifact_key, lb.clone());
			}
			pairs.push((re.source.locality.clone(), lb));
		}

		let groups = locality::aggregate(self.ctx, &key.host, key.port, pairs);
		if groups.is_empty() {
			return empty();
		}

		let load_balancer = resolved_policy.load_balancer.clone().or_else(|| self.ctx.locality_lb_setting());
		let groups = localitylb::apply(
			load_balancer.as_ref(),
			self.proxy.locality(),
			resolved_policy.outlier_detection_enabled,
			groups,
		);

		ClusterLoadAssignment {
			cluster_name: self.cluster_name.to_string(),
			endpoints: groups,
		}
	}

	fn resolve_destination_waypoint(&self, endpoint: &IstioEndpoint) -> Option<IpAddr> {
		if self.proxy.is_waypoint_proxy() || self.proxy.is_ambient() {
			return None;
		}
		let scope = WaypointScope {
			namespace: endpoint.namespace.clone(),
			service_account: Some(endpoint.service_account.clone()),
		};
		self.ctx.waypoints_for(&scope).into_iter().next()
	}

	/// Whether this build's result can be cached at all: invalidation is
	/// impossible without a resolved service.
	pub fn cacheable(&self, service_found: bool) -> bool {
		service_found
	}

	/// The dependent-config keys consumers use to invalidate the cache
	/// when upstream destination rules or the service entry change.
	pub fn dependent_configs(&self, service_namespace: &str, service_hostname: &str, rule_from_set: &[(String, String)]) -> Vec<ConfigKey> {
		let mut keys: Vec<ConfigKey> = rule_from_set
			.iter()
			.map(|(name, namespace)| ConfigKey {
				kind: ConfigKind::DestinationRule,
				name: name.clone(),
				namespace: namespace.clone(),
			})
			.collect();
		keys.push(ConfigKey {
			kind: ConfigKind::ServiceEntry,
			name: service_hostname.to_string(),
			namespace: service_namespace.to_string(),
		});
		keys
	}

	/// The 64-bit cache key: a pure function of exactly the fields listed
	/// in §4.10, joined by `~` before hashing so that e.g. `(\"a\",\"bc\")`
	/// and `(\"ab\",\"c\")` never collide.
	#[allow(clippy::too_many_arguments)]
	pub fn cache_key(
		&self,
		node_type: &str,
		cluster_local: bool,
		hbone_enabled: bool,
		locality_label: &str,
		failover_priority_labels: Option<&[u8]>,
		node_name: Option<&str>,
		authn_policy_version: &str,
		dest_rule_from_set: &[(String, String)],
		service_hostname: &str,
		service_namespace: &str,
		proxy_view: &str,
	) -> u64 {
		let mut hasher = DefaultHasher::new();
		let mut field = |s: &str| {
			s.hash(&mut hasher);
			"~".hash(&mut hasher);
		};

		field(self.cluster_name);
		field(self.proxy.network().as_str());
		field(self.proxy.cluster_id().as_str());
		field(node_type);
		field(if cluster_local { "1" } else { "0" });
		field(if hbone_enabled { "1" } else { "0" });
		field(locality_label);
		if let Some(bytes) = failover_priority_labels {
			bytes.hash(&mut hasher);
		}
		if let Some(name) = node_name {
			field(name);
		}
		field(authn_policy_version);
		for (name, namespace) in dest_rule_from_set {
			field(name);
			field(namespace);
		}
		field(service_hostname);
		field(service_namespace);
		field(proxy_view);

		hasher.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{endpoint, service, StubProxy, StubPushContext};
	use mesh_discovery::{DestinationRule, NetworkAddress, Subset};
	use std::collections::HashMap;

	fn push_context_with(endpoints: Vec<Arc<IstioEndpoint>>) -> StubPushContext {
		let mut ctx = StubPushContext::default();
		ctx.services.insert(
			"reviews.default.svc".to_string(),
			Arc::new(mesh_discovery::Service {
				hostname: "reviews.default.svc".into(),
				..service()
			}),
		);
		ctx.endpoints.insert("reviews.default.svc".to_string(), endpoints);
		ctx
	}

	#[test]
	fn simple_outbound_eds() {
		let ep = endpoint("v1", "http");
		let ctx = push_context_with(vec![Arc::new(ep)]);
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert_eq!(cla.total_endpoints(), 1);
		assert_eq!(cla.endpoints[0].locality.label(), "us-east/a/1");
		assert_eq!(cla.endpoints[0].load_balancing_weight, 1);
	}

	#[test]
	fn subset_filter_keeps_only_matching_version() {
		let v1 = endpoint("v1", "http");
		let v2 = endpoint("v2", "http");
		let ctx = push_context_with(vec![Arc::new(v1), Arc::new(v2)]);
		let mut proxy = StubProxy::default();
		let rule = DestinationRule {
			name: "reviews".into(),
			namespace: "default".into(),
			subsets: vec![Subset {
				name: "v1".into(),
				labels: HashMap::from([(strng::Strng::from("version"), strng::Strng::from("v1"))]),
				traffic_policy: None,
			}],
			..Default::default()
		};
		proxy.destination_rules.insert("reviews.default.svc".to_string(), Arc::new(rule));
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080|v1|reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert_eq!(cla.total_endpoints(), 1);
	}

	#[test]
	fn cluster_local_mismatch_yields_empty_cla_and_metric() {
		let mut ep = endpoint("v1", "http");
		ep.locality.cluster_id = "c2".into();
		let ctx = push_context_with(vec![Arc::new(ep)]);
		let mut proxy = StubProxy::default();
		proxy.cluster_id = "c1".into();

		let mut ctx = ctx;
		if let Some(svc) = ctx.services.get_mut("reviews.default.svc") {
			*svc = Arc::new(mesh_discovery::Service {
				cluster_local: true,
				..(**svc).clone()
			});
		}

		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert!(cla.is_empty());
	}

	#[test]
	fn split_horizon_rewrites_to_gateway() {
		let mut ep = endpoint("v1", "http");
		ep.network = "n2".into();
		let mut ctx = push_context_with(vec![Arc::new(ep)]);
		ctx.gateways.insert(
			"n2".to_string(),
			vec![NetworkAddress {
				network: "n2".into(),
				address: "203.0.113.5".parse().unwrap(),
				port: 15443,
			}],
		);
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert_eq!(cla.total_endpoints(), 1);
		assert_eq!(
			cla.endpoints[0].lb_endpoints[0].address,
			mesh_xds::Address::socket("203.0.113.5".parse().unwrap(), 15443)
		);
	}

	#[test]
	fn weight_overflow_saturates() {
		let mut a = endpoint("v1", "http");
		a.load_balancing_weight = 0x9000_0000;
		let mut b = endpoint("v1", "http");
		b.load_balancing_weight = 0x9000_0000;
		let ctx = push_context_with(vec![Arc::new(a), Arc::new(b)]);
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert_eq!(cla.endpoints[0].load_balancing_weight, u32::MAX);
	}

	#[test]
	fn draining_without_persistent_session_filtered() {
		let mut ep = endpoint("v1", "http");
		ep.health_status = mesh_discovery::HealthStatus::Draining;
		let ctx = push_context_with(vec![Arc::new(ep)]);
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert!(cla.is_empty());
	}

	#[test]
	fn draining_with_persistent_session_included() {
		let mut ep = endpoint("v1", "http");
		ep.health_status = mesh_discovery::HealthStatus::Draining;
		let mut ctx = push_context_with(vec![Arc::new(ep)]);
		if let Some(svc) = ctx.services.get_mut("reviews.default.svc") {
			*svc = Arc::new(mesh_discovery::Service {
				persistent_session: true,
				..(**svc).clone()
			});
		}
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert_eq!(cla.total_endpoints(), 1);
		assert_eq!(cla.endpoints[0].lb_endpoints[0].health_status, mesh_xds::HealthStatus::Draining);
	}

	#[test]
	fn dns_resolution_suppresses_eds() {
		let ep = endpoint("v1", "http");
		let mut ctx = push_context_with(vec![Arc::new(ep)]);
		if let Some(svc) = ctx.services.get_mut("reviews.default.svc") {
			*svc = Arc::new(mesh_discovery::Service {
				resolution: Resolution::Dns,
				..(**svc).clone()
			});
		}
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert!(cla.is_empty());
	}

	#[test]
	fn cds_path_never_touches_artifact_slot() {
		let ep = Arc::new(endpoint("v1", "http"));
		let ctx = push_context_with(vec![ep.clone()]);
		let proxy = StubProxy::default();
		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.from_service_endpoints();
		assert_eq!(cla.total_endpoints(), 1);
		assert!(ep.transport_artifact.get(0).is_none());
		assert!(ep.transport_artifact.get(1).is_none());
	}

	#[test]
	fn eds_path_populates_and_reuses_artifact_slot() {
		let ep = Arc::new(endpoint("v1", "http"));
		let ctx = push_context_with(vec![]);
		let mut proxy = StubProxy::default();
		proxy.hbone = false;

		let index = EndpointIndex::new();
		let host = NamespacedHostname {
			namespace: "default".into(),
			hostname: "reviews.default.svc".into(),
		};
		let (shards, _found) = index.shards_for_service(&host);
		shards.replace_cluster("cluster1".into(), vec![ep.clone()]);

		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.build_cluster_load_assignment(&index);
		assert_eq!(cla.total_endpoints(), 1);
		assert!(ep.transport_artifact.get(0).is_some(), "slot should be populated after the first EDS build");

		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla_again = builder.build_cluster_load_assignment(&index);
		assert_eq!(cla_again.total_endpoints(), 1);
	}

	#[test]
	fn eds_path_bypasses_artifact_slot_when_hbone_enabled() {
		let ep = Arc::new(endpoint("v1", "http"));
		let ctx = push_context_with(vec![]);
		let mut proxy = StubProxy::default();
		proxy.hbone = true;

		let index = EndpointIndex::new();
		let host = NamespacedHostname {
			namespace: "default".into(),
			hostname: "reviews.default.svc".into(),
		};
		let (shards, _found) = index.shards_for_service(&host);
		shards.replace_cluster("cluster1".into(), vec![ep.clone()]);

		let mut builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let cla = builder.build_cluster_load_assignment(&index);
		assert_eq!(cla.total_endpoints(), 1);
		assert!(ep.transport_artifact.get(0).is_none());
		assert!(ep.transport_artifact.get(1).is_none());
	}

	#[test]
	fn cache_key_is_pure_and_sensitive() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let builder = EndpointBuilder::new(&ctx, &proxy, "outbound|9080||reviews.default.svc");
		let k1 = builder.cache_key("sidecar", false, true, "us-east/a/1", None, None, "v1", &[], "reviews.default.svc", "default", "all");
		let k2 = builder.cache_key("sidecar", false, true, "us-east/a/1", None, None, "v1", &[], "reviews.default.svc", "default", "all");
		assert_eq!(k1, k2);

		let k3 = builder.cache_key("sidecar", true, true, "us-east/a/1", None, None, "v1", &[], "reviews.default.svc", "default", "all");
		assert_ne!(k1, k3);
	}
}
