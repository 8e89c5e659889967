//! Endpoint visibility filter (§4.5). Predicates run in the documented
//! order; the first one that fails rejects the endpoint, so later, more
//! expensive checks never run for an endpoint already excluded by an
//! earlier, cheaper one.

use std::collections::HashMap;

use mesh_discovery::{IstioEndpoint, ProxyView, Service};
use strng::Strng;
use tracing::trace;

use crate::traits::{Proxy, PushContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReject {
	NodeMismatch,
	NetworkNotVisible,
	ClusterMismatch,
	NotDiscoverable,
	PortNameMismatch,
	SubsetLabelMismatch,
	SameNetworkMissingAddress,
	DrainingWithoutPersistentSession,
}

pub struct FilterInput<'a> {
	pub service: &'a Service,
	pub svc_port_name: &'a str,
	pub subset_labels: Option<&'a HashMap<Strng, Strng>>,
}

/// Returns `Ok(())` if `endpoint` survives every predicate, or the first
/// `FilterReject` that excluded it. Each rejection is silent at the
/// endpoint level (§7); the caller logs it at `trace`.
pub fn evaluate(ctx: &dyn PushContext, proxy: &dyn Proxy, input: &FilterInput, endpoint: &IstioEndpoint) -> Result<(), FilterReject> {
	if input.service.node_local && endpoint.node_name != proxy.node_name() {
		return Err(FilterReject::NodeMismatch);
	}

	if !proxy.view().is_visible(&endpoint.network) {
		return Err(FilterReject::NetworkNotVisible);
	}

	if ctx.is_cluster_local(input.service) && endpoint.locality.cluster_id != proxy.cluster_id() {
		return Err(FilterReject::ClusterMismatch);
	}

	if !is_discoverable(input.service, endpoint, proxy) {
		return Err(FilterReject::NotDiscoverable);
	}

	if endpoint.service_port_name.as_str() != input.svc_port_name {
		return Err(FilterReject::PortNameMismatch);
	}

	if let Some(required) = input.subset_labels {
		if !required.iter().all(|(k, v)| endpoint.labels.get(k) == Some(v)) {
			return Err(FilterReject::SubsetLabelMismatch);
		}
	}

	if endpoint.address.is_none() && endpoint.network == proxy.network() {
		return Err(FilterReject::SameNetworkMissingAddress);
	}

	if endpoint.health_status.is_draining() && !input.service.persistent_session {
		return Err(FilterReject::DrainingWithoutPersistentSession);
	}

	Ok(())
}

/// Mesh-external services are discoverable from anywhere; otherwise the
/// endpoint must live in the proxy's own namespace. This approximates
/// Istio's discoverability-policy check with the fields this subsystem
/// actually carries.
fn is_discoverable(service: &Service, endpoint: &IstioEndpoint, proxy: &dyn Proxy) -> bool {
	service.mesh_external || endpoint.namespace == proxy.namespace()
}

/// Filters a batch, logging each rejection at `trace` with the
/// endpoint's identifying fields. Running this twice over the same input
/// produces the same survivor set (invariant 6): the predicates are pure
/// functions of `(proxy, input, endpoint)`.
pub fn filter_endpoints<'e>(
	ctx: &dyn PushContext,
	proxy: &dyn Proxy,
	input: &FilterInput,
	endpoints: impl IntoIterator<Item = &'e std::sync::Arc<IstioEndpoint>>,
) -> Vec<std::sync::Arc<IstioEndpoint>> {
	endpoints
		.into_iter()
		.filter_map(|ep| match evaluate(ctx, proxy, input, ep) {
			Ok(()) => Some(ep.clone()),
			Err(reason) => {
				trace!(
					address = ?ep.address,
					port = ep.endpoint_port,
					?reason,
					"endpoint rejected by filter"
				);
				None
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{endpoint, service, StubProxy, StubPushContext};

	#[test]
	fn port_name_mismatch_rejects() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let ep = endpoint("v1", "grpc");
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: None,
		};
		assert_eq!(evaluate(&ctx, &proxy, &input, &ep), Err(FilterReject::PortNameMismatch));
	}

	#[test]
	fn subset_label_mismatch_rejects() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let ep = endpoint("v2", "http");
		let required = HashMap::from([(Strng::from("version"), Strng::from("v1"))]);
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: Some(&required),
		};
		assert_eq!(evaluate(&ctx, &proxy, &input, &ep), Err(FilterReject::SubsetLabelMismatch));
	}

	#[test]
	fn matching_endpoint_survives() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let ep = endpoint("v1", "http");
		let required = HashMap::from([(Strng::from("version"), Strng::from("v1"))]);
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: Some(&required),
		};
		assert_eq!(evaluate(&ctx, &proxy, &input, &ep), Ok(()));
	}

	#[test]
	fn draining_without_persistent_session_rejects() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let mut ep = endpoint("v1", "http");
		ep.health_status = mesh_discovery::HealthStatus::Draining;
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: None,
		};
		assert_eq!(
			evaluate(&ctx, &proxy, &input, &ep),
			Err(FilterReject::DrainingWithoutPersistentSession)
		);
	}

	#[test]
	fn draining_with_persistent_session_survives() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let mut svc = service();
		svc.persistent_session = true;
		let mut ep = endpoint("v1", "http");
		ep.health_status = mesh_discovery::HealthStatus::Draining;
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: None,
		};
		assert_eq!(evaluate(&ctx, &proxy, &input, &ep), Ok(()));
	}

	#[test]
	fn cluster_local_mismatch_rejects() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let mut svc = service();
		svc.cluster_local = true;
		let mut ep = endpoint("v1", "http");
		ep.locality.cluster_id = "other-cluster".into();
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: None,
		};
		assert_eq!(evaluate(&ctx, &proxy, &input, &ep), Err(FilterReject::ClusterMismatch));
	}

	#[test]
	fn filter_is_idempotent() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let eps = vec![std::sync::Arc::new(endpoint("v1", "http")), std::sync::Arc::new(endpoint("v2", "http"))];
		let input = FilterInput {
			service: &svc,
			svc_port_name: "http",
			subset_labels: None,
		};
		let first = filter_endpoints(&ctx, &proxy, &input, &eps);
		let second = filter_endpoints(&ctx, &proxy, &input, &eps);
		assert_eq!(first.len(), second.len());
		assert_eq!(first.len(), 2);
	}
}
