//! Cross-network endpoint rewriting: substitutes gateway addresses for
//! endpoints that live on a network foreign to the requesting proxy
//! (§4.8).
//!
//! Replication semantics (resolved open question, see DESIGN.md): when a
//! remote network has more than one gateway, the original endpoint fans
//! out into one synthetic endpoint per gateway, each carrying the
//! *original* endpoint's full weight rather than an evenly divided share.

use mesh_discovery::{IstioEndpoint, Locality, NetworkAddress};

use crate::traits::{Proxy, PushContext};

/// An endpoint ready for transport selection, after any split-horizon
/// rewrite. `source` is the original endpoint (for labels, locality,
/// health); `resolved_address` overrides its address when the endpoint
/// crossed a network boundary.
#[derive(Debug, Clone)]
pub struct RoutableEndpoint {
	pub source: std::sync::Arc<IstioEndpoint>,
	pub resolved_address: Option<std::net::IpAddr>,
	pub resolved_port: u32,
}

impl RoutableEndpoint {
	/// `true` if this endpoint was rewritten to a gateway address (its
	/// resolved address differs from the source endpoint's own).
	pub fn crossed_network(&self) -> bool {
		self.resolved_address != self.source.address
	}
}

/// Rewrites `endpoints` for the requesting proxy's network. Same-network
/// endpoints pass through unchanged. Foreign-network endpoints are
/// replaced by one `RoutableEndpoint` per declared gateway for their
/// network; an endpoint whose network has no declared gateway is
/// dropped, since it would otherwise have no reachable address
/// (invariant 1).
pub fn rewrite(
	ctx: &dyn PushContext,
	proxy: &dyn Proxy,
	dns_cluster: bool,
	endpoints: Vec<std::sync::Arc<IstioEndpoint>>,
) -> Vec<RoutableEndpoint> {
	let proxy_network = proxy.network();
	let mut out = Vec::with_capacity(endpoints.len());

	for ep in endpoints {
		if ep.network == proxy_network {
			out.push(RoutableEndpoint {
				resolved_address: ep.address,
				resolved_port: ep.endpoint_port,
				source: ep,
			});
			continue;
		}

		if dns_cluster {
			let unresolved = ctx.unresolved_network_gateways(ep.network.as_str());
			for _host in unresolved {
				// Unresolved (DNS) gateways carry no fixed IP; the transport
				// selector downstream is expected to resolve the hostname at
				// connection time. We still emit one routable entry per
				// declared gateway, matching the resolved-gateway fan-out.
				out.push(RoutableEndpoint {
					resolved_address: None,
					resolved_port: ep.endpoint_port,
					source: ep.clone(),
				});
			}
			continue;
		}

		let gateways: Vec<NetworkAddress> = ctx.network_gateways(ep.network.as_str());
		for gw in gateways {
			out.push(RoutableEndpoint {
				resolved_address: Some(gw.address),
				resolved_port: gw.port as u32,
				source: ep.clone(),
			});
		}
	}

	out
}

/// Closure check (invariant 7, testable property 7): every routable
/// endpoint either shares the proxy's network or its resolved address
/// equals a declared gateway address for some network.
pub fn satisfies_closure(ctx: &dyn PushContext, proxy: &dyn Proxy, endpoints: &[RoutableEndpoint]) -> bool {
	endpoints.iter().all(|re| {
		if re.source.network == proxy.network() {
			return true;
		}
		let gateways = ctx.network_gateways(re.source.network.as_str());
		re.resolved_address.is_some_and(|addr| gateways.iter().any(|gw| gw.address == addr))
	})
}

pub fn locality_for(endpoint: &RoutableEndpoint) -> &Locality {
	&endpoint.source.locality
}
