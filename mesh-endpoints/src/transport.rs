//! Per-endpoint transport selection: direct address, mTLS metadata, and
//! HTTP-CONNECT tunneling through a waypoint (§4.6).

use std::net::IpAddr;

use mesh_discovery::{IstioEndpoint, Service, WaypointScope};
use mesh_xds::{Address, HealthStatus as WireHealth, LbEndpoint, Metadata, TunnelMetadata};

use crate::splithorizon::RoutableEndpoint;
use crate::traits::{Proxy, PushContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterDirection {
	Inbound,
	InboundVip,
	Outbound,
}

fn supports_tunnel(ctx: &dyn PushContext, endpoint: &IstioEndpoint, address: &str) -> bool {
	endpoint.managed_by_waypoint || ctx.supports_tunnel(endpoint.network.as_str(), address) || endpoint.supports_tunnel
}

fn wire_health(health: mesh_discovery::HealthStatus) -> WireHealth {
	match health {
		mesh_discovery::HealthStatus::Healthy => WireHealth::Healthy,
		mesh_discovery::HealthStatus::Unhealthy => WireHealth::Unhealthy,
		mesh_discovery::HealthStatus::Draining => WireHealth::Draining,
		mesh_discovery::HealthStatus::Degraded => WireHealth::Degraded,
	}
}

fn base_metadata(endpoint: &IstioEndpoint, service: &Service, mtls_enabled: bool) -> Metadata {
	let mut labels: std::collections::HashMap<String, String> = endpoint
		.labels
		.iter()
		.map(|(k, v)| (k.to_string(), v.to_string()))
		.collect();

	if service.mesh_external {
		labels.insert("namespace".to_string(), service.namespace.to_string());
		for (k, v) in &service.canonical_labels {
			labels.insert(k.to_string(), v.to_string());
		}
	}

	labels.insert("tls_mode".to_string(), if mtls_enabled { "istio" } else { "disable" }.to_string());

	Metadata {
		labels,
		tunnel: None,
		transport_socket: std::collections::HashMap::new(),
	}
}

fn tunnel_metadata(
	address: &str,
	destination: &str,
	destination_port: u32,
) -> (Option<TunnelMetadata>, std::collections::HashMap<String, String>) {
	let tunnel = TunnelMetadata::new(address.to_string(), destination.to_string(), destination_port);
	let transport_socket = std::collections::HashMap::from([("tunnel".to_string(), "http".to_string())]);
	(Some(tunnel), transport_socket)
}

fn routed_address_string(routed: &RoutableEndpoint) -> String {
	match routed.resolved_address {
		Some(addr) => format!("{addr}:{}", routed.resolved_port),
		None => String::new(),
	}
}

/// The bare original IP, with no port, as the tunnel metadata's
/// `destination` field requires (§6) — distinct from `orig`, which is
/// `ip:port` and used for the connect-originate internal listener's
/// endpoint ID.
fn routed_destination_ip(routed: &RoutableEndpoint) -> String {
	routed.resolved_address.map(|addr| addr.to_string()).unwrap_or_default()
}

/// Builds the wire `LbEndpoint` for a surviving, split-horizon-resolved
/// endpoint, or `None` if the transport selector drops it
/// (out-of-waypoint-scope, §4.6).
pub fn select(
	ctx: &dyn PushContext,
	proxy: &dyn Proxy,
	direction: ClusterDirection,
	service: &Service,
	routed: &RoutableEndpoint,
	mtls_enabled: bool,
	destination_waypoint: Option<IpAddr>,
) -> Option<LbEndpoint> {
	let endpoint = &routed.source;
	let health = if endpoint.health_status.is_draining() {
		WireHealth::Draining
	} else {
		wire_health(endpoint.health_status)
	};

	let mut metadata = base_metadata(endpoint, service, mtls_enabled);
	let weight = endpoint.weight_or_default();
	let orig = routed_address_string(routed);
	let destination_ip = routed_destination_ip(routed);

	// Global override: proxyless gRPC or HBONE-disabled proxies never see
	// a tunneled address, regardless of the direction-specific rules below.
	let force_direct = proxy.is_proxyless_grpc() || !proxy.enable_hbone();

	if direction == ClusterDirection::InboundVip {
		if let Some(scope) = proxy.waypoint_scope() {
			if !scope.matches(&endpoint.namespace, &endpoint.service_account) {
				return None;
			}
		}
		if !force_direct && supports_tunnel(ctx, endpoint, &orig) {
			let (tunnel, transport_socket) = tunnel_metadata(&orig, &destination_ip, routed.resolved_port);
			metadata.tunnel = tunnel;
			metadata.transport_socket = transport_socket;
			return Some(LbEndpoint {
				health_status: health,
				load_balancing_weight: weight,
				address: Address::connect_originate(orig),
				metadata,
			});
		}
	} else if direction == ClusterDirection::Outbound && !proxy.is_waypoint_proxy() && !proxy.is_ambient() {
		if let Some(waypoint_ip) = destination_waypoint {
			if !force_direct {
				let waypoint_addr = waypoint_ip.to_string();
				let (tunnel, transport_socket) = tunnel_metadata(&waypoint_addr, &destination_ip, routed.resolved_port);
				metadata.tunnel = tunnel;
				metadata.transport_socket = transport_socket;
				return Some(LbEndpoint {
					health_status: health,
					load_balancing_weight: weight,
					address: Address::connect_originate(orig),
					metadata,
				});
			}
		}
	}

	let address = match routed.resolved_address {
		Some(ip) => Address::socket(ip, routed.resolved_port),
		None => Address::socket("0.0.0.0".parse().unwrap(), routed.resolved_port),
	};

	Some(LbEndpoint {
		health_status: health,
		load_balancing_weight: weight,
		address,
		metadata,
	})
}

pub fn in_waypoint_scope(scope: &WaypointScope, namespace: &strng::Strng, service_account: &strng::Strng) -> bool {
	scope.matches(namespace, service_account)
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::{endpoint, service, StubProxy, StubPushContext};

	fn routed(ep: IstioEndpoint) -> RoutableEndpoint {
		RoutableEndpoint {
			resolved_address: ep.address,
			resolved_port: ep.endpoint_port,
			source: std::sync::Arc::new(ep),
		}
	}

	#[test]
	fn direct_endpoint_keeps_socket_address() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let re = routed(endpoint("v1", "http"));
		let lb = select(&ctx, &proxy, ClusterDirection::Outbound, &svc, &re, true, None).unwrap();
		assert_eq!(lb.address, Address::socket("10.0.0.1".parse().unwrap(), 9080));
		assert_eq!(lb.health_status, WireHealth::Healthy);
		assert_eq!(lb.metadata.labels.get("tls_mode").unwrap(), "istio");
	}

	#[test]
	fn outbound_waypoint_tunnels_through_connect_originate() {
		let ctx = StubPushContext::default();
		let proxy = StubProxy::default();
		let svc = service();
		let re = routed(endpoint("v1", "http"));
		let waypoint: IpAddr = "10.2.0.1".parse().unwrap();
		let lb = select(&ctx, &proxy, ClusterDirection::Outbound, &svc, &re, true, Some(waypoint)).unwrap();
		match lb.address {
			Address::Internal { server_listener_name, .. } => {
				assert_eq!(server_listener_name, mesh_xds::CONNECT_ORIGINATE_CLUSTER);
			}
			_ => panic!("expected internal listener address"),
		}
		let tunnel = lb.metadata.tunnel.unwrap();
		assert_eq!(tunnel.destination, "10.0.0.1");
		assert_eq!(tunnel.tunnel_port, mesh_xds::HBONE_INBOUND_PORT);
	}

	#[test]
	fn proxyless_grpc_forces_direct_even_with_waypoint() {
		let ctx = StubPushContext::default();
		let mut proxy = StubProxy::default();
		proxy.proxyless_grpc = true;
		let svc = service();
		let re = routed(endpoint("v1", "http"));
		let waypoint: IpAddr = "10.2.0.1".parse().unwrap();
		let lb = select(&ctx, &proxy, ClusterDirection::Outbound, &svc, &re, true, Some(waypoint)).unwrap();
		assert_eq!(lb.address, Address::socket("10.0.0.1".parse().unwrap(), 9080));
	}

	#[test]
	fn inbound_vip_tunnels_with_bare_ip_destination() {
		let mut ctx = StubPushContext::default();
		ctx.tunnel_capable = true;
		let proxy = StubProxy::default();
		let svc = service();
		let re = routed(endpoint("v1", "http"));
		let lb = select(&ctx, &proxy, ClusterDirection::InboundVip, &svc, &re, true, None).unwrap();
		let tunnel = lb.metadata.tunnel.unwrap();
		assert_eq!(tunnel.address, "10.0.0.1:9080");
		assert_eq!(tunnel.destination, "10.0.0.1");
		assert_eq!(tunnel.destination_port, 9080);
	}

	#[test]
	fn inbound_vip_out_of_scope_is_dropped() {
		let ctx = StubPushContext::default();
		let mut proxy = StubProxy::default();
		proxy.waypoint_scope = Some(WaypointScope {
			namespace: "other-ns".into(),
			service_account: None,
		});
		let svc = service();
		let re = routed(endpoint("v1", "http"));
		let lb = select(&ctx, &proxy, ClusterDirection::InboundVip, &svc, &re, true, None);
		assert!(lb.is_none());
	}
}
