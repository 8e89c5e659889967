//! Buckets LB endpoints by locality label, sorts buckets lexicographically,
//! and sums weights with saturation (§4.7).

use std::collections::BTreeMap;

use mesh_discovery::Locality;
use mesh_xds::{LbEndpoint, Locality as WireLocality, LocalityLbEndpoints};
use tracing::warn;

use crate::traits::{MetricKind, PushContext};

fn wire_locality(locality: &Locality) -> WireLocality {
	WireLocality {
		region: locality.region.to_string(),
		zone: locality.zone.to_string(),
		sub_zone: locality.subzone.to_string(),
	}
}

/// One bucket in progress: locality plus the aligned `(istio endpoint
/// locality, wire lb endpoint)` pairs assigned to it, matching the
/// `LocalityEndpoints` invariant that the two sequences stay positionally
/// aligned (§3).
struct Bucket {
	locality: WireLocality,
	endpoints: Vec<LbEndpoint>,
}

/// Groups `(locality, lb_endpoint)` pairs into sorted `LocalityLbEndpoints`
/// groups. If no bucket results, the caller is responsible for publishing
/// the "cluster has no instances" metric and returning an empty CLA.
pub fn aggregate(
	ctx: &dyn PushContext,
	service_hostname: &str,
	service_port: u16,
	pairs: Vec<(Locality, LbEndpoint)>,
) -> Vec<LocalityLbEndpoints> {
	let mut buckets: BTreeMap<String, Bucket> = BTreeMap::new();

	for (locality, lb) in pairs {
		let label = locality.label();
		buckets
			.entry(label)
			.or_insert_with(|| Bucket {
				locality: wire_locality(&locality),
				endpoints: Vec::new(),
			})
			.endpoints
			.push(lb);
	}

	if buckets.is_empty() {
		ctx.add_metric(MetricKind::NoInstances, service_hostname);
		return Vec::new();
	}

	buckets
		.into_iter()
		.map(|(label, bucket)| {
			let mut total: u32 = 0;
			let mut overflowed = false;
			for ep in &bucket.endpoints {
				let (sum, carry) = total.overflowing_add(ep.load_balancing_weight);
				if carry {
					overflowed = true;
					total = u32::MAX;
				} else {
					total = sum;
				}
			}
			if overflowed {
				warn!(
					service = service_hostname,
					port = service_port,
					locality = label,
					"load balancing weight overflowed, clamping to u32::MAX"
				);
			}

			LocalityLbEndpoints {
				locality: bucket.locality,
				lb_endpoints: bucket.endpoints,
				load_balancing_weight: total,
				priority: 0,
			}
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_support::StubPushContext;
	use mesh_xds::{Address, HealthStatus, Metadata};

	fn lb(weight: u32) -> LbEndpoint {
		LbEndpoint {
			health_status: HealthStatus::Healthy,
			load_balancing_weight: weight,
			address: Address::socket("10.0.0.1".parse().unwrap(), 9080),
			metadata: Metadata::default(),
		}
	}

	fn locality(region: &str, zone: &str, subzone: &str) -> Locality {
		Locality {
			region: region.into(),
			zone: zone.into(),
			subzone: subzone.into(),
			cluster_id: "cluster1".into(),
		}
	}

	#[test]
	fn empty_input_publishes_no_instances_metric() {
		let ctx = StubPushContext::default();
		let groups = aggregate(&ctx, "reviews.default.svc", 9080, Vec::new());
		assert!(groups.is_empty());
		assert_eq!(ctx.metrics.lock().unwrap().len(), 1);
	}

	#[test]
	fn localities_sorted_lexicographically() {
		let ctx = StubPushContext::default();
		let pairs = vec![
			(locality("us-west", "a", "1"), lb(1)),
			(locality("us-east", "a", "1"), lb(1)),
		];
		let groups = aggregate(&ctx, "reviews.default.svc", 9080, pairs);
		assert_eq!(groups.len(), 2);
		assert_eq!(groups[0].locality.region, "us-east");
		assert_eq!(groups[1].locality.region, "us-west");
	}

	#[test]
	fn weight_overflow_saturates_and_logs() {
		let ctx = StubPushContext::default();
		let pairs = vec![
			(locality("us-east", "a", "1"), lb(0x9000_0000)),
			(locality("us-east", "a", "1"), lb(0x9000_0000)),
		];
		let groups = aggregate(&ctx, "reviews.default.svc", 9080, pairs);
		assert_eq!(groups.len(), 1);
		assert_eq!(groups[0].load_balancing_weight, u32::MAX);
	}
}
