//! Applies locality-aware load balancing — explicit distribution or
//! hierarchy-based failover priorities — to the aggregated locality
//! groups, relative to the requesting proxy's own locality (§4.9).
//!
//! Operates on an owned `Vec<LocalityLbEndpoints>` (the caller is
//! expected to have already cloned it out of any cache) so nothing here
//! can mutate a cached sub-object shared with a prior build.

use mesh_discovery::{Locality, LocalityLbSetting};
use mesh_xds::{Locality as WireLocality, LocalityLbEndpoints};

/// Matches a locality pattern like `region/zone/*` against a wire
/// locality label, where `*` in any position matches the remainder.
fn matches(pattern: &str, label: &WireLocality) -> bool {
	let label_parts = [label.region.as_str(), label.zone.as_str(), label.sub_zone.as_str()];
	for (i, part) in pattern.split('/').enumerate() {
		if part == "*" {
			return true;
		}
		if i >= label_parts.len() || label_parts[i] != part {
			return false;
		}
	}
	true
}

fn apply_distribute(groups: &mut [LocalityLbEndpoints], proxy_label: &str, distribute: &[mesh_discovery::LocalityLbDistribute]) {
	let Some(rule) = distribute.iter().find(|d| matches(d.from.as_str(), &wire_locality_for_label(proxy_label))) else {
		return;
	};

	let total = groups_total_weight(groups);
	for group in groups.iter_mut() {
		let pct = rule
			.to
			.iter()
			.find(|(pattern, _)| matches(pattern.as_str(), &group.locality))
			.map(|(_, pct)| *pct);
		if let Some(pct) = pct {
			group.load_balancing_weight = ((total as u128 * pct as u128) / 100).min(u32::MAX as u128) as u32;
		}
	}
}

fn groups_total_weight(groups: &[LocalityLbEndpoints]) -> u64 {
	groups.iter().map(|g| g.load_balancing_weight as u64).sum()
}

fn wire_locality_for_label(label: &str) -> WireLocality {
	let mut parts = label.splitn(3, '/');
	WireLocality {
		region: parts.next().unwrap_or_default().to_string(),
		zone: parts.next().unwrap_or_default().to_string(),
		sub_zone: parts.next().unwrap_or_default().to_string(),
	}
}

/// Hierarchy tiers: same subzone (0) > same zone (1) > same region (2) >
/// elsewhere (3), further remapped by an explicit `failover` table when
/// present.
fn hierarchy_priority(proxy: &Locality, group: &WireLocality, failover: &[mesh_discovery::LocalityLbFailover]) -> u32 {
	if proxy.subzone.as_str() == group.sub_zone && proxy.zone.as_str() == group.zone && proxy.region.as_str() == group.region {
		return 0;
	}
	if proxy.zone.as_str() == group.zone && proxy.region.as_str() == group.region {
		return 1;
	}
	if proxy.region.as_str() == group.region {
		return 2;
	}
	if let Some(mapped) = failover.iter().find(|f| f.from.as_str() == proxy.region.as_str()) {
		if mapped.to.as_str() == group.region {
			return 2;
		}
	}
	3
}

fn apply_failover(groups: &mut [LocalityLbEndpoints], proxy: &Locality, failover: &[mesh_discovery::LocalityLbFailover]) {
	for group in groups.iter_mut() {
		group.priority = hierarchy_priority(proxy, &group.locality, failover);
	}
}

/// `failover_priority_labels` is the precomputed byte string derived from
/// the proxy's labels and the ordered `FailoverPriority` key list (§4.9).
/// It does not affect tier assignment here; it is mixed into the
/// builder's cache key so that two proxies with different label values
/// get distinct cached CLAs even when their locality hierarchy is
/// identical.
pub fn apply(
	setting: Option<&LocalityLbSetting>,
	proxy_locality: &Locality,
	outlier_detection_enabled: bool,
	mut groups: Vec<LocalityLbEndpoints>,
) -> Vec<LocalityLbEndpoints> {
	let Some(setting) = setting else {
		return groups;
	};

	if !setting.distribute.is_empty() {
		apply_distribute(&mut groups, &proxy_locality.label(), &setting.distribute);
		return groups;
	}

	let failover_configured = !setting.failover.is_empty() || !setting.failover_priority.is_empty();
	if failover_configured && outlier_detection_enabled && setting.enabled {
		apply_failover(&mut groups, proxy_locality, &setting.failover);
	}

	groups
}
