//! Subset label lookup and traffic-policy merge across a consolidated
//! destination rule, a port scope, and a subset.

use mesh_discovery::{DestinationRule, LocalityLbSetting, TrafficPolicy};
use std::collections::HashMap;
use strng::Strng;

#[derive(Debug, Clone, Default)]
pub struct ResolvedPolicy {
	pub outlier_detection_enabled: bool,
	pub load_balancer: Option<LocalityLbSetting>,
	pub tls_configured: bool,
}

fn merge_tls(base: &mut TrafficPolicy, over: &TrafficPolicy) {
	if over.tls.is_some() {
		base.tls = over.tls.clone();
	}
	if over.outlier_detection_enabled {
		base.outlier_detection_enabled = true;
	}
	if over.load_balancer.is_some() {
		base.load_balancer = over.load_balancer.clone();
	}
}

/// Resolves the effective policy for a `(port, subset)` pair: rule-level
/// policy, then the port-scoped override, then the subset's own policy,
/// each merged on top of the last (§4.3).
pub fn resolve(rule: Option<&DestinationRule>, port: u16, subset: &str) -> ResolvedPolicy {
	let Some(rule) = rule else {
		return ResolvedPolicy::default();
	};

	let mut policy = rule.traffic_policy.clone();
	if let Some(port_policy) = rule.port_traffic_policy.get(&port) {
		merge_tls(&mut policy, port_policy);
	}
	if let Some(sub) = rule.subset(subset) {
		if let Some(sub_policy) = &sub.traffic_policy {
			merge_tls(&mut policy, sub_policy);
		}
	}

	ResolvedPolicy {
		outlier_detection_enabled: policy.outlier_detection_enabled,
		load_balancer: policy.load_balancer,
		tls_configured: policy.tls.is_some_and(|t| t.mode_enabled),
	}
}

/// Returns the subset's label selector, or `None` if the subset name is
/// empty, the rule is absent, or the subset carries no labels (§4.3).
pub fn subset_labels<'a>(rule: Option<&'a DestinationRule>, subset: &str) -> Option<&'a HashMap<Strng, Strng>> {
	if subset.is_empty() {
		return None;
	}
	let labels = rule?.subset_labels(subset)?;
	if labels.is_empty() {
		return None;
	}
	Some(labels)
}
