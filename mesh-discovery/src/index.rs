use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use itertools::Itertools;
use strng::Strng;

use crate::types::{IstioEndpoint, NamespacedHostname};

/// Endpoints for one service, bucketed by the cluster that discovered
/// them. Mirrors the upstream `source_cluster -> []Endpoint` grouping so
/// that a single service's shards can be merged without touching any
/// other service's data.
#[derive(Debug, Default)]
pub struct EndpointShards {
	inner: RwLock<HashMap<Strng, Vec<Arc<IstioEndpoint>>>>,
}

impl EndpointShards {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn replace_cluster(&self, source_cluster: Strng, endpoints: Vec<Arc<IstioEndpoint>>) {
		self.inner.write().unwrap().insert(source_cluster, endpoints);
	}

	pub fn remove_cluster(&self, source_cluster: &str) {
		self.inner.write().unwrap().remove(source_cluster);
	}

	/// Snapshot of all endpoints across every contributing cluster, in a
	/// stable order (clusters sorted by name, so repeated builds over an
	/// unchanged shard map produce byte-identical output).
	pub fn snapshot(&self) -> Vec<Arc<IstioEndpoint>> {
		self
			.inner
			.read()
			.unwrap()
			.iter()
			.sorted_by_key(|(k, _)| (*k).clone())
			.flat_map(|(_, v)| v.iter().cloned())
			.collect()
	}

	pub fn is_empty(&self) -> bool {
		self.inner.read().unwrap().values().all(|v| v.is_empty())
	}
}

/// The full per-proxy-visible endpoint table: `NamespacedHostname ->
/// EndpointShards`. Guarded by a single `RwLock` on the assumption that
/// reads (CLA builds) vastly outnumber writes (discovery updates),
/// following the store's many-readers/infrequent-writers access pattern.
#[derive(Debug, Default)]
pub struct EndpointIndex {
	inner: RwLock<HashMap<NamespacedHostname, Arc<EndpointShards>>>,
}

impl EndpointIndex {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns the shards for `host`, creating an empty entry if none
	/// exists yet, and whether the entry was already present.
	pub fn shards_for_service(&self, host: &NamespacedHostname) -> (Arc<EndpointShards>, bool) {
		if let Some(existing) = self.inner.read().unwrap().get(host) {
			return (existing.clone(), true);
		}
		let mut guard = self.inner.write().unwrap();
		if let Some(existing) = guard.get(host) {
			return (existing.clone(), true);
		}
		let shards = Arc::new(EndpointShards::new());
		guard.insert(host.clone(), shards.clone());
		(shards, false)
	}

	pub fn get(&self, host: &NamespacedHostname) -> Option<Arc<EndpointShards>> {
		self.inner.read().unwrap().get(host).cloned()
	}

	pub fn remove(&self, host: &NamespacedHostname) {
		self.inner.write().unwrap().remove(host);
	}

	/// A stable, sorted snapshot of every known service key. Used by
	/// periodic full-resync paths rather than the single-service build
	/// hot path.
	pub fn keys(&self) -> Vec<NamespacedHostname> {
		self
			.inner
			.read()
			.unwrap()
			.keys()
			.sorted_by_key(|k| (k.namespace.clone(), k.hostname.clone()))
			.cloned()
			.collect()
	}

	pub fn len(&self) -> usize {
		self.inner.read().unwrap().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}
