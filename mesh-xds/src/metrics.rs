use mesh_core::metrics::Recorder;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

pub struct Metrics {
	pub no_instances: Family<ClusterLabel, Counter>,
	pub weight_overflow: Family<LocalityLabel, Counter>,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct ClusterLabel {
	pub cluster: String,
}

#[derive(Clone, Hash, Debug, PartialEq, Eq, EncodeLabelSet)]
pub struct LocalityLabel {
	pub service: String,
	pub port: String,
	pub locality: String,
}

impl Metrics {
	pub fn new(registry: &mut Registry) -> Self {
		let no_instances = Family::default();
		registry.register(
			"cluster_no_instances",
			"Number of builds that produced an empty cluster load assignment",
			no_instances.clone(),
		);

		let weight_overflow = Family::default();
		registry.register(
			"locality_weight_overflow",
			"Number of times a locality's summed load balancing weight saturated at u32::MAX",
			weight_overflow.clone(),
		);

		Self {
			no_instances,
			weight_overflow,
		}
	}
}

impl Recorder<ClusterLabel, u64> for Metrics {
	fn record(&self, event: &ClusterLabel, count: u64) {
		self.no_instances.get_or_create(event).inc_by(count);
	}
}

impl Recorder<LocalityLabel, u64> for Metrics {
	fn record(&self, event: &LocalityLabel, count: u64) {
		self.weight_overflow.get_or_create(event).inc_by(count);
	}
}
