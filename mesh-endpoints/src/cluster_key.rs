//! Parses the wire cluster-name format `<direction>|<port>|<subset>|<host>`
//! into its constituent parts.

use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	Inbound,
	Outbound,
	InboundVip,
}

impl Direction {
	fn parse(s: &str) -> Option<Direction> {
		match s {
			"inbound" => Some(Direction::Inbound),
			"outbound" => Some(Direction::Outbound),
			"inbound-vip" => Some(Direction::InboundVip),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterKey {
	pub direction: Direction,
	pub port: u16,
	pub subset: String,
	pub host: String,
}

/// Decomposes a cluster name. Malformed input fails silently: this is a
/// routine condition (a CDS-only or static cluster name reaching EDS code
/// paths), not something an operator needs paged for, so the miss is
/// logged at `trace` and absorbed by the caller's `ServiceFound` check.
pub fn parse(cluster_name: &str) -> Option<ClusterKey> {
	let mut parts = cluster_name.splitn(4, '|');
	let direction = parts.next()?;
	let port = parts.next()?;
	let subset = parts.next()?;
	let host = parts.next()?;

	let direction = match Direction::parse(direction) {
		Some(d) => d,
		None => {
			trace!(cluster_name, "unrecognized cluster direction");
			return None;
		}
	};
	let port: u16 = match port.parse() {
		Ok(p) if p != 0 => p,
		_ => {
			trace!(cluster_name, "missing or zero port in cluster name");
			return None;
		}
	};

	Some(ClusterKey {
		direction,
		port,
		subset: subset.to_string(),
		host: host.to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_outbound_with_subset() {
		let k = parse("outbound|9080|v1|reviews.default.svc").unwrap();
		assert_eq!(k.direction, Direction::Outbound);
		assert_eq!(k.port, 9080);
		assert_eq!(k.subset, "v1");
		assert_eq!(k.host, "reviews.default.svc");
	}

	#[test]
	fn parses_empty_subset() {
		let k = parse("inbound|9080||reviews.default.svc").unwrap();
		assert_eq!(k.subset, "");
	}

	#[test]
	fn rejects_zero_port() {
		assert!(parse("outbound|0|v1|reviews.default.svc").is_none());
	}

	#[test]
	fn rejects_unknown_direction() {
		assert!(parse("sideways|9080|v1|reviews.default.svc").is_none());
	}

	#[test]
	fn rejects_missing_fields() {
		assert!(parse("outbound|9080").is_none());
	}
}
