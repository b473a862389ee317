use serde::Serialize;

/// The size in bytes of a double-precision matrix element
const ELEMENT_BYTES: f64 = 8.0;

/// The default ratio applied to the matrix dimension
pub(crate) const DEFAULT_RATIO: f64 = 0.8;

/// The user-facing form of the memory share knob
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MemoryShare {
	/// A linear scale on the matrix dimension, squared to get the share
	Ratio(f64),
	/// A percentage of the total memory
	Percent(f64),
}

impl Default for MemoryShare {
	fn default() -> Self {
		Self::Ratio(DEFAULT_RATIO)
	}
}

impl MemoryShare {
	/// The fraction of the total memory which the matrix should occupy
	pub(crate) fn fraction(&self) -> f64 {
		match self {
			Self::Ratio(r) => r * r,
			Self::Percent(p) => p / 100.0,
		}
	}
}

/// A fully resolved problem description
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct Problem {
	/// The number of compute nodes
	pub(crate) nodes: u32,
	/// The memory available on each node in KiB
	pub(crate) ram_per_node_kib: f64,
	/// The fraction of the total memory to target
	pub(crate) mem_fraction: f64,
	/// The blocking factor which N must be a multiple of
	pub(crate) block_size: u32,
}

/// The computed problem size along with its intermediate quantities
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct Sizing {
	/// The memory across all nodes in bytes
	pub(crate) total_memory_bytes: f64,
	/// The matrix dimension before block alignment
	pub(crate) elements: u64,
	/// The number of whole blocks which fit in the dimension
	pub(crate) blocks: u64,
	/// The final block-aligned matrix dimension
	pub(crate) n: u64,
}

impl Problem {
	/// Calculate the largest block-aligned N for this problem
	pub(crate) fn size(&self) -> Sizing {
		let total_memory_bytes = self.nodes as f64 * self.ram_per_node_kib * 1024.0;
		// Degenerate budgets yield an empty problem
		let budget = self.mem_fraction * total_memory_bytes;
		let elements = if budget > 0.0 {
			(budget / ELEMENT_BYTES).sqrt().round() as u64
		} else {
			0
		};
		let blocks = match self.block_size {
			0 => 0,
			nb => elements / nb as u64,
		};
		Sizing {
			total_memory_bytes,
			elements,
			blocks,
			n: blocks * self.block_size as u64,
		}
	}
}

/// Calculate N for the given node count, memory, fraction and block size
pub(crate) fn compute(
	nodes: u32,
	ram_per_node_kib: f64,
	mem_fraction: f64,
	block_size: u32,
) -> u64 {
	Problem {
		nodes,
		ram_per_node_kib,
		mem_fraction,
		block_size,
	}
	.size()
	.n
}

#[cfg(test)]
mod test {
	use super::*;

	const GIB_IN_KIB: f64 = 1024.0 * 1024.0;

	fn raw_elements(nodes: u32, kib: f64, fraction: f64) -> u64 {
		let total = nodes as f64 * kib * 1024.0;
		(fraction * total / 8.0).sqrt().round() as u64
	}

	#[test]
	fn test_two_nodes_default_ratio() {
		let fraction = MemoryShare::default().fraction();
		let sizing = Problem {
			nodes: 2,
			ram_per_node_kib: 128.0 * GIB_IN_KIB,
			mem_fraction: fraction,
			block_size: 192,
		}
		.size();
		assert_eq!(sizing.total_memory_bytes, 2.0 * 128.0 * 1024.0 * 1024.0 * 1024.0);
		assert_eq!(sizing.elements, 148291);
		assert_eq!(sizing.blocks, 772);
		assert_eq!(sizing.n, 148224);
	}

	#[test]
	fn test_percent_share_scales_dimension() {
		let kib = 128.0 * GIB_IN_KIB;
		let ratio = Problem {
			nodes: 1,
			ram_per_node_kib: kib,
			mem_fraction: MemoryShare::Ratio(0.8).fraction(),
			block_size: 192,
		}
		.size();
		let percent = Problem {
			nodes: 1,
			ram_per_node_kib: kib,
			mem_fraction: MemoryShare::Percent(30.0).fraction(),
			block_size: 192,
		}
		.size();
		assert_eq!(ratio.elements, 104858);
		assert_eq!(ratio.n, 104832);
		assert_eq!(percent.elements, 71791);
		assert_eq!(percent.n, 71616);
		let expected = ratio.elements as f64 * (0.30f64 / 0.64).sqrt();
		assert!((percent.elements as f64 - expected).abs() < 1.0);
	}

	#[test]
	fn test_unit_block_size_keeps_raw_elements() {
		let kib = 128.0 * GIB_IN_KIB;
		assert_eq!(compute(1, kib, 0.30, 1), 71791);
		assert_eq!(compute(1, 1024.0, 0.64, 1), raw_elements(1, 1024.0, 0.64));
	}

	#[test]
	fn test_wide_block_size() {
		assert_eq!(compute(1, 16.0 * GIB_IN_KIB, 0.64, 384), 36864);
	}

	#[test]
	fn test_degenerate_inputs() {
		assert_eq!(compute(1, 128.0 * GIB_IN_KIB, 0.0, 192), 0);
		assert_eq!(compute(1, 0.0, 0.64, 192), 0);
		assert_eq!(compute(1, -1024.0, 0.64, 192), 0);
		assert_eq!(compute(1, f64::NAN, 0.64, 192), 0);
		assert_eq!(compute(1, 1024.0, 0.64, 0), 0);
	}

	#[test]
	fn test_share_fractions() {
		assert_eq!(MemoryShare::Percent(30.0).fraction(), 0.3);
		assert_eq!(MemoryShare::Ratio(0.5).fraction(), 0.25);
		assert_eq!(MemoryShare::Ratio(1.0).fraction(), 1.0);
		assert_eq!(MemoryShare::default(), MemoryShare::Ratio(DEFAULT_RATIO));
	}

	#[test]
	fn test_result_is_block_aligned_and_bounded() {
		for nodes in [1, 2, 3, 7, 16, 128] {
			for gib in [0.5, 1.0, 3.0, 16.0, 96.0, 512.0] {
				for fraction in [0.01, 0.25, 0.5, 0.64, 0.81, 1.0] {
					for nb in [1, 64, 192, 232, 384, 1000] {
						let kib = gib * GIB_IN_KIB;
						let n = compute(nodes, kib, fraction, nb);
						let raw = raw_elements(nodes, kib, fraction);
						assert_eq!(n % nb as u64, 0);
						assert!(n <= raw);
						assert!(raw - n < nb as u64);
					}
				}
			}
		}
	}

	#[test]
	fn test_repeated_calls_agree() {
		let first = compute(3, 48.0 * GIB_IN_KIB, 0.7, 192);
		let second = compute(3, 48.0 * GIB_IN_KIB, 0.7, 192);
		assert_eq!(first, second);
	}

	#[test]
	fn test_monotonic_in_every_input() {
		let kib = 8.0 * GIB_IN_KIB;
		let mut last = 0;
		for step in 1..=100 {
			let n = compute(1, kib, step as f64 / 100.0, 192);
			assert!(n >= last);
			last = n;
		}
		let mut last = 0;
		for nodes in 1..=64 {
			let n = compute(nodes, kib, 0.64, 192);
			assert!(n >= last);
			last = n;
		}
		let mut last = 0;
		for gib in 1..=256 {
			let n = compute(4, gib as f64 * GIB_IN_KIB, 0.64, 192);
			assert!(n >= last);
			last = n;
		}
	}
}
