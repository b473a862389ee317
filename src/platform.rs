use log::debug;
use sysinfo::System;

/// The block size used on most hosts
pub(crate) const DEFAULT_BLOCK_SIZE: u32 = 192;

/// The block size used on hosts with 512-bit vector units
pub(crate) const WIDE_BLOCK_SIZE: u32 = 384;

/// Queries about the machine the problem will run on
pub(crate) trait Platform {
	/// The total physical memory of this node in KiB
	fn total_memory_kib(&self) -> Option<f64>;

	/// Whether the CPU advertises AVX-512
	fn has_wide_vectors(&self) -> bool;

	/// The block size to use when none is specified
	fn default_block_size(&self) -> u32 {
		if self.has_wide_vectors() {
			WIDE_BLOCK_SIZE
		} else {
			DEFAULT_BLOCK_SIZE
		}
	}
}

/// The machine this process is running on
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Host;

impl Platform for Host {
	fn total_memory_kib(&self) -> Option<f64> {
		// Only the memory figures need to be loaded
		let mut system = System::new();
		system.refresh_memory();
		// Get the total system memory in bytes
		let total_memory = system.total_memory();
		debug!("Detected {total_memory} bytes of total memory");
		match total_memory {
			0 => None,
			bytes => Some(bytes as f64 / 1024.0),
		}
	}

	#[cfg(target_arch = "x86_64")]
	fn has_wide_vectors(&self) -> bool {
		let detected = std::arch::is_x86_feature_detected!("avx512f");
		debug!("AVX-512 support detected: {detected}");
		detected
	}

	#[cfg(not(target_arch = "x86_64"))]
	fn has_wide_vectors(&self) -> bool {
		false
	}
}

/// A machine with known characteristics
#[cfg(test)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct Fixed {
	/// The memory per node in KiB, if known
	pub(crate) memory_kib: Option<f64>,
	/// Whether the machine has 512-bit vector units
	pub(crate) wide_vectors: bool,
}

#[cfg(test)]
impl Platform for Fixed {
	fn total_memory_kib(&self) -> Option<f64> {
		self.memory_kib
	}

	fn has_wide_vectors(&self) -> bool {
		self.wide_vectors
	}
}
