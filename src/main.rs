use crate::calculator::{MemoryShare, Problem, Sizing};
use crate::platform::{Host, Platform};
use anyhow::{Result, bail};
use bytesize::ByteSize;
use clap::Parser;
use clap::error::ErrorKind;
use log::{debug, info};
use serde::Serialize;
use std::ffi::OsString;
use std::fmt::{Display, Formatter};
use std::io::Write;

mod calculator;
mod platform;

/// The number of KiB in a GiB
const KIB_PER_GIB: f64 = 1024.0 * 1024.0;

#[derive(Parser, Debug)]
#[command(term_width = 0, args_override_self = true)]
#[command(about = "Calculate the HPL problem size N for the available memory")]
pub(crate) struct Args {
	/// Memory per node in GiB (detected from the host when omitted)
	#[arg(short, long, visible_alias = "ramsize", value_parser = parse_memory)]
	pub(crate) mem: Option<f64>,

	/// Number of compute nodes
	#[arg(short = 'N', long, env = "SLURM_NNODES", default_value = "1", value_parser=clap::value_parser!(u32).range(1..))]
	pub(crate) nodes: u32,

	/// Block size NB (384 on hosts with AVX-512, otherwise 192)
	#[arg(short, long, visible_alias = "nb", value_parser=clap::value_parser!(u32).range(1..))]
	pub(crate) block: Option<u32>,

	/// Share of the total memory to use, in percent
	#[arg(short = 'p', long, value_parser = parse_percent, overrides_with = "ratio")]
	pub(crate) memshare: Option<f64>,

	/// Ratio applied to the matrix dimension, squared to give the memory share [default: 0.8]
	#[arg(short, long, value_parser = parse_ratio, overrides_with = "memshare")]
	pub(crate) ratio: Option<f64>,

	/// Print the intermediate quantities of the calculation
	#[arg(short = 'v', long, visible_alias = "verbose")]
	pub(crate) debug: bool,

	/// Print the calculation as JSON
	#[arg(long)]
	pub(crate) json: bool,
}

impl Args {
	/// The memory share, from whichever of the share flags came last
	fn share(&self) -> MemoryShare {
		match (self.memshare, self.ratio) {
			(Some(percent), _) => MemoryShare::Percent(percent),
			(None, Some(ratio)) => MemoryShare::Ratio(ratio),
			(None, None) => MemoryShare::default(),
		}
	}

	/// Resolve the defaults and detected values into a problem
	fn resolve(&self, platform: &impl Platform) -> Result<(Problem, MemorySource)> {
		// Use the specified memory, or ask the platform
		let (ram_per_node_kib, source) = match self.mem {
			Some(gib) => (gib * KIB_PER_GIB, MemorySource::Specified),
			None => match platform.total_memory_kib() {
				Some(kib) => (kib, MemorySource::Detected),
				None => bail!("Unable to determine the memory size of this node, specify it with --mem"),
			},
		};
		if !(ram_per_node_kib.is_finite() && ram_per_node_kib > 0.0) {
			bail!("Invalid memory size: {ram_per_node_kib} KiB");
		}
		// Derive the memory fraction
		let mem_fraction = self.share().fraction();
		if !(mem_fraction > 0.0 && mem_fraction <= 1.0) {
			bail!("Invalid memory share: {mem_fraction}");
		}
		// Use the specified block size, or the platform default
		let block_size = match self.block {
			Some(nb) => nb,
			None => {
				let nb = platform.default_block_size();
				debug!("Using default block size {nb}");
				nb
			}
		};
		// Return the problem
		Ok((
			Problem {
				nodes: self.nodes,
				ram_per_node_kib,
				mem_fraction,
				block_size,
			},
			source,
		))
	}
}

/// Where the memory size per node came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum MemorySource {
	Detected,
	Specified,
}

/// The full calculation, for verbose and JSON output
#[derive(Debug, Serialize)]
pub(crate) struct Report {
	#[serde(flatten)]
	problem: Problem,
	memory_source: MemorySource,
	share: MemoryShare,
	#[serde(flatten)]
	sizing: Sizing,
}

impl Report {
	fn new(problem: Problem, memory_source: MemorySource, share: MemoryShare) -> Self {
		Self {
			problem,
			memory_source,
			share,
			sizing: problem.size(),
		}
	}
}

impl Display for Report {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		let memory = ByteSize((self.problem.ram_per_node_kib * 1024.0) as u64);
		let total = ByteSize(self.sizing.total_memory_bytes as u64);
		writeln!(f, "Nodes:            {}", self.problem.nodes)?;
		writeln!(f, "Memory per node:  {memory} ({:?})", self.memory_source)?;
		match self.share {
			MemoryShare::Ratio(r) => {
				writeln!(f, "Memory share:     {:.4} (ratio {r})", self.problem.mem_fraction)?
			}
			MemoryShare::Percent(p) => {
				writeln!(f, "Memory share:     {:.4} ({p}%)", self.problem.mem_fraction)?
			}
		}
		writeln!(f, "Total memory:     {total}")?;
		writeln!(f, "Elements:         {}", self.sizing.elements)?;
		writeln!(f, "Block size:       {}", self.problem.block_size)?;
		write!(f, "N:                {}", self.sizing.n)
	}
}

/// Parse a memory size in GiB
fn parse_memory(value: &str) -> Result<f64> {
	let gib: f64 = value.trim().parse()?;
	if !(gib.is_finite() && gib > 0.0) {
		bail!("memory size must be greater than 0");
	}
	Ok(gib)
}

/// Parse a memory share in percent
fn parse_percent(value: &str) -> Result<f64> {
	let percent: f64 = value.trim().trim_end_matches('%').parse()?;
	if !(percent > 0.0 && percent <= 100.0) {
		bail!("memory share must be in the range (0, 100]");
	}
	Ok(percent)
}

/// Parse a matrix dimension ratio
fn parse_ratio(value: &str) -> Result<f64> {
	let ratio: f64 = value.trim().parse()?;
	if !(ratio > 0.0 && ratio <= 1.0) {
		bail!("ratio must be in the range (0, 1]");
	}
	Ok(ratio)
}

/// Rewrite the legacy block size spellings to `--block`
fn normalise<I>(args: I) -> Vec<OsString>
where
	I: IntoIterator<Item = OsString>,
{
	args.into_iter()
		.map(|arg| match arg.to_str() {
			Some(s) if s.starts_with("-NB") => match s[3..].trim_start_matches('=') {
				"" => OsString::from("--block"),
				v => OsString::from(format!("--block={v}")),
			},
			Some(s) if s.starts_with("--block") => match s.split_once('=') {
				Some((_, v)) => OsString::from(format!("--block={v}")),
				None => OsString::from("--block"),
			},
			_ => arg,
		})
		.collect()
}

/// Parse the command line arguments
fn parse_args<I>(args: I) -> Result<Args, clap::Error>
where
	I: IntoIterator<Item = OsString>,
{
	Args::try_parse_from(normalise(args))
}

/// The process exit code for a command line parsing failure
fn exit_code(err: &clap::Error) -> i32 {
	match err.kind() {
		ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
		_ => 1,
	}
}

fn main() -> Result<()> {
	// Initialise the logger
	env_logger::init();
	// Parse the command line arguments
	let args = match parse_args(std::env::args_os()) {
		Ok(args) => args,
		Err(e) => {
			// Help goes to stdout, errors to stderr
			let _ = e.print();
			std::process::exit(exit_code(&e));
		}
	};
	// Run the calculation
	run(&args, &Host, &mut std::io::stdout().lock())
}

fn run(args: &Args, platform: &impl Platform, out: &mut impl Write) -> Result<()> {
	// Resolve the problem configuration
	let (problem, source) = args.resolve(platform)?;
	info!(
		"Sizing for {} node(s) with {} KiB each, share {}, block size {}",
		problem.nodes, problem.ram_per_node_kib, problem.mem_fraction, problem.block_size
	);
	// Output the results
	if args.json {
		let report = Report::new(problem, source, args.share());
		writeln!(out, "{}", serde_json::to_string_pretty(&report)?)?;
	} else if args.debug {
		let report = Report::new(problem, source, args.share());
		writeln!(out, "--------------------------------------------------")?;
		writeln!(out, "{report}")?;
		writeln!(out, "--------------------------------------------------")?;
		writeln!(out, "{}", report.sizing.n)?;
	} else {
		let n = calculator::compute(
			problem.nodes,
			problem.ram_per_node_kib,
			problem.mem_fraction,
			problem.block_size,
		);
		writeln!(out, "{n}")?;
	}
	out.flush()?;
	Ok(())
}
