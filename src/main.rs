#[macro_use]
extern crate lazy_static;

use std::error;
use std::io;
use std::io::Read;
use std::str::FromStr;

use cpu_information::{CpuInformation, CpuidResult};
use dump_parse::{format_line, CpuidDump};
use features::Feature;
use session::CpuidSession;

mod cpu_information;
mod dump_parse;
mod exec_mem;
mod features;
mod opcodes;
mod session;

type Result<T> = std::result::Result<T, Box<dyn error::Error>>;

/// The base leaves of the standard and extended numbering ranges.
/// Querying a base leaf returns the highest valid leaf of its range in
/// eax.
const RANGE_BASES: [u32; 2] = [0x0, 0x8000_0000];

/// An eax this far above its range base is garbage from a CPU that
/// does not implement the range, not a real leaf count.
const MAX_RANGE_SPAN: u32 = 0x100;

fn tristate_to_str(tristate: Option<bool>) -> &'static str {
    match tristate {
        Some(true) => "Yes",
        Some(false) => "--",
        None => "?",
    }
}

fn features() -> Vec<Feature> {
    use cpu_information::CpuidRegister::*;
    use features::BoolExpression::*;
    vec![
        Feature::new("MMX", CpuidBitSet(1, Edx, 23)),
        Feature::new("SSE", CpuidBitSet(1, Edx, 25)),
        Feature::new("SSE2", CpuidBitSet(1, Edx, 26)),
        Feature::new("SSE3", CpuidBitSet(1, Ecx, 0)),
        Feature::new("SSSE3", CpuidBitSet(1, Ecx, 9)),
        Feature::new("SSE4.1", CpuidBitSet(1, Ecx, 19)),
        Feature::new("SSE4.2", CpuidBitSet(1, Ecx, 20)),
        Feature::new("SSE4a", CpuidBitSet(0x8000_0001, Ecx, 6)),
        Feature::new("AVX", CpuidBitSet(1, Ecx, 28)),
        Feature::new("AVX2", CpuidBitSet(7, Ebx, 5)),
        Feature::new("BMI1", CpuidBitSet(7, Ebx, 3)),
        Feature::new("BMI2", CpuidBitSet(7, Ebx, 8)),
        Feature::new("SHA", CpuidBitSet(7, Ebx, 29)),
    ]
}

/// Walk both leaf ranges, probing each base leaf first to learn the
/// iteration bound.
fn enumerate_leaves(cpu: &CpuidSession) -> Vec<(u32, CpuidResult)> {
    let mut rows = Vec::new();

    for &base in RANGE_BASES.iter() {
        let highest = cpu.query(base).eax;
        if highest < base || highest - base >= MAX_RANGE_SPAN {
            continue;
        }

        for leaf in base..=highest {
            rows.push((leaf, cpu.query(leaf)));
        }
    }

    rows
}

fn print_report(cpu: &dyn CpuInformation, rows: &[(u32, CpuidResult)]) {
    let unknown = "Unknown".to_owned();

    println!(
        "Vendor ID : {}",
        cpu.vendor_name().unwrap_or_else(|| unknown.clone())
    );
    println!("CPU name  : {}", cpu.model_name().unwrap_or(unknown));
    println!();

    for (leaf, result) in rows.iter() {
        println!("{}", format_line(*leaf, result));
    }
    println!();

    for feature in features().into_iter() {
        println!(
            "{:10}: {}",
            feature.name,
            tristate_to_str(feature.is_present(cpu)),
        );
    }
}

/// Query the host CPU and print the report.
fn live_report() -> Result<()> {
    let cpu = CpuidSession::new()?;
    let rows = enumerate_leaves(&cpu);

    print_report(&cpu, &rows);

    Ok(())
}

/// Re-print the report from a dump on stdin instead of the hardware.
fn decode_report() -> Result<()> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;

    let dump = CpuidDump::from_str(&input)?;
    let rows: Vec<(u32, CpuidResult)> = dump.cpuid.iter().map(|(l, r)| (*l, *r)).collect();

    print_report(&dump, &rows);

    Ok(())
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);

    match args.next().as_deref() {
        None => live_report(),
        Some("--decode") => decode_report(),
        Some(other) => Err(format!("Unknown argument '{}' (expected --decode)", other).into()),
    }
}
