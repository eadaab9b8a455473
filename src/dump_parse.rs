//! # CPUID Dump Round-Trip
//!
//! The CLI prints one line per leaf in the form
//!
//! ```text
//! CPUID 00000000: 00000016-756E6547-6C65746E-49656E69
//! ```
//!
//! This module formats those lines and parses them back, so a dump
//! saved on one machine can be analyzed on another without touching
//! the hardware again. Lines that do not look like CPUID lines are
//! skipped, which keeps dumps with surrounding report text parseable.

pub use std::collections::BTreeMap as Map;
use std::str::FromStr;

use regex::Regex;

use crate::cpu_information::{CpuInformation, CpuidResult};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseCpuidDumpError {}

impl std::fmt::Display for ParseCpuidDumpError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "Failed to parse CPUID dump")
    }
}

impl std::error::Error for ParseCpuidDumpError {}

/// A set of CPUID leaves read back from a dump.
#[derive(Debug, Clone)]
pub struct CpuidDump {
    pub cpuid: Map<u32, CpuidResult>,
}

/// Format one leaf as a dump line.
pub fn format_line(leaf: u32, result: &CpuidResult) -> String {
    format!(
        "CPUID {:08X}: {:08X}-{:08X}-{:08X}-{:08X}",
        leaf, result.eax, result.ebx, result.ecx, result.edx
    )
}

/// Parse a hex string to an `u32`.
///
/// **Note:** This function assumes correct input and will panic if
/// the string cannot be parsed.
fn hex_as_u32(input: &str) -> u32 {
    u32::from_str_radix(input, 16).expect("can't parse input after regex matched")
}

/// Parse a CPUID line or return [None].
fn try_match_cpuid(input: &str) -> Option<(u32, CpuidResult)> {
    lazy_static! {
        static ref CPUID_RE: Regex =
            Regex::new(r"^CPUID ([0-9a-fA-F]{1,8}): ([0-9a-fA-F]{8})-([0-9a-fA-F]{8})-([0-9a-fA-F]{8})-([0-9a-fA-F]{8})\s*$").expect("a valid regex");
    }

    let matches = CPUID_RE.captures(input)?;

    Some((
        hex_as_u32(matches.get(1).expect("CPUID leaf match").as_str()),
        CpuidResult {
            eax: hex_as_u32(matches.get(2).expect("CPUID eax match").as_str()),
            ebx: hex_as_u32(matches.get(3).expect("CPUID ebx match").as_str()),
            ecx: hex_as_u32(matches.get(4).expect("CPUID ecx match").as_str()),
            edx: hex_as_u32(matches.get(5).expect("CPUID edx match").as_str()),
        },
    ))
}

impl FromStr for CpuidDump {
    type Err = ParseCpuidDumpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Non-matching lines are discarded. A later line for the same
        // leaf wins, matching how repeated queries would behave.
        let cpuid: Map<u32, CpuidResult> = s.lines().filter_map(try_match_cpuid).collect();

        // An input without a single CPUID line is not a dump.
        if cpuid.is_empty() {
            return Err(ParseCpuidDumpError {});
        }

        Ok(CpuidDump { cpuid })
    }
}

impl CpuInformation for CpuidDump {
    fn cpuid(&self, leaf: u32) -> Option<CpuidResult> {
        self.cpuid.get(&leaf).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_hex_numbers() {
        assert_eq!(hex_as_u32("65746E49"), 0x65746E49);
        assert_eq!(hex_as_u32("0"), 0);
    }

    #[test]
    fn cpuid_is_recognized() {
        assert_eq!(try_match_cpuid(""), None);
        assert_eq!(try_match_cpuid("Random other input"), None);
        assert_eq!(try_match_cpuid("CPUID 00000000: garbage"), None);

        assert_eq!(
            try_match_cpuid("CPUID 00000000: 00000016-756E6547-6C65746E-49656E69"),
            Some((
                0,
                CpuidResult {
                    eax: 0x16,
                    ebx: 0x756E6547,
                    ecx: 0x6C65746E,
                    edx: 0x49656E69,
                }
            ))
        );

        assert_eq!(
            try_match_cpuid("CPUID 80000000: 80000008-00000000-00000000-00000000"),
            Some((
                0x8000_0000,
                CpuidResult {
                    eax: 0x8000_0008,
                    ebx: 0,
                    ecx: 0,
                    edx: 0,
                }
            ))
        );
    }

    #[test]
    fn formatted_lines_parse_back() {
        let result = CpuidResult {
            eax: 0x000906ED,
            ebx: 0x0E100800,
            ecx: 0x7FFAFBBF,
            edx: 0xBFEBFBFF,
        };

        let line = format_line(1, &result);
        assert_eq!(line, "CPUID 00000001: 000906ED-0E100800-7FFAFBBF-BFEBFBFF");
        assert_eq!(try_match_cpuid(&line), Some((1, result)));
    }

    #[test]
    fn dump_input_is_parsed() {
        let input = "
Vendor ID : GenuineIntel

CPUID 00000000: 00000016-756E6547-6C65746E-49656E69
CPUID 00000001: 000906ED-00100800-7FFAFBBF-BFEBFBFF

SSE       : Yes
";

        let dump = CpuidDump::from_str(input).expect("to be able to parse example input");

        assert_eq!(dump.cpuid.len(), 2);
        assert_eq!(
            dump.cpuid(1).expect("to find CPUID leaf"),
            CpuidResult {
                eax: 0x000906ED,
                ebx: 0x00100800,
                ecx: 0x7FFAFBBF,
                edx: 0xBFEBFBFF,
            }
        );
        assert_eq!(dump.max_standard_leaf(), 0x16);
        assert_eq!(dump.vendor_name(), Some("GenuineIntel".to_owned()));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(CpuidDump::from_str("").is_err());
        assert!(CpuidDump::from_str("no cpuid lines here").is_err());
    }
}
