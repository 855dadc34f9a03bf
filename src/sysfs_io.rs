//! Typed sysfs I/O (spec §4.2): opens, reads, writes, and parses files
//! described by a [`catalog::Descriptor`], applying unit conversion. Callers
//! are expected to already hold the device's cross-process mutex; this
//! module does no locking of its own.

use crate::catalog::{Descriptor, ParserKind, Unit};
use crate::error::{RsmiError, RsmiResult};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// A parsed frequency-list file: the available frequencies in Hz and the
/// index of the one currently selected.
#[derive(Debug, Clone, Default)]
pub struct FrequencyList {
    pub frequencies_hz: Vec<u64>,
    pub current_index: usize,
    /// True if index 0 is the "deep sleep" entry rather than a real clock.
    pub has_deep_sleep: bool,
}

#[derive(Debug, Clone, Default)]
pub struct OverDriveCurve {
    pub sclk_min_max: (u64, u64),
    pub mclk_min_max: (u64, u64),
    pub vddc_points: Vec<(u64, u64)>,
    pub range: HashMap<String, (u64, u64)>,
}

pub(crate) fn read_to_string(path: &Path) -> RsmiResult<String> {
    fs::read_to_string(path).map_err(RsmiError::from_io_access)
}

/// Reads and parses a scalar value (decimal, hex, or a single string line),
/// returning it already unit-converted to the library's canonical units.
pub fn read_scalar_u64(desc: &Descriptor, path: &Path) -> RsmiResult<u64> {
    let content = read_to_string(path)?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(RsmiError::UnexpectedData);
    }

    let raw: u64 = match desc.parser {
        ParserKind::DecimalU64 => trimmed
            .parse()
            .map_err(|_| RsmiError::UnexpectedData)?,
        ParserKind::HexU64 => {
            let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
            u64::from_str_radix(stripped, 16).map_err(|_| RsmiError::UnexpectedData)?
        }
        _ => return Err(RsmiError::Internal("wrong parser for read_scalar_u64".into())),
    };

    Ok(convert_unit(raw, desc.unit))
}

pub fn read_scalar_i64(desc: &Descriptor, path: &Path) -> RsmiResult<i64> {
    let content = read_to_string(path)?;
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(RsmiError::UnexpectedData);
    }
    trimmed.parse().map_err(|_| RsmiError::UnexpectedData)
}

pub fn read_string(_desc: &Descriptor, path: &Path) -> RsmiResult<String> {
    let content = read_to_string(path)?;
    let line = content.lines().next().unwrap_or("").trim();
    if line.is_empty() {
        return Err(RsmiError::UnexpectedData);
    }
    Ok(line.to_string())
}

/// Converts a raw value read straight off disk into the library's canonical
/// unit per spec §4.2. Kernel conventions (millidegrees, millivolts,
/// microwatts) already match the canonical units and pass through
/// unchanged; only frequency gets a real conversion, handled separately by
/// the frequency-list parser since it carries its own suffix per line.
fn convert_unit(raw: u64, _unit: Unit) -> u64 {
    raw
}

/// Parses a `pp_dpm_*`-style frequency-list file (spec §4.1 `frequency-list`
/// parser). Exactly one line must be marked current with a trailing `*`; an
/// optional `*:`-prefixed line at index 0 marks "deep sleep" and shifts
/// subsequent indices down by one when reporting `current_index`.
pub fn parse_frequency_list(content: &str) -> RsmiResult<FrequencyList> {
    let mut frequencies_hz = Vec::new();
    let mut current_index = None;
    let mut has_deep_sleep = false;

    for (line_no, raw_line) in content.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }

        let is_deep_sleep_marker = line_no == 0 && line.starts_with('*') && line.contains(':');
        let (index_part, rest) = line.split_once(':').ok_or(RsmiError::UnexpectedData)?;
        let index_part = index_part.trim().trim_start_matches('*');
        let list_index: usize = index_part.parse().map_err(|_| RsmiError::UnexpectedData)?;

        let rest = rest.trim();
        let (freq_str, is_current) = match rest.strip_suffix('*') {
            Some(stripped) => (stripped.trim(), true),
            None => (rest, false),
        };

        let freq_hz = parse_frequency_value(freq_str)?;

        if is_deep_sleep_marker {
            has_deep_sleep = true;
        }

        if frequencies_hz.len() <= list_index {
            frequencies_hz.resize(list_index + 1, 0);
        }
        frequencies_hz[list_index] = freq_hz;

        if is_current {
            if current_index.is_some() {
                return Err(RsmiError::UnexpectedData);
            }
            current_index = Some(list_index);
        }
    }

    let current_index = current_index.ok_or(RsmiError::UnexpectedData)?;
    if frequencies_hz.is_empty() {
        return Err(RsmiError::UnexpectedData);
    }

    Ok(FrequencyList {
        frequencies_hz,
        current_index,
        has_deep_sleep,
    })
}

fn parse_frequency_value(s: &str) -> RsmiResult<u64> {
    let s = s.trim();
    let (number_part, multiplier) = if let Some(p) = strip_suffix_ci(s, "ghz") {
        (p, 1_000_000_000.0)
    } else if let Some(p) = strip_suffix_ci(s, "mhz") {
        (p, 1_000_000.0)
    } else if let Some(p) = strip_suffix_ci(s, "hz") {
        (p, 1.0)
    } else {
        return Err(RsmiError::UnexpectedData);
    };

    let value: f64 = number_part
        .trim()
        .parse()
        .map_err(|_| RsmiError::UnexpectedData)?;
    Ok((value * multiplier).round() as u64)
}

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if s.len() < suffix.len() {
        return None;
    }
    let (head, tail) = s.split_at(s.len() - suffix.len());
    if tail.eq_ignore_ascii_case(suffix) {
        Some(head)
    } else {
        None
    }
}

/// Parses `key: value` multi-line blocks (spec's `key-value-block` parser).
pub fn parse_key_value_block(content: &str) -> RsmiResult<HashMap<String, String>> {
    let mut map = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (k, v) = line.split_once(':').ok_or(RsmiError::UnexpectedData)?;
        map.insert(k.trim().to_string(), v.trim().to_string());
    }
    Ok(map)
}

/// Parses a `pp_od_clk_voltage` file into its structured record (spec's
/// `pp-od-clk-voltage` parser).
pub fn parse_od_clk_voltage(content: &str) -> RsmiResult<OverDriveCurve> {
    let mut curve = OverDriveCurve::default();
    let mut section = "";

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(name) = line.strip_suffix(':') {
            section = match name {
                "OD_SCLK" => "sclk",
                "OD_MCLK" => "mclk",
                "OD_VDDC_CURVE" => "vddc",
                "OD_RANGE" => "range",
                _ => "",
            };
            continue;
        }

        let mut parts = line.split_whitespace();
        let first = parts.next().unwrap_or("");

        match section {
            "sclk" | "mclk" if first == "0" || first == "1" => {
                let freq = parts
                    .next()
                    .and_then(|v| parse_frequency_value(v).ok())
                    .ok_or(RsmiError::UnexpectedData)?;
                let slot = if section == "sclk" {
                    &mut curve.sclk_min_max
                } else {
                    &mut curve.mclk_min_max
                };
                if first == "0" {
                    slot.0 = freq;
                } else {
                    slot.1 = freq;
                }
            }
            "vddc" => {
                if let (Some(f), Some(v)) = (parts.next(), parts.next())
                    && let (Ok(freq), Ok(mv)) = (
                        parse_frequency_value(f),
                        v.trim_end_matches("mV").trim().parse::<u64>(),
                    )
                {
                    curve.vddc_points.push((freq, mv));
                }
            }
            "range" => {
                let key = first;
                if let (Some(lo), Some(hi)) = (parts.next(), parts.next())
                    && let (Ok(lo), Ok(hi)) = (parse_frequency_value(lo), parse_frequency_value(hi))
                {
                    curve.range.insert(key.to_string(), (lo, hi));
                }
            }
            _ => {}
        }
    }

    Ok(curve)
}

/// Reads a binary file (e.g. `gpu_metrics`) into a fresh buffer.
pub fn read_blob(path: &Path) -> RsmiResult<Vec<u8>> {
    fs::read(path).map_err(RsmiError::from_io_access)
}

/// Writes a formatted scalar value, honoring the descriptor's companion
/// write rule if any (spec §4.2: fan-speed and clock-frequency-set write
/// protocols both rely on this).
pub fn write_scalar(desc: &Descriptor, path: &Path, value: &str) -> RsmiResult<()> {
    if let Some(companion) = desc.companion {
        let companion_path = path.with_file_name(companion.file_suffix);
        write_raw(&companion_path, companion.value)?;
    }
    write_raw(path, value)
}

/// Writes a space-separated bitmask of selected indices, e.g. for
/// `pp_dpm_sclk` clock-enable masks.
pub fn write_mask(path: &Path, bitmask: u64) -> RsmiResult<()> {
    let indices: Vec<String> = (0..64)
        .filter(|bit| bitmask & (1 << bit) != 0)
        .map(|bit| bit.to_string())
        .collect();
    write_raw(path, &indices.join(" "))
}

fn write_raw(path: &Path, value: &str) -> RsmiResult<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .open(path)
        .map_err(RsmiError::from_io_access)?;
    file.write_all(value.as_bytes())
        .map_err(RsmiError::from_io_access)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_typical_frequency_list() {
        let content = "0: 300Mhz\n1: 600Mhz *\n2: 900Mhz\n";
        let list = parse_frequency_list(content).unwrap();
        assert_eq!(list.frequencies_hz, vec![300_000_000, 600_000_000, 900_000_000]);
        assert_eq!(list.current_index, 1);
        assert!(!list.has_deep_sleep);
    }

    #[test]
    fn parses_deep_sleep_entry() {
        let content = "*0: 0Mhz\n1: 300Mhz\n2: 600Mhz *\n";
        let list = parse_frequency_list(content).unwrap();
        assert!(list.has_deep_sleep);
        assert_eq!(list.current_index, 2);
    }

    #[test]
    fn rejects_list_with_no_current_marker() {
        let content = "0: 300Mhz\n1: 600Mhz\n";
        assert!(matches!(
            parse_frequency_list(content),
            Err(RsmiError::UnexpectedData)
        ));
    }

    #[test]
    fn rejects_blank_file() {
        assert!(matches!(
            parse_frequency_list(""),
            Err(RsmiError::UnexpectedData)
        ));
    }

    #[test]
    fn parses_key_value_block() {
        let content = "correctable: 3\nuncorrectable: 0\n";
        let map = parse_key_value_block(content).unwrap();
        assert_eq!(map.get("correctable").unwrap(), "3");
    }

    #[test]
    fn parses_od_clk_voltage() {
        let content = "OD_SCLK:\n0: 500Mhz\n1: 1800Mhz\nOD_MCLK:\n1: 1100Mhz\nOD_RANGE:\nSCLK: 500Mhz 2000Mhz\n";
        let curve = parse_od_clk_voltage(content).unwrap();
        assert_eq!(curve.sclk_min_max, (500_000_000, 1_800_000_000));
        assert_eq!(curve.mclk_min_max.1, 1_100_000_000);
        assert_eq!(curve.range.get("SCLK").unwrap(), &(500_000_000, 2_000_000_000));
    }
}
