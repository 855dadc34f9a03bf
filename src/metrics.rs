//! Binary GPU-metrics decoder (spec §4.5). Reads the `gpu_metrics` blob's
//! versioned header, rejects unknown format revisions, and widens older
//! content revisions into one canonical struct using sentinel values for
//! fields the source revision didn't carry.

use crate::error::{RsmiError, RsmiResult};

pub const KNOWN_FORMAT_REVISION: u8 = 1;
const NUM_HBM_INSTANCES: usize = 4;

/// The common 4-byte prefix every `gpu_metrics` revision starts with.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsHeader {
    pub structure_size: u16,
    pub format_revision: u8,
    pub content_revision: u8,
}

/// Canonical, fully-widened metrics snapshot. Fields absent from the
/// on-disk content revision carry the sentinel for their width (`u16::MAX`
/// / `u32::MAX`), matching spec §4.5 step 3.
#[derive(Debug, Clone, Copy)]
pub struct GpuMetrics {
    pub common_header: MetricsHeader,

    pub temperature_edge: u16,
    pub temperature_hotspot: u16,
    pub temperature_mem: u16,
    pub temperature_vrgfx: u16,
    pub temperature_vrsoc: u16,
    pub temperature_vrmem: u16,
    pub temperature_hbm: [u16; NUM_HBM_INSTANCES],

    pub average_gfx_activity: u16,
    pub average_umc_activity: u16,
    pub average_mm_activity: u16,

    pub average_socket_power: u16,
    pub energy_accumulator: u64,

    pub system_clock_counter: u64,

    pub average_gfxclk_frequency: u16,
    pub average_socclk_frequency: u16,
    pub average_uclk_frequency: u16,
    pub average_vclk0_frequency: u16,
    pub average_dclk0_frequency: u16,
    pub average_vclk1_frequency: u16,
    pub average_dclk1_frequency: u16,

    pub current_gfxclk: u16,
    pub current_socclk: u16,
    pub current_uclk: u16,
    pub current_vclk0: u16,
    pub current_dclk0: u16,
    pub current_vclk1: u16,
    pub current_dclk1: u16,

    pub throttle_status: u32,
    pub current_fan_speed: u16,

    pub pcie_link_width: u16,
    pub pcie_link_speed: u16,

    pub gfx_activity_acc: u32,
    pub mem_activity_acc: u32,
}

impl GpuMetrics {
    fn sentinel() -> Self {
        Self {
            common_header: MetricsHeader::default(),
            temperature_edge: u16::MAX,
            temperature_hotspot: u16::MAX,
            temperature_mem: u16::MAX,
            temperature_vrgfx: u16::MAX,
            temperature_vrsoc: u16::MAX,
            temperature_vrmem: u16::MAX,
            temperature_hbm: [u16::MAX; NUM_HBM_INSTANCES],
            average_gfx_activity: u16::MAX,
            average_umc_activity: u16::MAX,
            average_mm_activity: u16::MAX,
            average_socket_power: u16::MAX,
            energy_accumulator: u64::MAX,
            system_clock_counter: u64::MAX,
            average_gfxclk_frequency: u16::MAX,
            average_socclk_frequency: u16::MAX,
            average_uclk_frequency: u16::MAX,
            average_vclk0_frequency: u16::MAX,
            average_dclk0_frequency: u16::MAX,
            average_vclk1_frequency: u16::MAX,
            average_dclk1_frequency: u16::MAX,
            current_gfxclk: u16::MAX,
            current_socclk: u16::MAX,
            current_uclk: u16::MAX,
            current_vclk0: u16::MAX,
            current_dclk0: u16::MAX,
            current_vclk1: u16::MAX,
            current_dclk1: u16::MAX,
            throttle_status: u32::MAX,
            current_fan_speed: u16::MAX,
            pcie_link_width: u16::MAX,
            pcie_link_speed: u16::MAX,
            gfx_activity_acc: u32::MAX,
            mem_activity_acc: u32::MAX,
        }
    }
}

fn read_u16(buf: &[u8], offset: usize) -> RsmiResult<u16> {
    buf.get(offset..offset + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or(RsmiError::UnexpectedSize)
}

fn read_u32(buf: &[u8], offset: usize) -> RsmiResult<u32> {
    buf.get(offset..offset + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(RsmiError::UnexpectedSize)
}

fn read_u64(buf: &[u8], offset: usize) -> RsmiResult<u64> {
    buf.get(offset..offset + 8)
        .map(|b| u64::from_le_bytes(b.try_into().unwrap()))
        .ok_or(RsmiError::UnexpectedSize)
}

/// Reads just the 4-byte header, for content-revision negotiation (P6).
pub fn decode_header(buf: &[u8]) -> RsmiResult<MetricsHeader> {
    if buf.len() < 4 {
        return Err(RsmiError::UnexpectedSize);
    }
    Ok(MetricsHeader {
        structure_size: read_u16(buf, 0)?,
        format_revision: buf[2],
        content_revision: buf[3],
    })
}

/// Size of the on-disk schema for each known content revision: 4-byte
/// header, 30 scalar telemetry fields through `current_dclk1` (64 bytes),
/// `throttle_status` (4), `current_fan_speed`/`pcie_link_width`/
/// `pcie_link_speed`/`padding` (8), `gfx_activity_acc`/`mem_activity_acc`
/// (8), and `temperature_hbm[4]` (8) — 96 bytes total. Revisions 2 and 3 are
/// accepted and widened the same way (additive fields only), since no field
/// this decoder surfaces changed width between them.
fn expected_structure_size(content_revision: u8) -> RsmiResult<usize> {
    match content_revision {
        1..=3 => Ok(96),
        _ => Err(RsmiError::NotSupported),
    }
}

/// Decodes a `gpu_metrics` blob into the canonical struct (spec §4.5).
pub fn decode(buf: &[u8]) -> RsmiResult<GpuMetrics> {
    let header = decode_header(buf)?;

    if header.format_revision != KNOWN_FORMAT_REVISION {
        return Err(RsmiError::UnexpectedData);
    }

    let expected_size = expected_structure_size(header.content_revision)?;
    if usize::from(header.structure_size) != expected_size {
        return Err(RsmiError::UnexpectedSize);
    }
    if buf.len() < expected_size {
        return Err(RsmiError::UnexpectedSize);
    }

    let mut m = GpuMetrics::sentinel();
    m.common_header = header;

    m.temperature_edge = read_u16(buf, 4)?;
    m.temperature_hotspot = read_u16(buf, 6)?;
    m.temperature_mem = read_u16(buf, 8)?;
    m.temperature_vrgfx = read_u16(buf, 10)?;
    m.temperature_vrsoc = read_u16(buf, 12)?;
    m.temperature_vrmem = read_u16(buf, 14)?;

    m.average_gfx_activity = read_u16(buf, 16)?;
    m.average_umc_activity = read_u16(buf, 18)?;
    m.average_mm_activity = read_u16(buf, 20)?;

    m.average_socket_power = read_u16(buf, 22)?;
    m.energy_accumulator = read_u64(buf, 24)?;

    m.system_clock_counter = read_u64(buf, 32)?;

    m.average_gfxclk_frequency = read_u16(buf, 40)?;
    m.average_socclk_frequency = read_u16(buf, 42)?;
    m.average_uclk_frequency = read_u16(buf, 44)?;
    m.average_vclk0_frequency = read_u16(buf, 46)?;
    m.average_dclk0_frequency = read_u16(buf, 48)?;
    m.average_vclk1_frequency = read_u16(buf, 50)?;
    m.average_dclk1_frequency = read_u16(buf, 52)?;

    m.current_gfxclk = read_u16(buf, 54)?;
    m.current_socclk = read_u16(buf, 56)?;
    m.current_uclk = read_u16(buf, 58)?;
    m.current_vclk0 = read_u16(buf, 60)?;
    m.current_dclk0 = read_u16(buf, 62)?;
    m.current_vclk1 = read_u16(buf, 64)?;
    m.current_dclk1 = read_u16(buf, 66)?;

    m.throttle_status = read_u32(buf, 68)?;
    m.current_fan_speed = read_u16(buf, 72)?;
    m.pcie_link_width = read_u16(buf, 74)?;
    m.pcie_link_speed = read_u16(buf, 76)?;
    // offset 78..80 is `padding`, carries no field.
    m.gfx_activity_acc = read_u32(buf, 80)?;
    m.mem_activity_acc = read_u32(buf, 84)?;
    for (i, slot) in m.temperature_hbm.iter_mut().enumerate() {
        *slot = read_u16(buf, 88 + i * 2)?;
    }

    Ok(m)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_buf(content_revision: u8) -> Vec<u8> {
        let mut buf = vec![0u8; 96];
        buf[0..2].copy_from_slice(&96u16.to_le_bytes());
        buf[2] = KNOWN_FORMAT_REVISION;
        buf[3] = content_revision;
        buf[4..6].copy_from_slice(&45_000u16.to_le_bytes()); // edge temp
        buf[88..90].copy_from_slice(&35_000u16.to_le_bytes()); // hbm[0] temp
        buf
    }

    #[test]
    fn header_matches_full_decode() {
        let buf = sample_buf(1);
        let header = decode_header(&buf).unwrap();
        let full = decode(&buf).unwrap();
        assert_eq!(header.structure_size, full.common_header.structure_size);
        assert_eq!(header.format_revision, full.common_header.format_revision);
        assert_eq!(header.content_revision, full.common_header.content_revision);
    }

    #[test]
    fn rejects_unknown_format_revision() {
        let mut buf = sample_buf(1);
        buf[2] = 9;
        assert!(matches!(decode(&buf), Err(RsmiError::UnexpectedData)));
    }

    #[test]
    fn rejects_structure_size_mismatch() {
        let mut buf = sample_buf(1);
        buf[0..2].copy_from_slice(&10u16.to_le_bytes());
        assert!(matches!(decode(&buf), Err(RsmiError::UnexpectedSize)));
    }

    #[test]
    fn rejects_unknown_content_revision() {
        let buf = sample_buf(200);
        assert!(matches!(decode(&buf), Err(RsmiError::NotSupported)));
    }

    #[test]
    fn decodes_edge_temperature() {
        let buf = sample_buf(1);
        let metrics = decode(&buf).unwrap();
        assert_eq!(metrics.temperature_edge, 45_000);
    }

    #[test]
    fn decodes_trailing_fields_through_hbm_temps() {
        let buf = sample_buf(1);
        let metrics = decode(&buf).unwrap();
        assert_eq!(metrics.temperature_hbm[0], 35_000);
        assert_eq!(metrics.current_fan_speed, 0);
        assert_eq!(metrics.gfx_activity_acc, 0);
    }
}
