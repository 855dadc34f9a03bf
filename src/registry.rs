//! Device discovery and registry (spec §4.4): scans `/sys/class/drm/cardN`,
//! resolves each to a BDF and hwmon sibling, and assigns stable dense
//! indices. Grounded on the teacher crate's `Topology::get_snapshot`
//! directory-walk pattern (sorted numeric suffixes, tolerant sub-parsing).

use crate::catalog::{self, Attribute};
use crate::error::{RsmiError, RsmiResult};
use crate::procmutex::DeviceMutex;
use crate::topology;
use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const AMD_VENDOR_ID: u64 = 0x1002;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bdf {
    pub domain: u32,
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

impl std::fmt::Display for Bdf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.device, self.function
        )
    }
}

impl Bdf {
    /// Packs the BDF into the 64-bit numeric id the façade returns from
    /// `pci_id_get` (domain in the high bits, bus/device/function packed
    /// the way the reference implementation does).
    #[must_use]
    pub fn pack(&self) -> u64 {
        (u64::from(self.domain) << 32)
            | (u64::from(self.bus) << 8)
            | (u64::from(self.device) << 3)
            | u64::from(self.function)
    }

    fn parse(target: &str) -> Option<Self> {
        // Symlink target looks like ".../0000:03:00.0", take the last
        // path component.
        let leaf = target.rsplit('/').next()?;
        let (domain_bus_dev, function) = leaf.rsplit_once('.')?;
        let mut parts = domain_bus_dev.split(':');
        let domain = u32::from_str_radix(parts.next()?, 16).ok()?;
        let bus = u8::from_str_radix(parts.next()?, 16).ok()?;
        let device = u8::from_str_radix(parts.next()?, 16).ok()?;
        let function = u8::from_str_radix(function, 16).ok()?;
        Some(Self {
            domain,
            bus,
            device,
            function,
        })
    }
}

/// One discovered GPU. Immutable for the life of an initialization.
pub struct Device {
    pub index: usize,
    pub bdf: Bdf,
    pub card_num: u32,
    pub device_dir: PathBuf,
    pub hwmon_dir: Option<PathBuf>,
    pub supported: HashSet<AttrKey>,
    pub mutex: DeviceMutex,
    /// This device's node id in the KFD topology tree, if one could be
    /// resolved; `None` when no KFD topology tree is present (e.g. the
    /// module isn't loaded, or a test fixture). Backs the two-device
    /// topology queries in [`crate::topology`].
    pub kfd_node_id: Option<u32>,
}

/// Hashable projection of `Attribute` for the support-bitmap set, since
/// `Attribute` itself doesn't need to be `Eq`-comparable across sensor
/// payloads beyond identity.
pub type AttrKey = Attribute;

impl Device {
    #[must_use]
    pub fn supports(&self, attr: Attribute) -> bool {
        self.supported.contains(&attr)
    }
}

fn sysfs_root() -> PathBuf {
    match env::var("RSMI_SYSFS_ROOT") {
        Ok(root) => PathBuf::from(root),
        Err(_) => PathBuf::from("/sys"),
    }
}

/// Enumerates `/sys/class/drm/card*` in ascending numeric order, as the
/// kernel exposes them, and builds one [`Device`] per matching card.
///
/// # Errors
/// Propagates any I/O error encountered reading the DRM class directory
/// itself (individual card probe failures are skipped, not fatal).
pub fn discover(all_gpus: bool, fail_fast_mutex: bool) -> RsmiResult<Vec<Device>> {
    let drm_root = sysfs_root().join("class/drm");
    let mut card_dirs: Vec<(u32, PathBuf)> = Vec::new();

    if let Ok(entries) = fs::read_dir(&drm_root) {
        for entry in entries.filter_map(Result::ok) {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(num_str) = name.strip_prefix("card")
                && let Ok(num) = num_str.parse::<u32>()
            {
                card_dirs.push((num, entry.path()));
            }
        }
    }
    card_dirs.sort_by_key(|(num, _)| *num);

    let mut devices = Vec::new();
    for (card_num, card_path) in card_dirs {
        if let Some(device) = probe_card(card_num, &card_path, all_gpus, fail_fast_mutex)? {
            devices.push(device);
        }
    }

    for (index, device) in devices.iter_mut().enumerate() {
        device.index = index;
    }

    let mut seen_bdfs = HashSet::new();
    for device in &devices {
        if !seen_bdfs.insert(device.bdf) {
            return Err(RsmiError::Internal(format!(
                "duplicate BDF {} across devices",
                device.bdf
            )));
        }
    }

    Ok(devices)
}

fn probe_card(
    card_num: u32,
    card_path: &Path,
    all_gpus: bool,
    fail_fast_mutex: bool,
) -> RsmiResult<Option<Device>> {
    let device_dir = card_path.join("device");

    let vendor = match fs::read_to_string(device_dir.join("vendor")) {
        Ok(s) => u64::from_str_radix(s.trim().trim_start_matches("0x"), 16).unwrap_or(0),
        Err(_) => return Ok(None),
    };
    if !all_gpus && vendor != AMD_VENDOR_ID {
        return Ok(None);
    }

    let link_target = fs::read_link(&device_dir)
        .ok()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default();
    let bdf = Bdf::parse(&link_target).unwrap_or_default();

    let hwmon_dir = fs::read_dir(device_dir.join("hwmon"))
        .ok()
        .and_then(|mut entries| entries.find_map(Result::ok))
        .map(|entry| entry.path());

    let mut supported = HashSet::new();
    for attr in catalog::all_attributes() {
        let desc = catalog::descriptor(attr);
        if let Some(path) = desc.resolve(&device_dir, hwmon_dir.as_deref())
            && path.exists()
        {
            supported.insert(attr);
        }
    }

    let kfd_node_id = topology::resolve_node_id(&bdf);
    if kfd_node_id.is_some() {
        supported.insert(Attribute::DevTopoLinkWeight);
        supported.insert(Attribute::DevTopoLinkType);
    }

    let mutex = DeviceMutex::open(&bdf, fail_fast_mutex)?;

    Ok(Some(Device {
        index: 0,
        bdf,
        card_num,
        device_dir,
        hwmon_dir,
        supported,
        mutex,
        kfd_node_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bdf_from_symlink_target() {
        let bdf = Bdf::parse("../../../0000:03:00.0").unwrap();
        assert_eq!(bdf.domain, 0);
        assert_eq!(bdf.bus, 0x03);
        assert_eq!(bdf.device, 0x00);
        assert_eq!(bdf.function, 0);
    }

    #[test]
    fn packs_bdf_into_expected_layout() {
        let bdf = Bdf {
            domain: 0,
            bus: 0x03,
            device: 0,
            function: 0,
        };
        assert_eq!(bdf.pack(), 0x0000_0000_0000_0300);
    }
}
