//! Exercises device discovery (C4) against a fixture sysfs tree built with
//! `tempfile`, following the teacher's own preference for real-filesystem
//! fixtures over mocked traits.

use std::fs;
use std::os::unix::fs::symlink;
use std::sync::Mutex;

use rsmi_core::registry;

/// Serializes access to `RSMI_SYSFS_ROOT`, which every test in this file
/// mutates; cargo runs tests in one binary on multiple threads by default.
static ENV_GUARD: Mutex<()> = Mutex::new(());

fn discover_with_root(root: &std::path::Path, all_gpus: bool) -> rsmi_core::RsmiResult<Vec<rsmi_core::registry::Device>> {
    let _lock = ENV_GUARD.lock().unwrap();
    // SAFETY: serialized by `ENV_GUARD` above.
    unsafe { std::env::set_var("RSMI_SYSFS_ROOT", root) };
    let result = registry::discover(all_gpus, true);
    unsafe { std::env::remove_var("RSMI_SYSFS_ROOT") };
    result
}

fn build_fixture_card(root: &std::path::Path, card_num: u32, vendor_hex: &str, bdf_tail: &str) {
    let card_dir = root.join(format!("class/drm/card{card_num}"));
    let device_dir = card_dir.join("device");
    fs::create_dir_all(&device_dir).unwrap();
    fs::write(device_dir.join("vendor"), format!("{vendor_hex}\n")).unwrap();

    let pci_target = root.join("devices/pci0000:00").join(bdf_tail);
    fs::create_dir_all(&pci_target).unwrap();
    fs::remove_dir_all(&device_dir).unwrap();
    symlink(&pci_target, &device_dir).unwrap();
    fs::write(device_dir.join("vendor"), format!("{vendor_hex}\n")).unwrap();

    fs::create_dir_all(device_dir.join("hwmon/hwmon0")).unwrap();
}

#[test]
fn discovers_only_amd_devices_by_default() {
    let tmp = tempfile::tempdir().unwrap();
    build_fixture_card(tmp.path(), 0, "0x1002", "0000:03:00.0");
    build_fixture_card(tmp.path(), 1, "0x10de", "0000:04:00.0");

    let devices = discover_with_root(tmp.path(), false).unwrap();

    assert_eq!(devices.len(), 1);
    assert_eq!(devices[0].bdf.to_string(), "0000:03:00.0");
    assert_eq!(devices[0].index, 0);
}

#[test]
fn all_gpus_flag_includes_non_amd_vendors() {
    let tmp = tempfile::tempdir().unwrap();
    build_fixture_card(tmp.path(), 0, "0x1002", "0000:03:00.0");
    build_fixture_card(tmp.path(), 1, "0x10de", "0000:04:00.0");

    let devices = discover_with_root(tmp.path(), true).unwrap();

    assert_eq!(devices.len(), 2);
    assert_eq!(devices[1].bdf.to_string(), "0000:04:00.0");
}

#[test]
fn empty_sysfs_root_yields_no_devices() {
    let tmp = tempfile::tempdir().unwrap();
    fs::create_dir_all(tmp.path().join("class/drm")).unwrap();

    let devices = discover_with_root(tmp.path(), false).unwrap();

    assert!(devices.is_empty());
}
