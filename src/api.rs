//! Public API façade & lifecycle (spec §4.9). Validates arguments, takes the
//! relevant device mutex, and dispatches into C1–C8. Refcounted
//! init/shutdown mirrors the teacher's `acquire`/`release` singleton
//! (`thunk::context::{acquire, release}`), generalized from a bare
//! `Option<Arc<Context>>` into an explicit counter so repeated `init`/
//! `shut_down` pairs compose correctly (spec's P1).

use crate::catalog::{self, Attribute, Descriptor, ParserKind, TempSensor};
use crate::error::{RsmiError, RsmiResult, RsmiStatus};
use crate::events::{EventPump, EventType};
use crate::introspect::{FunctionTree, Variant};
use crate::metrics::{self, GpuMetrics};
use crate::perfcounter::{self, CounterAvailability, CounterHandle, Event, EventGroup};
use crate::registry::{self, Device};
use crate::sysfs_io;
use crate::topology::{self, LinkType};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InitFlags(u32);

impl InitFlags {
    pub const NONE: Self = Self(0);
    pub const ALL_GPUS: Self = Self(1 << 0);
    pub const RESRV_TEST1: Self = Self(1 << 1);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for InitFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

struct Session {
    devices: Vec<Device>,
    function_trees: Vec<FunctionTree>,
    perf_availability: Mutex<Vec<CounterAvailability>>,
    perf_counters: Mutex<HashMap<u64, (usize, EventGroup, CounterHandle)>>,
    events: Mutex<EventPump>,
}

struct RefcountState {
    count: u32,
    session: Option<Session>,
}

static GLOBAL: Mutex<RefcountState> = Mutex::new(RefcountState {
    count: 0,
    session: None,
});
static NEXT_COUNTER_ID: AtomicU64 = AtomicU64::new(1);

fn build_function_tree(device: &Device) -> FunctionTree {
    let mut tree = FunctionTree::new();

    let unvaried = [
        (Attribute::DevId, "dev_id_get"),
        (Attribute::DevVendorId, "dev_vendor_id_get"),
        (Attribute::DevUniqueId, "dev_unique_id_get"),
        (Attribute::DevSerialNumber, "dev_serial_number_get"),
        (Attribute::DevVbiosVersion, "dev_vbios_version_get"),
        (Attribute::DevPerfLevel, "dev_perf_level_get"),
        (Attribute::DevOverDriveLevel, "dev_overdrive_level_get"),
        (
            Attribute::DevOverDriveClkVoltage,
            "dev_od_clk_voltage_get",
        ),
        (Attribute::DevGpuSClk, "dev_gpu_clk_freq_get"),
        (Attribute::DevGpuMClk, "dev_gpu_clk_freq_get"),
        (Attribute::DevPowerCap, "dev_power_cap_get"),
        (Attribute::DevPowerCapRange, "dev_power_cap_range_get"),
        (Attribute::DevPowerAverage, "dev_power_ave_get"),
        (Attribute::DevMemTotal, "dev_memory_total_get"),
        (Attribute::DevMemUsed, "dev_memory_usage_get"),
        (Attribute::DevEccCorrectable, "dev_ecc_count_get"),
        (Attribute::DevEccUncorrectable, "dev_ecc_count_get"),
        (Attribute::DevGpuMetrics, "dev_gpu_metrics_info_get"),
        (Attribute::DevComputePartition, "dev_compute_partition_get"),
        (Attribute::DevMemoryPartition, "dev_memory_partition_get"),
        (Attribute::DevNumaNode, "dev_numa_node_get"),
        (Attribute::DevVoltage, "dev_volt_metric_get"),
        (Attribute::DevFanSpeed, "dev_fan_speed_get"),
        (Attribute::DevFanSpeedMax, "dev_fan_speed_max_get"),
        (Attribute::DevFanEnable, "dev_fan_reset"),
        (Attribute::DevFanRpm, "dev_fan_rpms_get"),
        (Attribute::DevPcieReplayCount, "dev_pci_replay_counter_get"),
        (Attribute::DevFirmwareVersion, "dev_firmware_version_get"),
        (Attribute::DevRasFeatures, "dev_ras_feature_get"),
        (Attribute::DevXgmiErrorStatus, "dev_xgmi_error_status_get"),
        (Attribute::DevXgmiHiveId, "dev_xgmi_hive_id_get"),
        (Attribute::DevNumaNode, "topo_get_numa_node_number"),
        (Attribute::DevTopoLinkWeight, "topo_get_link_weight"),
        (Attribute::DevTopoLinkType, "topo_get_link_type"),
        (Attribute::DevTopoLinkWeight, "is_P2P_accessible"),
    ];
    for (attr, name) in unvaried {
        if device.supports(attr) {
            tree.insert_unvaried(name);
        }
    }

    let temp_sensors = [TempSensor::Edge, TempSensor::Junction, TempSensor::Memory];
    let supported_sensors: Vec<u64> = temp_sensors
        .iter()
        .enumerate()
        .filter(|(_, s)| device.supports(Attribute::DevTemperature(**s)))
        .map(|(i, _)| i as u64)
        .collect();
    if !supported_sensors.is_empty() {
        tree.insert(
            "dev_temp_metric_get",
            Variant {
                value: 0,
                sub_variants: supported_sensors
                    .into_iter()
                    .map(|value| crate::introspect::SubVariant { value })
                    .collect(),
            },
        );
    }

    tree
}

/// Increments the process-wide refcount; the transition from 0 triggers
/// device discovery exactly once even under concurrent callers (P1), since
/// the whole operation happens under `GLOBAL`'s lock.
pub fn init(flags: InitFlags) -> RsmiResult<()> {
    let mut guard = GLOBAL.lock().unwrap();

    if guard.count == 0 {
        let devices = registry::discover(
            flags.contains(InitFlags::ALL_GPUS),
            flags.contains(InitFlags::RESRV_TEST1),
        )?;
        let function_trees = devices.iter().map(build_function_tree).collect();
        let perf_availability = devices.iter().map(|_| CounterAvailability::default()).collect();
        guard.session = Some(Session {
            function_trees,
            perf_availability: Mutex::new(perf_availability),
            perf_counters: Mutex::new(HashMap::new()),
            events: Mutex::new(EventPump::new()),
            devices,
        });
    }

    guard.count = guard.count.checked_add(1).ok_or(RsmiError::RefcountOverflow)?;
    Ok(())
}

/// Decrements the refcount; the transition to 0 tears down every device's
/// mutex mapping and event/perf-counter state via `Session`'s `Drop`.
pub fn shut_down() -> RsmiResult<()> {
    let mut guard = GLOBAL.lock().unwrap();
    if guard.count == 0 {
        return Err(RsmiError::InitError);
    }
    guard.count -= 1;
    if guard.count == 0 {
        guard.session = None;
    }
    Ok(())
}

fn with_session<R>(f: impl FnOnce(&Session) -> RsmiResult<R>) -> RsmiResult<R> {
    let guard = GLOBAL.lock().unwrap();
    let session = guard.session.as_ref().ok_or(RsmiError::InitError)?;
    f(session)
}

fn device_at(session: &Session, index: usize) -> RsmiResult<&Device> {
    session.devices.get(index).ok_or(RsmiError::InvalidArgs)
}

#[must_use]
pub fn num_monitor_devices() -> RsmiResult<usize> {
    with_session(|s| Ok(s.devices.len()))
}

fn resolve_supported(device: &Device, attr: Attribute) -> RsmiResult<(Descriptor, std::path::PathBuf)> {
    if !device.supports(attr) {
        return Err(RsmiError::NotSupported);
    }
    let desc = catalog::descriptor(attr);
    let path = desc
        .resolve(&device.device_dir, device.hwmon_dir.as_deref())
        .ok_or(RsmiError::NotSupported)?;
    Ok((desc, path))
}

/// Reads a scalar (decimal or hex) attribute, holding the device mutex for
/// the duration of the sysfs access.
pub fn get_u64(device_index: usize, attr: Attribute) -> RsmiResult<u64> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        let _guard = device.mutex.lock()?;
        sysfs_io::read_scalar_u64(&desc, &path)
    })
}

pub fn get_i64(device_index: usize, attr: Attribute) -> RsmiResult<i64> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        let _guard = device.mutex.lock()?;
        sysfs_io::read_scalar_i64(&desc, &path)
    })
}

pub fn get_string(device_index: usize, attr: Attribute) -> RsmiResult<String> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        let _guard = device.mutex.lock()?;
        sysfs_io::read_string(&desc, &path)
    })
}

pub fn set_scalar(device_index: usize, attr: Attribute, value: &str) -> RsmiResult<()> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        if desc.direction != catalog::Direction::ReadWrite {
            return Err(RsmiError::SettingUnavailable);
        }
        let _guard = device.mutex.lock()?;
        sysfs_io::write_scalar(&desc, &path, value)
    })
}

pub fn get_frequency_list(device_index: usize, attr: Attribute) -> RsmiResult<sysfs_io::FrequencyList> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        if desc.parser != ParserKind::FrequencyList {
            return Err(RsmiError::InvalidArgs);
        }
        let _guard = device.mutex.lock()?;
        let content = sysfs_io::read_to_string(&path)?;
        sysfs_io::parse_frequency_list(&content)
    })
}

pub fn set_frequency_mask(device_index: usize, attr: Attribute, bitmask: u64) -> RsmiResult<()> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        if desc.direction != catalog::Direction::ReadWrite {
            return Err(RsmiError::SettingUnavailable);
        }
        let _guard = device.mutex.lock()?;
        sysfs_io::write_mask(&path, bitmask)
    })
}

pub fn get_od_clk_voltage(device_index: usize) -> RsmiResult<sysfs_io::OverDriveCurve> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (_desc, path) = resolve_supported(device, Attribute::DevOverDriveClkVoltage)?;
        let _guard = device.mutex.lock()?;
        let content = sysfs_io::read_to_string(&path)?;
        sysfs_io::parse_od_clk_voltage(&content)
    })
}

pub fn get_gpu_metrics(device_index: usize) -> RsmiResult<GpuMetrics> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (_desc, path) = resolve_supported(device, Attribute::DevGpuMetrics)?;
        let _guard = device.mutex.lock()?;
        let bytes = sysfs_io::read_blob(&path)?;
        metrics::decode(&bytes)
    })
}

pub fn get_temperature(device_index: usize, sensor: TempSensor) -> RsmiResult<u64> {
    get_u64(device_index, Attribute::DevTemperature(sensor))
}

/// Reads and parses a `key: value`-block attribute (currently the RAS error
/// counters) into its raw map form.
pub fn get_key_value(device_index: usize, attr: Attribute) -> RsmiResult<HashMap<String, String>> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let (desc, path) = resolve_supported(device, attr)?;
        if desc.parser != ParserKind::KeyValueBlock {
            return Err(RsmiError::InvalidArgs);
        }
        let _guard = device.mutex.lock()?;
        let content = sysfs_io::read_to_string(&path)?;
        sysfs_io::parse_key_value_block(&content)
    })
}

/// Reads the correctable or uncorrectable ECC error count for a device (spec's
/// `dev_ecc_count_get`). amdgpu's `ras/<block>_err_count` file reports both
/// counts in one block as `ce: N` / `ue: N` lines.
pub fn get_ecc_count(device_index: usize, attr: Attribute) -> RsmiResult<u64> {
    let key = match attr {
        Attribute::DevEccCorrectable => "ce",
        Attribute::DevEccUncorrectable => "ue",
        _ => return Err(RsmiError::InvalidArgs),
    };
    let map = get_key_value(device_index, attr)?;
    map.get(key)
        .ok_or(RsmiError::UnexpectedData)?
        .parse()
        .map_err(|_| RsmiError::UnexpectedData)
}

#[must_use]
pub fn pci_id_get(device_index: usize) -> RsmiResult<u64> {
    with_session(|session| Ok(device_at(session, device_index)?.bdf.pack()))
}

/// NUMA node affinity for a device (spec's `topo_get_numa_node_number`).
pub fn topo_get_numa_node_number(device_index: usize) -> RsmiResult<i64> {
    get_i64(device_index, Attribute::DevNumaNode)
}

fn topology_node_pair(session: &Session, src_index: usize, dst_index: usize) -> RsmiResult<(u32, u32)> {
    let src = device_at(session, src_index)?.kfd_node_id.ok_or(RsmiError::NotSupported)?;
    let dst = device_at(session, dst_index)?.kfd_node_id.ok_or(RsmiError::NotSupported)?;
    Ok((src, dst))
}

/// Link weight between two devices (spec's `topo_get_link_weight`). Both
/// device mutexes are held, in ascending index order, for the duration of
/// the query, matching the cross-device locking discipline for topology
/// reads.
pub fn topo_get_link_weight(src_index: usize, dst_index: usize) -> RsmiResult<u64> {
    if src_index == dst_index {
        return Ok(0);
    }
    with_session(|session| {
        let src = device_at(session, src_index)?;
        let dst = device_at(session, dst_index)?;
        let _guards = crate::procmutex::DeviceMutex::lock_pair(&src.mutex, src_index, &dst.mutex, dst_index)?;
        let (src_node, dst_node) = topology_node_pair(session, src_index, dst_index)?;
        topology::link_weight(src_node, dst_node)
    })
}

/// Hop count and link type between two devices (spec's `topo_get_link_type`).
pub fn topo_get_link_type(src_index: usize, dst_index: usize) -> RsmiResult<(u64, LinkType)> {
    if src_index == dst_index {
        return Ok((0, LinkType::Undefined));
    }
    with_session(|session| {
        let src = device_at(session, src_index)?;
        let dst = device_at(session, dst_index)?;
        let _guards = crate::procmutex::DeviceMutex::lock_pair(&src.mutex, src_index, &dst.mutex, dst_index)?;
        let (src_node, dst_node) = topology_node_pair(session, src_index, dst_index)?;
        topology::link_type(src_node, dst_node)
    })
}

/// Whether two devices can access each other's memory directly (spec's
/// `is_P2P_accessible`).
pub fn is_p2p_accessible(src_index: usize, dst_index: usize) -> RsmiResult<bool> {
    if src_index == dst_index {
        return Ok(true);
    }
    with_session(|session| {
        let src = device_at(session, src_index)?;
        let dst = device_at(session, dst_index)?;
        let _guards = crate::procmutex::DeviceMutex::lock_pair(&src.mutex, src_index, &dst.mutex, dst_index)?;
        let (src_node, dst_node) = topology_node_pair(session, src_index, dst_index)?;
        Ok(topology::is_p2p_accessible(src_node, dst_node))
    })
}

pub fn function_supported(device_index: usize, function: &str) -> RsmiResult<bool> {
    with_session(|session| {
        let tree = session
            .function_trees
            .get(device_index)
            .ok_or(RsmiError::InvalidArgs)?;
        Ok(tree.supports(function))
    })
}

pub fn create_counter(device_index: usize, event: Event) -> RsmiResult<u64> {
    with_session(|session| {
        let device = device_at(session, device_index)?;
        let mut availability = session.perf_availability.lock().unwrap();
        let table = availability
            .get_mut(device_index)
            .ok_or(RsmiError::InvalidArgs)?;
        let handle = perfcounter::create(table, device.card_num, event)?;
        let id = NEXT_COUNTER_ID.fetch_add(1, Ordering::Relaxed);
        session
            .perf_counters
            .lock()
            .unwrap()
            .insert(id, (device_index, event.group, handle));
        Ok(id)
    })
}

pub fn counter_control(counter_id: u64, start: bool) -> RsmiResult<()> {
    with_session(|session| {
        let mut counters = session.perf_counters.lock().unwrap();
        let (_, _, handle) = counters.get_mut(&counter_id).ok_or(RsmiError::InvalidArgs)?;
        handle.control(start)
    })
}

pub fn counter_read(counter_id: u64) -> RsmiResult<(u64, u64)> {
    with_session(|session| {
        let mut counters = session.perf_counters.lock().unwrap();
        let (_, _, handle) = counters.get_mut(&counter_id).ok_or(RsmiError::InvalidArgs)?;
        handle.read()
    })
}

pub fn destroy_counter(counter_id: u64) -> RsmiResult<()> {
    with_session(|session| {
        let mut counters = session.perf_counters.lock().unwrap();
        let (device_index, group, _handle) =
            counters.remove(&counter_id).ok_or(RsmiError::InvalidArgs)?;
        let mut availability = session.perf_availability.lock().unwrap();
        if let Some(table) = availability.get_mut(device_index) {
            perfcounter::destroy(table, session.devices[device_index].card_num, group);
        }
        Ok(())
    })
}

pub fn event_notification_init(device_index: usize) -> RsmiResult<()> {
    with_session(|session| {
        device_at(session, device_index)?;
        session.events.lock().unwrap().init(device_index)
    })
}

pub fn event_notification_mask_set(device_index: usize, types: &[EventType]) -> RsmiResult<()> {
    with_session(|session| session.events.lock().unwrap().mask_set(device_index, types))
}

pub fn event_notification_get(
    timeout_ms: i32,
    cap: usize,
) -> RsmiResult<Vec<crate::events::EventRecord>> {
    with_session(|session| session.events.lock().unwrap().get(timeout_ms, cap))
}

pub fn event_notification_stop(device_index: usize) -> RsmiResult<()> {
    with_session(|session| {
        session.events.lock().unwrap().stop(device_index);
        Ok(())
    })
}

#[must_use]
pub fn status_string(status: RsmiStatus) -> &'static str {
    status.describe()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_shutdown_without_init_is_init_error() {
        // A stray shut_down with no matching init must not underflow the
        // counter; this runs in isolation from the other init/shutdown
        // tests since GLOBAL is process-wide.
        let mut guard = GLOBAL.lock().unwrap();
        guard.count = 0;
        guard.session = None;
        drop(guard);
        assert!(matches!(shut_down(), Err(RsmiError::InitError)));
    }

    #[test]
    fn init_flags_combine_with_bitor() {
        let flags = InitFlags::ALL_GPUS | InitFlags::RESRV_TEST1;
        assert!(flags.contains(InitFlags::ALL_GPUS));
        assert!(flags.contains(InitFlags::RESRV_TEST1));
    }
}
