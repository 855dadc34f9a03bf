//! Kernel perf-event counter engine (spec §4.6): wraps the AMDGPU XGMI PMU's
//! link-traffic counters via `perf_event_open`. Grounded on the raw-syscall
//! `perf_event_open` wrapper pattern from the `perfcnt` crate in the
//! retrieved pack.

use crate::error::{RsmiError, RsmiResult};
use std::collections::HashMap;
use std::fs;
use std::os::unix::io::RawFd;
use std::path::PathBuf;

const PERF_EVENT_IOC_MAGIC: u32 = 0x24; // '$', per linux/perf_event.h
const PERF_EVENT_IOC_TYPE_SHIFT: u32 = 8;

/// Builds a `_IO(PERF_EVENT_IOC_MAGIC, nr)`-style ioctl request number: the
/// standard Linux ioctl encoding with direction `_IOC_NONE` and zero payload
/// size, used for the argument-less enable/disable requests.
const fn perf_event_ioc(nr: u32) -> u32 {
    (PERF_EVENT_IOC_MAGIC << PERF_EVENT_IOC_TYPE_SHIFT) | nr
}

const PERF_EVENT_IOC_ENABLE: u32 = perf_event_ioc(0);
const PERF_EVENT_IOC_DISABLE: u32 = perf_event_ioc(1);

/// Maximum concurrently-open counters per (device, group) pair.
const GROUP_CAPACITY: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventGroup {
    XgmiDataIn,
    XgmiDataOut,
}

impl EventGroup {
    fn pmu_event_name(self, link: u8) -> String {
        match self {
            Self::XgmiDataIn => format!("xgmi_link{link}_data_in"),
            Self::XgmiDataOut => format!("xgmi_link{link}_data_out"),
        }
    }
}

/// One countable event: a traffic direction on a specific XGMI link index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Event {
    pub group: EventGroup,
    pub link: u8,
}

/// Kernel ABI layout of `struct perf_event_attr`, trimmed to the fields this
/// engine sets. Field order and widths follow `linux/perf_event.h`.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct PerfEventAttr {
    type_: u32,
    size: u32,
    config: u64,
    sample_period: u64,
    sample_type: u64,
    read_format: u64,
    flags: u64,
    wakeup_events: u32,
    bp_type: u32,
    config1: u64,
    config2: u64,
    branch_sample_type: u64,
    sample_regs_user: u64,
    sample_stack_user: u32,
    clockid: i32,
    sample_regs_intr: u64,
    aux_watermark: u32,
    sample_max_stack: u16,
    reserved_2: u16,
}

const ATTR_FLAG_DISABLED: u64 = 1;

fn sysfs_bus_root() -> PathBuf {
    let root = std::env::var("RSMI_SYSFS_ROOT").unwrap_or_else(|_| "/sys".to_string());
    PathBuf::from(root).join("bus/event_source/devices")
}

/// Resolves the PMU numeric `type` id and the event's `config` value by
/// reading the standard `perf` PMU sysfs layout:
/// `.../amdgpu_xgmi_<card>/type` and `.../amdgpu_xgmi_<card>/events/<name>`.
fn resolve_pmu(card_num: u32, event: Event) -> RsmiResult<(u32, u64)> {
    let pmu_dir = sysfs_bus_root().join(format!("amdgpu_xgmi_{card_num}"));

    let type_str =
        fs::read_to_string(pmu_dir.join("type")).map_err(|_| RsmiError::NotSupported)?;
    let pmu_type: u32 = type_str.trim().parse().map_err(|_| RsmiError::UnexpectedData)?;

    let event_name = event.group.pmu_event_name(event.link);
    let event_str = fs::read_to_string(pmu_dir.join("events").join(&event_name))
        .map_err(|_| RsmiError::NotSupported)?;
    // Format is typically "event=0x3".
    let config = event_str
        .trim()
        .strip_prefix("event=")
        .and_then(|v| u64::from_str_radix(v.trim_start_matches("0x"), 16).ok())
        .ok_or(RsmiError::UnexpectedData)?;

    Ok((pmu_type, config))
}

/// Whether this GPU card exposes the named event group's PMU at all.
#[must_use]
pub fn group_supported(card_num: u32, group: EventGroup) -> bool {
    resolve_pmu(card_num, Event { group, link: 0 }).is_ok()
}

/// An open perf-event counter for one (device, event) pair.
pub struct CounterHandle {
    fd: RawFd,
    last_cumulative: u64,
    started: bool,
}

impl CounterHandle {
    pub fn read(&mut self) -> RsmiResult<(u64, u64)> {
        if !self.started {
            return Ok((0, 0));
        }
        let mut raw = [0u64; 3];
        let n = unsafe {
            libc::read(
                self.fd,
                raw.as_mut_ptr().cast(),
                std::mem::size_of_val(&raw),
            )
        };
        if n < 0 {
            return Err(RsmiError::from_io_access(std::io::Error::last_os_error()));
        }
        let cumulative = raw[0];
        let time_running_ns = raw[2];
        let delta = cumulative.saturating_sub(self.last_cumulative);
        self.last_cumulative = cumulative;
        Ok((delta, time_running_ns))
    }

    pub fn control(&mut self, start: bool) -> RsmiResult<()> {
        let request = if start {
            PERF_EVENT_IOC_ENABLE
        } else {
            PERF_EVENT_IOC_DISABLE
        };
        let ret = unsafe { libc::ioctl(self.fd, u64::from(request), 0) };
        if ret != 0 {
            return Err(RsmiError::from_io_access(std::io::Error::last_os_error()));
        }
        self.started = start || self.started;
        Ok(())
    }
}

impl Drop for CounterHandle {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.fd);
        }
    }
}

fn perf_event_open(attr: &PerfEventAttr, pid: libc::pid_t, cpu: libc::c_int) -> RawFd {
    unsafe {
        libc::syscall(
            libc::SYS_perf_event_open,
            attr as *const PerfEventAttr,
            pid,
            cpu,
            -1i32,
            0u64,
        ) as RawFd
    }
}

/// Per (device, group) outstanding-counter bookkeeping (spec's P5: `available
/// + outstanding == capacity` at all times).
#[derive(Default)]
pub struct CounterAvailability {
    outstanding: HashMap<(u32, EventGroup), u32>,
}

impl CounterAvailability {
    #[must_use]
    pub fn available(&self, card_num: u32, group: EventGroup) -> u32 {
        let used = self.outstanding.get(&(card_num, group)).copied().unwrap_or(0);
        GROUP_CAPACITY.saturating_sub(used)
    }

    fn reserve(&mut self, card_num: u32, group: EventGroup) -> RsmiResult<()> {
        if self.available(card_num, group) == 0 {
            return Err(RsmiError::OutOfResources);
        }
        *self.outstanding.entry((card_num, group)).or_insert(0) += 1;
        Ok(())
    }

    fn release(&mut self, card_num: u32, group: EventGroup) {
        if let Some(count) = self.outstanding.get_mut(&(card_num, group)) {
            *count = count.saturating_sub(1);
        }
    }
}

/// Opens a disabled counter for `event` on `card_num`, reserving one slot in
/// `availability`. The counter must be started explicitly via
/// [`CounterHandle::control`].
pub fn create(
    availability: &mut CounterAvailability,
    card_num: u32,
    event: Event,
) -> RsmiResult<CounterHandle> {
    availability.reserve(card_num, event.group)?;

    let (pmu_type, config) = match resolve_pmu(card_num, event) {
        Ok(v) => v,
        Err(e) => {
            availability.release(card_num, event.group);
            return Err(e);
        }
    };

    let attr = PerfEventAttr {
        type_: pmu_type,
        size: std::mem::size_of::<PerfEventAttr>() as u32,
        config,
        flags: ATTR_FLAG_DISABLED,
        ..PerfEventAttr::default()
    };

    let fd = perf_event_open(&attr, -1, 0);
    if fd < 0 {
        availability.release(card_num, event.group);
        let err = std::io::Error::last_os_error();
        return Err(match err.raw_os_error() {
            Some(libc::EACCES | libc::EPERM) => RsmiError::Permission,
            _ => RsmiError::from_io_access(err),
        });
    }

    Ok(CounterHandle {
        fd,
        last_cumulative: 0,
        started: false,
    })
}

/// Releases a counter's reserved availability slot. The handle itself is
/// closed by its own `Drop`.
pub fn destroy(availability: &mut CounterAvailability, card_num: u32, group: EventGroup) {
    availability.release(card_num, group);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn availability_tracks_reserve_and_release() {
        let mut table = CounterAvailability::default();
        assert_eq!(table.available(0, EventGroup::XgmiDataIn), GROUP_CAPACITY);
        table.reserve(0, EventGroup::XgmiDataIn).unwrap();
        assert_eq!(table.available(0, EventGroup::XgmiDataIn), GROUP_CAPACITY - 1);
        table.release(0, EventGroup::XgmiDataIn);
        assert_eq!(table.available(0, EventGroup::XgmiDataIn), GROUP_CAPACITY);
    }

    #[test]
    fn availability_exhausts_at_capacity() {
        let mut table = CounterAvailability::default();
        for _ in 0..GROUP_CAPACITY {
            table.reserve(0, EventGroup::XgmiDataOut).unwrap();
        }
        assert!(table.reserve(0, EventGroup::XgmiDataOut).is_err());
    }

    #[test]
    fn unsupported_group_reports_unsupported() {
        let dir = std::env::temp_dir().join("rsmi_perf_test_no_pmu");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        unsafe {
            std::env::set_var("RSMI_SYSFS_ROOT", &dir);
        }
        assert!(!group_supported(0, EventGroup::XgmiDataIn));
        unsafe {
            std::env::remove_var("RSMI_SYSFS_ROOT");
        }
    }
}
