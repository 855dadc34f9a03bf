//! Kernel event-notification pump (spec §4.7): one event character-device fd
//! per device, filtered by a per-device bitmask, drained with `libc::poll`.
//! Device-open pattern follows the teacher's `KfdDevice::open` (plain
//! `OpenOptions` + `io::Result`, wrapped here in the crate's own error type).

use crate::error::{RsmiError, RsmiResult};
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::io::AsRawFd;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    VmFault,
    ThermalThrottle,
    GpuPreReset,
    GpuPostReset,
}

impl EventType {
    const fn bit(self) -> u64 {
        match self {
            Self::VmFault => 1 << 0,
            Self::ThermalThrottle => 1 << 1,
            Self::GpuPreReset => 1 << 2,
            Self::GpuPostReset => 1 << 3,
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "vmfault" => Some(Self::VmFault),
            "thermal_throttle" => Some(Self::ThermalThrottle),
            "gpu_pre_reset" => Some(Self::GpuPreReset),
            "gpu_post_reset" => Some(Self::GpuPostReset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventRecord {
    pub device_index: usize,
    pub event_type: EventType,
    pub message: String,
}

fn kfd_event_root() -> PathBuf {
    let root = std::env::var("RSMI_KFD_EVENT_ROOT").unwrap_or_else(|_| "/dev/kfd".to_string());
    PathBuf::from(root)
}

struct OpenDevice {
    device_index: usize,
    file: std::fs::File,
}

/// Owns every currently-subscribed device's event fd, for polling together.
#[derive(Default)]
pub struct EventPump {
    devices: HashMap<usize, OpenDevice>,
}

impl EventPump {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the event channel for `device_index`, idempotent if already
    /// open.
    pub fn init(&mut self, device_index: usize) -> RsmiResult<()> {
        if self.devices.contains_key(&device_index) {
            return Ok(());
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(kfd_event_root())
            .map_err(RsmiError::from_io_access)?;
        self.devices.insert(
            device_index,
            OpenDevice {
                device_index,
                file,
            },
        );
        Ok(())
    }

    /// Writes the little-endian bitmask of event types this device should
    /// report, requiring a prior `init`.
    pub fn mask_set(&mut self, device_index: usize, types: &[EventType]) -> RsmiResult<()> {
        let dev = self
            .devices
            .get_mut(&device_index)
            .ok_or(RsmiError::InitError)?;
        let mask: u64 = types.iter().fold(0, |acc, t| acc | t.bit());
        dev.file
            .write_all(&mask.to_le_bytes())
            .map_err(RsmiError::from_io_access)
    }

    /// Drains up to `cap` pending event records across all subscribed
    /// devices, blocking for at most `timeout_ms`.
    pub fn get(&mut self, timeout_ms: i32, cap: usize) -> RsmiResult<Vec<EventRecord>> {
        if self.devices.is_empty() {
            return Err(RsmiError::InitError);
        }

        let (indices, mut fds): (Vec<usize>, Vec<libc::pollfd>) = self
            .devices
            .values()
            .map(|d| {
                (
                    d.device_index,
                    libc::pollfd {
                        fd: d.file.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    },
                )
            })
            .unzip();

        let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(if err.raw_os_error() == Some(libc::EINTR) {
                RsmiError::Interrupt
            } else {
                RsmiError::from_io_access(err)
            });
        }
        if ret == 0 {
            return Err(RsmiError::NoData);
        }

        let mut records = Vec::new();
        let mut pending_overflow = 0usize;

        for (pfd, &device_index) in fds.iter().zip(indices.iter()) {
            if pfd.revents & libc::POLLIN == 0 {
                continue;
            }
            let dev = &self.devices[&device_index];
            let reader = BufReader::new(&dev.file);
            for line in reader.lines().map_while(Result::ok) {
                let Some(record) = parse_event_line(device_index, &line) else {
                    continue;
                };
                if records.len() < cap {
                    records.push(record);
                } else {
                    pending_overflow += 1;
                }
            }
        }

        if records.is_empty() {
            return Err(RsmiError::NoData);
        }
        if pending_overflow > 0 {
            return Err(RsmiError::InsufficientSize {
                needed: records.len() + pending_overflow,
            });
        }
        Ok(records)
    }

    /// Closes `device_index`'s fd and removes it from future polls.
    pub fn stop(&mut self, device_index: usize) {
        self.devices.remove(&device_index);
    }
}

/// Parses one `device_index event_type message` line as emitted by the
/// kernel event channel.
fn parse_event_line(device_index: usize, line: &str) -> Option<EventRecord> {
    let mut parts = line.splitn(2, ' ');
    let event_type = EventType::from_str(parts.next()?.trim())?;
    let message = parts.next().unwrap_or("").trim().chars().take(64).collect();
    Some(EventRecord {
        device_index,
        event_type,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitmask_encodes_each_type() {
        assert_eq!(EventType::VmFault.bit(), 1);
        assert_eq!(EventType::ThermalThrottle.bit(), 2);
        assert_eq!(EventType::GpuPreReset.bit(), 4);
        assert_eq!(EventType::GpuPostReset.bit(), 8);
    }

    #[test]
    fn mask_set_without_init_is_init_error() {
        let mut pump = EventPump::new();
        assert!(matches!(
            pump.mask_set(0, &[EventType::VmFault]),
            Err(RsmiError::InitError)
        ));
    }

    #[test]
    fn parses_event_line() {
        let record = parse_event_line(2, "thermal_throttle edge sensor tripped").unwrap();
        assert_eq!(record.device_index, 2);
        assert_eq!(record.event_type, EventType::ThermalThrottle);
        assert_eq!(record.message, "edge sensor tripped");
    }

    #[test]
    fn rejects_unknown_event_name() {
        assert!(parse_event_line(0, "unknown_event foo").is_none());
    }
}
