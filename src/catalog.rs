//! Static path & parser catalog (spec §4.1): for each logical device
//! attribute, where it lives in sysfs/hwmon, how to parse it, and whether
//! it's writable and needs a companion write first.

use std::path::PathBuf;

/// Closed enumeration of device attribute kinds the catalog knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attribute {
    DevId,
    DevVendorId,
    DevUniqueId,
    DevSerialNumber,
    DevVbiosVersion,
    DevPerfLevel,
    DevOverDriveLevel,
    DevOverDriveClkVoltage,
    DevGpuSClk,
    DevGpuMClk,
    DevPowerCap,
    DevPowerCapRange,
    DevPowerAverage,
    DevMemTotal,
    DevMemUsed,
    DevEccCorrectable,
    DevEccUncorrectable,
    DevGpuMetrics,
    DevComputePartition,
    DevMemoryPartition,
    DevNumaNode,
    DevTemperature(TempSensor),
    DevVoltage,
    DevFanSpeed,
    DevFanSpeedMax,
    DevFanEnable,
    DevFanRpm,
    DevPcieReplayCount,
    DevFirmwareVersion,
    DevRasFeatures,
    DevXgmiErrorStatus,
    DevXgmiHiveId,
    /// Link weight between two devices. Not resolvable through a single
    /// `device_dir`/`hwmon_dir` pair; see [`AttrDir::KfdTopology`].
    DevTopoLinkWeight,
    /// Link type/hop count between two devices. Same caveat as
    /// [`Attribute::DevTopoLinkWeight`].
    DevTopoLinkType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TempSensor {
    Edge,
    Junction,
    Memory,
}

/// How a file's contents should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserKind {
    DecimalU64,
    DecimalI64,
    HexU64,
    StringLine,
    FrequencyList,
    KeyValueBlock,
    BinaryMetrics,
    OverDriveClkVoltage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    None,
    MilliDegreesC,
    MilliVolts,
    MicroWatts,
    Hertz,
    Raw0To255,
    Rpm,
}

/// A companion write that must happen before the main write, e.g. toggling
/// `pwm1_enable` into manual mode before writing `pwm1`.
#[derive(Debug, Clone, Copy)]
pub struct Companion {
    pub file_suffix: &'static str,
    pub value: &'static str,
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub dir: AttrDir,
    pub file: &'static str,
    pub direction: Direction,
    pub parser: ParserKind,
    pub unit: Unit,
    pub companion: Option<Companion>,
}

/// Whether the attribute lives under `device/` (the DRM `device` directory),
/// under the device's `hwmon/hwmonN` sibling, or isn't addressable from a
/// single device's directories at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrDir {
    Device,
    Hwmon,
    /// Lives under the KFD topology node tree (`io_links` between two
    /// devices), keyed by KFD node id rather than by one device's own
    /// directories. `resolve` always returns `None` for these; the
    /// `topology` module reads them directly via each device's resolved
    /// node id instead of going through [`Descriptor::resolve`].
    KfdTopology,
}

impl Descriptor {
    /// Resolves the descriptor to a concrete path given the device's
    /// `device/` directory and its optional hwmon directory.
    pub fn resolve(&self, device_dir: &std::path::Path, hwmon_dir: Option<&std::path::Path>) -> Option<PathBuf> {
        match self.dir {
            AttrDir::Device => Some(device_dir.join(self.file)),
            AttrDir::Hwmon => hwmon_dir.map(|h| h.join(self.file)),
            AttrDir::KfdTopology => None,
        }
    }
}

#[must_use]
pub fn descriptor(attr: Attribute) -> Descriptor {
    use AttrDir::{Device, Hwmon, KfdTopology};
    use Direction::{ReadOnly, ReadWrite};
    use ParserKind as P;
    use Unit as U;

    match attr {
        Attribute::DevId => Descriptor {
            dir: Device,
            file: "device",
            direction: ReadOnly,
            parser: P::HexU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevVendorId => Descriptor {
            dir: Device,
            file: "vendor",
            direction: ReadOnly,
            parser: P::HexU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevUniqueId => Descriptor {
            dir: Device,
            file: "unique_id",
            direction: ReadOnly,
            parser: P::HexU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevSerialNumber => Descriptor {
            dir: Device,
            file: "serial_number",
            direction: ReadOnly,
            parser: P::StringLine,
            unit: U::None,
            companion: None,
        },
        Attribute::DevVbiosVersion => Descriptor {
            dir: Device,
            file: "vbios_version",
            direction: ReadOnly,
            parser: P::StringLine,
            unit: U::None,
            companion: None,
        },
        Attribute::DevPerfLevel => Descriptor {
            dir: Device,
            file: "power_dpm_force_performance_level",
            direction: ReadWrite,
            parser: P::StringLine,
            unit: U::None,
            companion: None,
        },
        Attribute::DevOverDriveLevel => Descriptor {
            dir: Device,
            file: "pp_sclk_od",
            direction: ReadWrite,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevOverDriveClkVoltage => Descriptor {
            dir: Device,
            file: "pp_od_clk_voltage",
            direction: ReadWrite,
            parser: P::OverDriveClkVoltage,
            unit: U::None,
            companion: None,
        },
        Attribute::DevGpuSClk => Descriptor {
            dir: Device,
            file: "pp_dpm_sclk",
            direction: ReadWrite,
            parser: P::FrequencyList,
            unit: U::Hertz,
            companion: None,
        },
        Attribute::DevGpuMClk => Descriptor {
            dir: Device,
            file: "pp_dpm_mclk",
            direction: ReadWrite,
            parser: P::FrequencyList,
            unit: U::Hertz,
            companion: None,
        },
        Attribute::DevPowerCap => Descriptor {
            dir: Hwmon,
            file: "power1_cap",
            direction: ReadWrite,
            parser: P::DecimalU64,
            unit: U::MicroWatts,
            companion: None,
        },
        Attribute::DevPowerCapRange => Descriptor {
            dir: Hwmon,
            file: "power1_cap_max",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::MicroWatts,
            companion: None,
        },
        Attribute::DevPowerAverage => Descriptor {
            dir: Hwmon,
            file: "power1_average",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::MicroWatts,
            companion: None,
        },
        Attribute::DevMemTotal => Descriptor {
            dir: Device,
            file: "mem_info_vram_total",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevMemUsed => Descriptor {
            dir: Device,
            file: "mem_info_vram_used",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevEccCorrectable => Descriptor {
            dir: Device,
            file: "ras/gfx_err_count",
            direction: ReadOnly,
            parser: P::KeyValueBlock,
            unit: U::None,
            companion: None,
        },
        Attribute::DevEccUncorrectable => Descriptor {
            dir: Device,
            file: "ras/gfx_err_count",
            direction: ReadOnly,
            parser: P::KeyValueBlock,
            unit: U::None,
            companion: None,
        },
        Attribute::DevGpuMetrics => Descriptor {
            dir: Device,
            file: "gpu_metrics",
            direction: ReadOnly,
            parser: P::BinaryMetrics,
            unit: U::None,
            companion: None,
        },
        Attribute::DevComputePartition => Descriptor {
            dir: Device,
            file: "current_compute_partition",
            direction: ReadWrite,
            parser: P::StringLine,
            unit: U::None,
            companion: None,
        },
        Attribute::DevMemoryPartition => Descriptor {
            dir: Device,
            file: "current_memory_partition",
            direction: ReadWrite,
            parser: P::StringLine,
            unit: U::None,
            companion: None,
        },
        Attribute::DevNumaNode => Descriptor {
            dir: Device,
            file: "numa_node",
            direction: ReadOnly,
            parser: P::DecimalI64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevTemperature(sensor) => Descriptor {
            dir: Hwmon,
            file: match sensor {
                TempSensor::Edge => "temp1_input",
                TempSensor::Junction => "temp2_input",
                TempSensor::Memory => "temp3_input",
            },
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::MilliDegreesC,
            companion: None,
        },
        Attribute::DevVoltage => Descriptor {
            dir: Hwmon,
            file: "in0_input",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::MilliVolts,
            companion: None,
        },
        Attribute::DevFanSpeed => Descriptor {
            dir: Hwmon,
            file: "pwm1",
            direction: ReadWrite,
            parser: P::DecimalU64,
            unit: U::Raw0To255,
            companion: Some(Companion {
                file_suffix: "pwm1_enable",
                value: "1",
            }),
        },
        Attribute::DevFanSpeedMax => Descriptor {
            dir: Hwmon,
            file: "fan1_max",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::Raw0To255,
            companion: None,
        },
        Attribute::DevFanEnable => Descriptor {
            dir: Hwmon,
            file: "pwm1_enable",
            direction: ReadWrite,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevPcieReplayCount => Descriptor {
            dir: Device,
            file: "pcie_replay_count",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevFanRpm => Descriptor {
            dir: Hwmon,
            file: "fan1_input",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::Rpm,
            companion: None,
        },
        // amdgpu exposes one `fw_version/<block>_fw_version` file per
        // firmware block; RAS TA is used here as the representative block
        // rather than enumerating all of `rsmi_fw_block_t`.
        Attribute::DevFirmwareVersion => Descriptor {
            dir: Device,
            file: "fw_version/ta_ras_fw_version",
            direction: ReadOnly,
            parser: P::HexU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevRasFeatures => Descriptor {
            dir: Device,
            file: "ras/features",
            direction: ReadOnly,
            parser: P::HexU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevXgmiErrorStatus => Descriptor {
            dir: Device,
            file: "xgmi_error",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevXgmiHiveId => Descriptor {
            dir: Device,
            file: "xgmi_hive_id",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevTopoLinkWeight => Descriptor {
            dir: KfdTopology,
            file: "",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
        Attribute::DevTopoLinkType => Descriptor {
            dir: KfdTopology,
            file: "",
            direction: ReadOnly,
            parser: P::DecimalU64,
            unit: U::None,
            companion: None,
        },
    }
}

/// Whether this attribute is expected to exist at all on some device — used
/// at registration time to build the per-device support bitmap. A path
/// existing and being readable/writable per `direction` is the actual test,
/// performed by the registry against the real filesystem; this just lists
/// every attribute worth probing this way.
///
/// [`Attribute::DevTopoLinkWeight`] and [`Attribute::DevTopoLinkType`] are
/// deliberately absent: they have no single-device path to probe for
/// existence, so the registry derives their support from KFD node
/// resolution instead (see `registry::probe_card`).
#[must_use]
pub fn all_attributes() -> Vec<Attribute> {
    use Attribute::*;
    vec![
        DevId,
        DevVendorId,
        DevUniqueId,
        DevSerialNumber,
        DevVbiosVersion,
        DevPerfLevel,
        DevOverDriveLevel,
        DevOverDriveClkVoltage,
        DevGpuSClk,
        DevGpuMClk,
        DevPowerCap,
        DevPowerCapRange,
        DevPowerAverage,
        DevMemTotal,
        DevMemUsed,
        DevEccCorrectable,
        DevEccUncorrectable,
        DevGpuMetrics,
        DevComputePartition,
        DevMemoryPartition,
        DevNumaNode,
        DevTemperature(TempSensor::Edge),
        DevTemperature(TempSensor::Junction),
        DevTemperature(TempSensor::Memory),
        DevVoltage,
        DevFanSpeed,
        DevFanSpeedMax,
        DevFanEnable,
        DevFanRpm,
        DevPcieReplayCount,
        DevFirmwareVersion,
        DevRasFeatures,
        DevXgmiErrorStatus,
        DevXgmiHiveId,
    ]
}
