use crate::{Error, MacAddr, Result, Revision};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Device identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceId {
    /// MAC Address
    Mac(MacAddr),
    /// Advertised device name
    Name(String),
}

impl core::str::FromStr for DeviceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(s.parse()
            .map(Self::Mac)
            .unwrap_or_else(|_| Self::Name(s.into())))
    }
}

impl From<MacAddr> for DeviceId {
    fn from(mac: MacAddr) -> Self {
        Self::Mac(mac)
    }
}

impl From<&'_ str> for DeviceId {
    fn from(name: &'_ str) -> Self {
        Self::Name(name.into())
    }
}

impl core::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        match self {
            Self::Mac(mac) => mac.fmt(f),
            Self::Name(name) => name.fmt(f),
        }
    }
}

/// Immutable per-device monitoring configuration.
///
/// Parsed from `name=ADDRESS[@revision]`; a bare address doubles as the name.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceConfig {
    /// Logical name, used for the state slot and the sample file
    pub name: String,
    /// Link address (MAC or advertised name)
    pub address: DeviceId,
    /// Status frame layout of this device's firmware
    pub revision: Revision,
}

impl core::str::FromStr for DeviceConfig {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let (spec, revision) = match s.rsplit_once('@') {
            Some((spec, revision)) => (spec, revision.parse()?),
            None => (s, Revision::default()),
        };
        let (name, address) = spec.split_once('=').unwrap_or((spec, spec));
        if name.is_empty() || address.is_empty() {
            return Err(format!("Bad device spec: {s}"));
        }
        let address = address
            .parse()
            .map_err(|error| format!("Bad device address: {error}"))?;
        Ok(Self {
            name: name.into(),
            address,
            revision,
        })
    }
}

/// Decoded cell-voltage frame
#[derive(Clone, Default, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellVoltages {
    /// Per-cell voltages in Volts, in wire order
    pub voltages: Vec<f32>,
    /// Sum of the decoded cells in Volts
    pub total: f32,
}

/// Decoded pack-status frame
#[derive(Clone, Default, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PackStatus {
    /// Total pack voltage in Volts
    pub voltage: f32,
    /// Pack current in Amperes, positive while charging
    pub current: f32,
    /// Residual capacity in Ampere-hours
    pub residual_capacity: f32,
    /// Nominal capacity in Ampere-hours
    pub nominal_capacity: f32,
    /// Number of charge cycles
    pub cycle_count: usize,
    /// State of charge in percents
    pub soc: u8,
    /// Temperature sensor readings in Celsius degrees
    pub temperatures: Vec<f32>,
}

/// One decoded response frame
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    CellVoltages(CellVoltages),
    PackStatus(PackStatus),
}

/// Latest known values for one device.
///
/// Written only by the owning session, read by observers as a whole-record
/// snapshot. Frozen at the last known values while disconnected.
#[derive(Clone, Default, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceState {
    /// Link is up and the device answers
    pub connected: bool,
    /// Latest cell-voltage record
    pub cells: CellVoltages,
    /// Latest pack-status record
    pub pack: PackStatus,
    /// Short human-readable status line (diagnostics while disconnected)
    pub status: String,
    /// Wall-clock `HH:MM:SS` of the last successful decode
    pub last_update: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_config_full() {
        let config: DeviceConfig = "akku-1=A4:C1:38:A0:D1:5B@gen2".parse().unwrap();
        assert_eq!(config.name, "akku-1");
        assert_eq!(
            config.address,
            DeviceId::Mac("A4:C1:38:A0:D1:5B".parse().unwrap())
        );
        assert_eq!(config.revision, Revision::Gen2);
    }

    #[test]
    fn device_config_bare_address() {
        let config: DeviceConfig = "A4:C1:38:A0:D1:5B".parse().unwrap();
        assert_eq!(config.name, "A4:C1:38:A0:D1:5B");
        assert_eq!(config.revision, Revision::Gen1);
    }

    #[test]
    fn device_config_by_name() {
        let config: DeviceConfig = "pack=xiaoxiang-bms".parse().unwrap();
        assert_eq!(config.address, DeviceId::Name("xiaoxiang-bms".into()));
    }

    #[test]
    fn device_config_bad() {
        assert!("".parse::<DeviceConfig>().is_err());
        assert!("pack=".parse::<DeviceConfig>().is_err());
        assert!("pack=addr@gen9".parse::<DeviceConfig>().is_err());
    }
}
