//! Per-revision offset and scale tables for the status decoder.
//!
//! Observed firmware revisions disagree on the byte offset of the
//! state-of-charge field and on the fixed-point scale of voltage and current.
//! A mismatched table misreports SoC and current without any decode error, so
//! the table is always selected explicitly per device and never guessed.

/// Known firmware revisions of the status frame layout
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Revision {
    /// SoC at payload offset 19, 10 mV / 10 mA units
    #[default]
    Gen1,
    /// SoC at offset 21, 10 mV / 10 mA units
    Gen2,
    /// SoC at offset 23, 1 mV / 1 mA units
    Gen3,
}

impl core::str::FromStr for Revision {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(match s {
            "1" | "gen1" => Self::Gen1,
            "2" | "gen2" => Self::Gen2,
            "3" | "gen3" => Self::Gen3,
            _ => return Err(format!("Unknown hardware revision: {s}")),
        })
    }
}

impl core::fmt::Display for Revision {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.write_str(match self {
            Self::Gen1 => "gen1",
            Self::Gen2 => "gen2",
            Self::Gen3 => "gen3",
        })
    }
}

impl Revision {
    /// Decoder table for this revision
    pub const fn profile(self) -> Profile {
        match self {
            Self::Gen1 => Profile {
                soc_offset: 19,
                voltage_scale: 1e-2,
                current_scale: 1e-2,
                capacity_scale: 1e-2,
                temp_offsets: &[23, 24],
                verify_checksum: false,
            },
            Self::Gen2 => Profile {
                soc_offset: 21,
                voltage_scale: 1e-2,
                current_scale: 1e-2,
                capacity_scale: 1e-2,
                temp_offsets: &[25, 26],
                verify_checksum: false,
            },
            Self::Gen3 => Profile {
                soc_offset: 23,
                voltage_scale: 1e-3,
                current_scale: 1e-3,
                capacity_scale: 1e-2,
                temp_offsets: &[27, 28],
                verify_checksum: false,
            },
        }
    }
}

/// Offset/scale table consumed by the status decoder
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Profile {
    /// Byte offset of the state-of-charge percentage within the payload
    pub soc_offset: usize,
    /// Volts per raw count of the total-voltage field
    pub voltage_scale: f32,
    /// Amperes per raw count of the signed current field
    pub current_scale: f32,
    /// Ampere-hours per raw count of the capacity fields
    pub capacity_scale: f32,
    /// Payload offsets of optional temperature bytes (raw minus 40 gives °C)
    pub temp_offsets: &'static [usize],
    /// Validate the embedded frame checksum before decoding
    pub verify_checksum: bool,
}

impl Profile {
    pub fn with_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        assert_eq!("gen2".parse::<Revision>(), Ok(Revision::Gen2));
        assert_eq!("3".parse::<Revision>(), Ok(Revision::Gen3));
        assert!("gen4".parse::<Revision>().is_err());
    }

    #[test]
    fn tables_differ() {
        assert_eq!(Revision::Gen1.profile().soc_offset, 19);
        assert_eq!(Revision::Gen2.profile().soc_offset, 21);
        assert_eq!(Revision::Gen3.profile().soc_offset, 23);
        assert_eq!(Revision::Gen3.profile().current_scale, 1e-3);
    }

    #[test]
    fn checksum_toggle() {
        assert!(Revision::Gen1.profile().with_checksum(true).verify_checksum);
    }
}
