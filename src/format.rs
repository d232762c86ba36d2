use crate::{types::DeviceState, Result};
use std::io::Write;

#[cfg(feature = "serde")]
use std::collections::BTreeMap;

/// Output format for state snapshots
#[derive(Clone, Copy, Debug, Default)]
pub enum Format {
    #[default]
    Text,
    Rust,
    RustPretty,
    #[cfg(feature = "json")]
    Json,
    #[cfg(feature = "json")]
    JsonPretty,
    #[cfg(feature = "yaml")]
    Yaml,
    #[cfg(feature = "toml")]
    Toml,
    #[cfg(feature = "toml")]
    TomlPretty,
}

impl core::str::FromStr for Format {
    type Err = String;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        Ok(match s {
            "x" | "text" => Self::Text,
            "r" | "rust" => Self::Rust,
            "R" | "rust-pretty" => Self::RustPretty,
            #[cfg(feature = "json")]
            "j" | "json" => Self::Json,
            #[cfg(feature = "json")]
            "J" | "json-pretty" => Self::JsonPretty,
            #[cfg(feature = "yaml")]
            "y" | "yaml" => Self::Yaml,
            #[cfg(feature = "toml")]
            "t" | "toml" => Self::Toml,
            #[cfg(feature = "toml")]
            "T" | "toml-pretty" => Self::TomlPretty,
            _ => return Err(format!("Unknown data format: {s}")),
        })
    }
}

impl Format {
    /// Write one rendering of the snapshot to the output
    pub fn format_snapshot(
        &self,
        snapshot: &[(String, DeviceState)],
        output: &mut dyn Write,
    ) -> Result<()> {
        match self {
            Self::Text => format_text(snapshot, output)?,
            Self::Rust => write!(output, "{snapshot:?}")?,
            Self::RustPretty => write!(output, "{snapshot:#?}")?,
            #[cfg(feature = "json")]
            Self::Json => serde_json::to_writer(output, &by_name(snapshot))?,
            #[cfg(feature = "json")]
            Self::JsonPretty => serde_json::to_writer_pretty(output, &by_name(snapshot))?,
            #[cfg(feature = "yaml")]
            Self::Yaml => serde_yaml::to_writer(output, &by_name(snapshot))?,
            #[cfg(feature = "toml")]
            Self::Toml => write!(output, "{}", serde_toml::to_string(&by_name(snapshot))?)?,
            #[cfg(feature = "toml")]
            Self::TomlPretty => write!(
                output,
                "{}",
                serde_toml::to_string_pretty(&by_name(snapshot))?
            )?,
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
fn by_name(snapshot: &[(String, DeviceState)]) -> BTreeMap<&str, &DeviceState> {
    snapshot
        .iter()
        .map(|(name, state)| (name.as_str(), state))
        .collect()
}

fn format_text(snapshot: &[(String, DeviceState)], output: &mut dyn Write) -> std::io::Result<()> {
    for (name, state) in snapshot {
        let link = if state.connected { "up" } else { "down" };
        writeln!(output, "{name} [{link}] {}", state.last_update)?;
        if !state.status.is_empty() {
            writeln!(output, "  status: {}", state.status)?;
        }
        if !state.cells.voltages.is_empty() {
            let cells = state
                .cells
                .voltages
                .iter()
                .map(|volts| format!("{volts:.3}"))
                .collect::<Vec<_>>()
                .join(" ");
            writeln!(output, "  cells [V]: {cells} (total {:.3})", state.cells.total)?;
        }
        if state.pack != Default::default() {
            let pack = &state.pack;
            writeln!(
                output,
                "  pack: {:.2} V {:+.2} A {:.2}/{:.2} Ah cycles {} SoC {}%",
                pack.voltage,
                pack.current,
                pack.residual_capacity,
                pack.nominal_capacity,
                pack.cycle_count,
                pack.soc
            )?;
        }
    }
    Ok(())
}
