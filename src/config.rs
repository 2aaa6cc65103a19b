//! INI-style settings file, per the keys in §6 of the control-loop
//! interface. `dev.ini` is the default path the CLI loads.

use std::path::Path;

use ini::Ini;

use crate::error::ConfigError;

#[derive(Debug, Clone)]
pub struct DaqSettings {
    pub channels: usize,
    pub dummy: bool,
    pub input_channels: Vec<String>,
    pub output_channels: Vec<String>,
    pub output_clock: String,
    pub output_clock_channel: String,
    pub input_clock_channel: String,
}

#[derive(Debug, Clone)]
pub struct FblSettings {
    pub frequency: f64,
    pub points: usize,
    pub ki: f64,
    pub kp: f64,
    pub averaging: f64,
}

#[derive(Debug, Clone)]
pub struct TcpSettings {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub daq: DaqSettings,
    pub fbl: FblSettings,
    pub tcp: TcpSettings,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_file(path).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        let daq_section = ini.section(Some("DAQ"));
        let fbl_section = ini.section(Some("FBL"));
        let tcp_section = ini.section(Some("TCP"));

        let channels = parse_or(daq_section, "channels", 8, parse_usize)?;
        if !(1..=64).contains(&channels) {
            return Err(ConfigError::ChannelsOutOfRange(channels));
        }

        let points = match fbl_section.and_then(|s| s.get("points")) {
            Some(raw) => parse_usize("points", raw)?,
            None => match fbl_section.and_then(|s| s.get("max_rate")) {
                Some(raw) => {
                    let frequency = parse_or(fbl_section, "frequency", 17.76, parse_f64)?;
                    let max_rate = parse_f64("max_rate", raw)?;
                    (max_rate / frequency).floor().max(2.0) as usize
                }
                None => 500,
            },
        };
        if !(2..=10_000).contains(&points) {
            return Err(ConfigError::PointsOutOfRange(points));
        }

        let daq = DaqSettings {
            channels,
            dummy: parse_or(daq_section, "dummy", true, parse_bool)?,
            input_channels: parse_csv(daq_section, "input_channels"),
            output_channels: parse_csv(daq_section, "output_channels"),
            output_clock: parse_string_or(daq_section, "output_clock", ""),
            output_clock_channel: parse_string_or(daq_section, "output_clock_channel", ""),
            input_clock_channel: parse_string_or(daq_section, "input_clock_channel", ""),
        };

        let fbl = FblSettings {
            frequency: parse_or(fbl_section, "frequency", 17.76, parse_f64)?,
            points,
            ki: parse_or(fbl_section, "ki", 0.01, parse_f64)?,
            kp: parse_or(fbl_section, "kp", 0.0, parse_f64)?,
            averaging: parse_or(fbl_section, "averaging", 1.0, parse_f64)?,
        };

        let tcp = TcpSettings {
            enabled: parse_or(tcp_section, "enabled", false, parse_bool)?,
            port: parse_or(tcp_section, "port", 0u16, |k, v| {
                parse_usize(k, v).map(|n| n as u16)
            })?,
        };

        Ok(Self { daq, fbl, tcp })
    }
}

fn parse_or<T, F>(
    section: Option<&ini::Properties>,
    key: &str,
    default: T,
    parse: F,
) -> Result<T, ConfigError>
where
    F: Fn(&str, &str) -> Result<T, ConfigError>,
{
    match section.and_then(|s| s.get(key)) {
        Some(raw) => parse(key, raw),
        None => Ok(default),
    }
}

fn parse_string_or(section: Option<&ini::Properties>, key: &str, default: &str) -> String {
    section
        .and_then(|s| s.get(key))
        .map(str::to_string)
        .unwrap_or_else(|| default.to_string())
}

fn parse_csv(section: Option<&ini::Properties>, key: &str) -> Vec<String> {
    section
        .and_then(|s| s.get(key))
        .map(|raw| raw.split(',').map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn parse_usize(key: &str, raw: &str) -> Result<usize, ConfigError> {
    raw.trim().parse::<usize>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_f64(key: &str, raw: &str) -> Result<f64, ConfigError> {
    raw.trim().parse::<f64>().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: raw.to_string(),
    })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key: key.to_string(), value: raw.to_string() }),
    }
}
