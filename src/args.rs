//! Command-line argument parsing and processing.
//!
//! Without a command the binary runs the daemon. The `get`, `watch` and `set`
//! commands talk to an already running daemon over its control socket.

use serde_json::{Value, json};

/// Represents the parsed command-line arguments and their intended actions.
#[derive(Debug, PartialEq)]
pub enum CliAction {
    /// Run the daemon with these settings
    Run {
        debug_enabled: bool,
        config_path: Option<String>,
    },
    /// Print the daemon's current state once
    Get { json: bool },
    /// Stream state changes until interrupted
    Watch { json: bool },
    /// Change one setting on the running daemon
    Set(SetField),
    /// Display help information and exit
    ShowHelp,
    /// Display version information and exit
    ShowVersion,
    /// Show help due to invalid arguments and exit
    ShowHelpDueToError,
}

/// A setting changed by `nightlight set`.
#[derive(Debug, Clone, PartialEq)]
pub enum SetField {
    Temperature { low: u32, high: u32 },
    Location { latitude: f64, longitude: f64 },
    ManualTimes { sunrise: String, sunset: String },
    ClearManualTimes,
    UseIpLocation(bool),
    Gamma(f64),
    Enabled(bool),
}

impl SetField {
    /// IPC method and params carrying this change.
    pub fn to_request(&self) -> (&'static str, Value) {
        match self {
            SetField::Temperature { low, high } => {
                ("gamma.setTemperature", json!({ "low": low, "high": high }))
            }
            SetField::Location {
                latitude,
                longitude,
            } => (
                "gamma.setLocation",
                json!({ "latitude": latitude, "longitude": longitude }),
            ),
            SetField::ManualTimes { sunrise, sunset } => (
                "gamma.setManualTimes",
                json!({ "sunrise": sunrise, "sunset": sunset }),
            ),
            SetField::ClearManualTimes => ("gamma.setManualTimes", json!({})),
            SetField::UseIpLocation(use_ip) => ("gamma.setUseIPLocation", json!({ "use": use_ip })),
            SetField::Gamma(gamma) => ("gamma.setGamma", json!({ "gamma": gamma })),
            SetField::Enabled(enabled) => ("gamma.setEnabled", json!({ "enabled": enabled })),
        }
    }
}

/// Result of parsing command-line arguments.
pub struct ParsedArgs {
    pub action: CliAction,
}

impl ParsedArgs {
    /// Parse command-line arguments into a structured result.
    ///
    /// The first element is the program name and is skipped. `--help` and
    /// `--version` take precedence over everything else.
    pub fn parse<I, S>(args: I) -> ParsedArgs
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let args: Vec<String> = args
            .into_iter()
            .skip(1)
            .map(|s| s.as_ref().to_string())
            .collect();

        if args.iter().any(|arg| arg == "--help" || arg == "-h") {
            return ParsedArgs {
                action: CliAction::ShowHelp,
            };
        }
        if args
            .iter()
            .any(|arg| arg == "--version" || arg == "-V" || arg == "-v")
        {
            return ParsedArgs {
                action: CliAction::ShowVersion,
            };
        }

        let action = match parse_action(&args) {
            Ok(action) => action,
            Err(reason) => {
                log_warning!("{reason}");
                CliAction::ShowHelpDueToError
            }
        };
        ParsedArgs { action }
    }

    /// Parse from `std::env::args()`.
    pub fn from_env() -> ParsedArgs {
        Self::parse(std::env::args())
    }
}

fn parse_action(args: &[String]) -> Result<CliAction, String> {
    match args.first().map(String::as_str) {
        Some("get" | "g") => Ok(CliAction::Get {
            json: json_flag(&args[1..])?,
        }),
        Some("watch" | "w") => Ok(CliAction::Watch {
            json: json_flag(&args[1..])?,
        }),
        Some("set" | "s") => parse_set(&args[1..]).map(CliAction::Set),
        _ => parse_run(args),
    }
}

fn parse_run(args: &[String]) -> Result<CliAction, String> {
    let mut debug_enabled = false;
    let mut config_path = None;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--debug" | "-d" => debug_enabled = true,
            "--config" | "-c" => {
                let path = iter
                    .next()
                    .ok_or_else(|| format!("{arg} requires a file path"))?;
                config_path = Some(path.clone());
            }
            _ if arg.starts_with('-') => return Err(format!("Unknown option: {arg}")),
            _ => return Err(format!("Unknown command: {arg}")),
        }
    }

    Ok(CliAction::Run {
        debug_enabled,
        config_path,
    })
}

fn json_flag(args: &[String]) -> Result<bool, String> {
    match args {
        [] => Ok(false),
        [flag] if flag == "--json" || flag == "-j" => Ok(true),
        [other, ..] => Err(format!("Unexpected argument: {other}")),
    }
}

fn parse_set(args: &[String]) -> Result<SetField, String> {
    let values: Vec<&str> = args.iter().skip(1).map(String::as_str).collect();
    let field = args
        .first()
        .ok_or_else(|| "set requires a field: temp, location, times, ip, gamma or enabled".to_string())?;

    match (field.as_str(), values.as_slice()) {
        ("temp" | "temperature", [temp]) => {
            let temp = kelvin(temp)?;
            Ok(SetField::Temperature {
                low: temp,
                high: temp,
            })
        }
        ("temp" | "temperature", [low, high]) => Ok(SetField::Temperature {
            low: kelvin(low)?,
            high: kelvin(high)?,
        }),
        ("location", [latitude, longitude]) => Ok(SetField::Location {
            latitude: float(latitude)?,
            longitude: float(longitude)?,
        }),
        ("times", ["clear"]) => Ok(SetField::ClearManualTimes),
        ("times", [sunrise, sunset]) => Ok(SetField::ManualTimes {
            sunrise: sunrise.to_string(),
            sunset: sunset.to_string(),
        }),
        ("ip", [value]) => switch(value).map(SetField::UseIpLocation),
        ("gamma", [gamma]) => float(gamma).map(SetField::Gamma),
        ("enabled", [value]) => switch(value).map(SetField::Enabled),
        ("temp" | "temperature" | "location" | "times" | "ip" | "gamma" | "enabled", _) => {
            Err(format!("Wrong number of values for '{field}'"))
        }
        _ => Err(format!("Unknown field: {field}")),
    }
}

fn kelvin(value: &str) -> Result<u32, String> {
    value
        .trim_end_matches(['K', 'k'])
        .parse()
        .map_err(|_| format!("Invalid temperature: {value}"))
}

fn float(value: &str) -> Result<f64, String> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Invalid number: {value}"))
}

fn switch(value: &str) -> Result<bool, String> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(format!("Expected on or off, got: {value}")),
    }
}

/// Displays version information using custom logging style.
pub fn display_version_info() {
    log_version!();
    log_pipe!();
    println!("┗ {}", env!("CARGO_PKG_DESCRIPTION"));
}

/// Displays custom help message using logger methods.
pub fn display_help() {
    log_version!();
    log_block_start!(env!("CARGO_PKG_DESCRIPTION"));
    log_block_start!("Usage:");
    log_indented!("nightlight [OPTIONS]            Run the daemon");
    log_indented!("nightlight <COMMAND>            Talk to the running daemon");
    log_block_start!("Options:");
    log_indented!("-c, --config <file>     Use a custom configuration file");
    log_indented!("-d, --debug             Enable detailed debug output");
    log_indented!("-h, --help              Print help information");
    log_indented!("-V, --version           Print version information");
    log_block_start!("Commands:");
    log_indented!("get, g [--json]         Show the current state");
    log_indented!("watch, w [--json]       Print every state change");
    log_indented!("set, s <field> <value>  Change a setting until the daemon exits");
    log_block_start!("Fields:");
    log_indented!("temp <K> | temp <low> <high>");
    log_indented!("location <lat> <lon>");
    log_indented!("times <HH:MM> <HH:MM> | times clear");
    log_indented!("ip on|off");
    log_indented!("gamma <value>");
    log_indented!("enabled on|off");
    log_end!();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliAction {
        let mut full = vec!["nightlight"];
        full.extend_from_slice(args);
        ParsedArgs::parse(full).action
    }

    #[test]
    fn test_parse_no_args() {
        assert_eq!(
            parse(&[]),
            CliAction::Run {
                debug_enabled: false,
                config_path: None,
            }
        );
    }

    #[test]
    fn test_parse_debug_and_config() {
        assert_eq!(
            parse(&["-d", "--config", "/tmp/nl.toml"]),
            CliAction::Run {
                debug_enabled: true,
                config_path: Some("/tmp/nl.toml".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_config_without_path() {
        assert_eq!(parse(&["--config"]), CliAction::ShowHelpDueToError);
    }

    #[test]
    fn test_parse_help_takes_precedence() {
        assert_eq!(parse(&["--debug", "--help"]), CliAction::ShowHelp);
        assert_eq!(parse(&["set", "temp", "-h"]), CliAction::ShowHelp);
    }

    #[test]
    fn test_parse_version_flags() {
        assert_eq!(parse(&["--version"]), CliAction::ShowVersion);
        assert_eq!(parse(&["-V"]), CliAction::ShowVersion);
        assert_eq!(parse(&["-v"]), CliAction::ShowVersion);
    }

    #[test]
    fn test_parse_unknown_argument() {
        assert_eq!(parse(&["--bogus"]), CliAction::ShowHelpDueToError);
        assert_eq!(parse(&["frobnicate"]), CliAction::ShowHelpDueToError);
    }

    #[test]
    fn test_parse_get_and_watch() {
        assert_eq!(parse(&["get"]), CliAction::Get { json: false });
        assert_eq!(parse(&["g", "--json"]), CliAction::Get { json: true });
        assert_eq!(parse(&["watch", "-j"]), CliAction::Watch { json: true });
        assert_eq!(parse(&["watch", "now"]), CliAction::ShowHelpDueToError);
    }

    #[test]
    fn test_parse_set_temperature() {
        assert_eq!(
            parse(&["set", "temp", "4500K"]),
            CliAction::Set(SetField::Temperature {
                low: 4500,
                high: 4500
            })
        );
        assert_eq!(
            parse(&["s", "temp", "3500", "6500"]),
            CliAction::Set(SetField::Temperature {
                low: 3500,
                high: 6500
            })
        );
        assert_eq!(parse(&["set", "temp", "warm"]), CliAction::ShowHelpDueToError);
        assert_eq!(parse(&["set", "temp"]), CliAction::ShowHelpDueToError);
    }

    #[test]
    fn test_parse_set_other_fields() {
        assert_eq!(
            parse(&["set", "location", "52.52", "13.40"]),
            CliAction::Set(SetField::Location {
                latitude: 52.52,
                longitude: 13.40
            })
        );
        assert_eq!(
            parse(&["set", "times", "06:30", "19:00"]),
            CliAction::Set(SetField::ManualTimes {
                sunrise: "06:30".to_string(),
                sunset: "19:00".to_string()
            })
        );
        assert_eq!(
            parse(&["set", "times", "clear"]),
            CliAction::Set(SetField::ClearManualTimes)
        );
        assert_eq!(
            parse(&["set", "ip", "on"]),
            CliAction::Set(SetField::UseIpLocation(true))
        );
        assert_eq!(parse(&["set", "gamma", "0.9"]), CliAction::Set(SetField::Gamma(0.9)));
        assert_eq!(
            parse(&["set", "enabled", "OFF"]),
            CliAction::Set(SetField::Enabled(false))
        );
        assert_eq!(parse(&["set", "gamma", "NaN"]), CliAction::ShowHelpDueToError);
        assert_eq!(parse(&["set", "brightness", "1"]), CliAction::ShowHelpDueToError);
    }

    #[test]
    fn test_set_field_requests() {
        let (method, params) = SetField::Temperature {
            low: 3000,
            high: 6000,
        }
        .to_request();
        assert_eq!(method, "gamma.setTemperature");
        assert_eq!(params, json!({"low": 3000, "high": 6000}));

        let (method, params) = SetField::ClearManualTimes.to_request();
        assert_eq!(method, "gamma.setManualTimes");
        assert_eq!(params, json!({}));

        let (_, params) = SetField::UseIpLocation(false).to_request();
        assert_eq!(params, json!({"use": false}));
    }
}
