// Command-line parsing. Grounded on main.py's `parse_args`/
// `check_required_parameters`: each top-level flag (`--ram`, `--console`, ...)
// carries its own `key=value` pairs rather than clap's usual one-value-per-flag
// model, and the same flag family may repeat up to ten times with a numeric
// suffix (`--ram2`, `--ram3`, ...). clap's builder API handles the outer flag
// names, repetition and `--help`; the inner `key=value` bodies are parsed by
// hand, the same way the reference walks `sys.argv` itself.

use std::path::PathBuf;

use clap::{Arg, ArgAction, ArgMatches, Command};

use crate::builder::DeviceSpec;
use crate::bus::Cell;
use crate::error::BuildError;

const MAX_REPEATS: usize = 10;

/// Every device family but `processor` requires at least one `key=value`
/// token; `processor` may appear bare (`--processor` with no body at all,
/// defaulting its address to zero).
const FAMILIES: &[(&str, usize)] =
    &[("ram", 1), ("processor", 0), ("console", 1), ("compiler", 1), ("soundcard", 1), ("rtc", 1)];

/// One flag occurrence can carry several whitespace-separated `key=value`
/// tokens (spec.md §6's `nargs='*'` body), and the same family may repeat up
/// to ten times under a numeric suffix alias (`--ram2` .. `--ram10`). clap's
/// `num_args(min..)` + `ArgAction::Append` captures exactly this shape
/// without flattening occurrences into one another: `ArgMatches::
/// get_occurrences` hands back one inner sequence of tokens per occurrence,
/// regardless of which alias invoked it.
fn family_arg(id: &'static str, min_tokens: usize) -> Arg {
    let aliases: Vec<String> = (2..=MAX_REPEATS).map(|n| format!("{id}{n}")).collect();
    Arg::new(id)
        .long(id)
        .aliases(aliases)
        .action(ArgAction::Append)
        .num_args(min_tokens..)
        .value_name("KEY=VALUE")
}

pub fn command() -> Command {
    let mut command = Command::new("rubbish").about("Fantasy 32-bit machine emulator");
    for &(id, min_tokens) in FAMILIES {
        command = command.arg(family_arg(id, min_tokens));
    }
    command
}

/// Parses `args` (including the program name in position zero, matching
/// `std::env::args_os`'s convention) against the CLI surface above.
pub fn try_parse_from<I, T>(args: I) -> Result<ArgMatches, clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    command().try_get_matches_from(args)
}

pub fn parse() -> Result<ArgMatches, clap::Error> {
    try_parse_from(std::env::args_os())
}

/// Every `key=value` token belonging to one flag occurrence, looked up by
/// key.
struct KeyValues(std::collections::HashMap<String, String>);

impl KeyValues {
    fn from_tokens<'a>(tokens: impl Iterator<Item = &'a str>) -> Self {
        let mut map = std::collections::HashMap::new();
        for pair in tokens {
            if let Some((key, value)) = pair.split_once('=') {
                map.insert(key.to_string(), value.to_string());
            }
        }
        KeyValues(map)
    }

    fn required(&self, device: &'static str, key: &'static str) -> Result<&str, BuildError> {
        self.0.get(key).map(String::as_str).ok_or(BuildError::MissingParameter { device, key })
    }

    fn cell(&self, device: &'static str, key: &'static str) -> Result<Cell, BuildError> {
        self.required(device, key)?.parse().map_err(|_| BuildError::MissingParameter { device, key })
    }

    fn optional_cell(&self, key: &str, default: Cell) -> Cell {
        self.0.get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }
}

fn ram_spec<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<DeviceSpec, BuildError> {
    let kv = KeyValues::from_tokens(tokens);
    Ok(DeviceSpec::Ram { address: kv.cell("ram", "address")?, size: kv.cell("ram", "size")? })
}

fn processor_spec<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<DeviceSpec, BuildError> {
    let kv = KeyValues::from_tokens(tokens);
    Ok(DeviceSpec::Processor { address: kv.optional_cell("address", 0) })
}

fn console_spec<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<DeviceSpec, BuildError> {
    let kv = KeyValues::from_tokens(tokens);
    Ok(DeviceSpec::Console {
        address: kv.cell("console", "address")?,
        interrupt: kv.cell("console", "interrupt")?,
        width: kv.cell("console", "width")? as usize,
        height: kv.cell("console", "height")? as usize,
    })
}

fn compiler_spec<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<DeviceSpec, BuildError> {
    let kv = KeyValues::from_tokens(tokens);
    Ok(DeviceSpec::Compiler {
        address: kv.cell("compiler", "address")?,
        size: kv.cell("compiler", "size")?,
        program: PathBuf::from(kv.required("compiler", "program")?),
    })
}

fn soundcard_spec<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<DeviceSpec, BuildError> {
    let kv = KeyValues::from_tokens(tokens);
    Ok(DeviceSpec::SoundCard { address: kv.cell("soundcard", "address")? })
}

fn rtc_spec<'a>(tokens: impl Iterator<Item = &'a str>) -> Result<DeviceSpec, BuildError> {
    let kv = KeyValues::from_tokens(tokens);
    Ok(DeviceSpec::Rtc { address: kv.cell("rtc", "address")?, interrupt: kv.cell("rtc", "interrupt")? })
}

/// Every occurrence of `id` (regardless of which numeric-suffix alias
/// invoked it), each as its own token sequence -- `get_occurrences` keeps
/// occurrence boundaries intact instead of flattening them the way a plain
/// `get_many` would.
fn occurrences<'a>(matches: &'a ArgMatches, id: &str) -> Vec<Vec<&'a str>> {
    matches
        .get_occurrences::<String>(id)
        .map(|occurrences| occurrences.map(|tokens| tokens.map(String::as_str).collect()).collect())
        .unwrap_or_default()
}

/// Flattens the parsed CLI surface into the ordered list of device specs
/// the builder expects, one spec per flag occurrence, each occurrence's
/// `key=value` tokens kept together and capped at ten occurrences per
/// family (spec.md §6's "repeatable up to ten times").
pub fn device_specs(matches: &ArgMatches) -> Result<Vec<DeviceSpec>, BuildError> {
    let mut specs = Vec::new();

    for tokens in occurrences(matches, "ram").into_iter().take(MAX_REPEATS) {
        specs.push(ram_spec(tokens.into_iter())?);
    }
    for tokens in occurrences(matches, "processor").into_iter().take(MAX_REPEATS) {
        specs.push(processor_spec(tokens.into_iter())?);
    }
    for tokens in occurrences(matches, "console").into_iter().take(MAX_REPEATS) {
        specs.push(console_spec(tokens.into_iter())?);
    }
    for tokens in occurrences(matches, "compiler").into_iter().take(MAX_REPEATS) {
        specs.push(compiler_spec(tokens.into_iter())?);
    }
    for tokens in occurrences(matches, "soundcard").into_iter().take(MAX_REPEATS) {
        specs.push(soundcard_spec(tokens.into_iter())?);
    }
    for tokens in occurrences(matches, "rtc").into_iter().take(MAX_REPEATS) {
        specs.push(rtc_spec(tokens.into_iter())?);
    }

    Ok(specs)
}
