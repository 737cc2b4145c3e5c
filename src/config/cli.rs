//! Command-Line Overrides
//!
//! Turns the process arguments into configuration overrides. Options
//! pipegen does not know are collected verbatim and forwarded to every job.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::error::{PipeError, Result};

/// How an option consumes its value(s).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OptionKind {
    /// Boolean switch, takes no value
    Flag,
    /// Exactly one string value
    Text,
    /// Exactly one non-negative integer
    Integer,
    /// `true` or `false`
    Boolean,
    /// One or more values up to the next option
    List,
}

/// Options that map onto configuration keys.
const OPTIONS: &[(&str, OptionKind)] = &[
    ("label", OptionKind::Text),
    ("outdir", OptionKind::Text),
    ("detectors", OptionKind::List),
    ("known-detectors", OptionKind::List),
    ("sampler", OptionKind::List),
    ("coherence-test", OptionKind::Flag),
    ("queue", OptionKind::Integer),
    ("accounting", OptionKind::Text),
    ("executable", OptionKind::Text),
    ("generation-executable", OptionKind::Text),
    ("exe-library", OptionKind::Text),
    ("x509", OptionKind::Text),
    ("credential-env", OptionKind::Text),
    ("require-credential", OptionKind::Flag),
    ("injection", OptionKind::Flag),
    ("injection-file", OptionKind::Text),
    ("injection-executable", OptionKind::Text),
    ("n-injection", OptionKind::Integer),
    ("request-memory", OptionKind::Text),
    ("request-memory-generation", OptionKind::Text),
    ("request-disk", OptionKind::Text),
    ("request-cpus", OptionKind::Integer),
    ("scheduler", OptionKind::Text),
    ("scheduler-args", OptionKind::Text),
    ("scheduler-module", OptionKind::Text),
    ("scheduler-env", OptionKind::Text),
    ("universe", OptionKind::Text),
    ("getenv", OptionKind::Boolean),
    ("notification", OptionKind::Text),
    ("requirements", OptionKind::Text),
    ("retry", OptionKind::Integer),
    ("submit-command", OptionKind::Text),
    ("submit", OptionKind::Flag),
];

/// Alternative spellings accepted on the command line.
const ALIASES: &[(&str, &str)] = &[
    ("include-detectors", "detectors"),
    ("X509", "x509"),
];

/// Parsed command line.
#[derive(Debug, Default)]
pub struct CliArgs {
    /// Configuration file (first positional argument)
    pub config_path: Option<PathBuf>,
    /// Known options, keyed by configuration key
    pub overrides: Mapping,
    /// Unrecognized tokens, in order
    pub passthrough: Vec<String>,
    pub help: bool,
    pub version: bool,
    pub exe_help: bool,
    pub verbose: bool,
}

fn lookup(name: &str) -> Option<(&'static str, OptionKind)> {
    let canonical = ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, key)| *key)
        .unwrap_or(name);

    OPTIONS
        .iter()
        .find(|(key, _)| *key == canonical)
        .map(|(key, kind)| (*key, *kind))
}

fn is_option(token: &str) -> bool {
    token.starts_with('-') && token.len() > 1
}

/// Parses command-line arguments (including the program name) into [`CliArgs`].
pub fn parse_arguments(args: &[String]) -> Result<CliArgs> {
    let mut cli = CliArgs::default();
    let mut i = 1; // Skip program name
    let mut after_unknown = false;

    while i < args.len() {
        let arg = &args[i];
        let follows_unknown = std::mem::replace(&mut after_unknown, false);

        match arg.as_str() {
            "--help" | "-h" => cli.help = true,
            "--version" | "-V" => cli.version = true,
            "--exe-help" => cli.exe_help = true,
            "--verbose" | "-v" => {
                cli.verbose = true;
                cli.overrides.insert(Value::from("verbose"), Value::Bool(true));
            }
            token if token.starts_with("--") => {
                let (name, inline) = match token[2..].split_once('=') {
                    Some((name, value)) => (name, Some(value.to_string())),
                    None => (&token[2..], None),
                };

                match lookup(name) {
                    Some((key, kind)) => {
                        let stop_at_file = cli.config_path.is_none();
                        let value = take_value(args, &mut i, token, kind, inline, stop_at_file)?;
                        cli.overrides.insert(Value::from(key), value);
                    }
                    None => {
                        after_unknown = inline.is_none();
                        cli.passthrough.push(arg.clone());
                    }
                }
            }
            token if is_option(token) => {
                after_unknown = true;
                cli.passthrough.push(arg.clone());
            }
            _ => {
                // A bare token after an unknown option is most likely its value.
                let is_value = follows_unknown && !Path::new(arg).is_file();
                if cli.config_path.is_none() && !is_value {
                    cli.config_path = Some(PathBuf::from(arg));
                } else {
                    cli.passthrough.push(arg.clone());
                }
            }
        }
        i += 1;
    }

    Ok(cli)
}

/// Consumes the value(s) of a known option, advancing `i` past them.
fn take_value(
    args: &[String],
    i: &mut usize,
    option: &str,
    kind: OptionKind,
    inline: Option<String>,
    stop_at_file: bool,
) -> Result<Value> {
    if kind == OptionKind::Flag {
        if inline.is_some() {
            return Err(PipeError::Config(format!("{} does not take a value", option)));
        }
        return Ok(Value::Bool(true));
    }

    if kind == OptionKind::List {
        let mut values: Vec<Value> = inline.into_iter().map(Value::from).collect();
        // An existing file ends the list: it is the configuration file.
        while *i + 1 < args.len()
            && !is_option(&args[*i + 1])
            && !(stop_at_file && Path::new(&args[*i + 1]).is_file())
        {
            *i += 1;
            values.push(Value::from(args[*i].clone()));
        }
        if values.is_empty() {
            return Err(PipeError::Config(format!("{} requires at least one value", option)));
        }
        return Ok(Value::Sequence(values));
    }

    let raw = match inline {
        Some(v) => v,
        None => {
            *i += 1;
            if *i >= args.len() {
                return Err(PipeError::Config(format!("{} requires a value", option)));
            }
            args[*i].clone()
        }
    };

    match kind {
        OptionKind::Integer => raw
            .parse::<u64>()
            .map(Value::from)
            .map_err(|_| PipeError::Config(format!("Invalid {} value: {}", option, raw))),
        OptionKind::Boolean => match raw.to_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(PipeError::Config(format!("Invalid {} value: {}", option, raw))),
        },
        _ => Ok(Value::from(raw)),
    }
}
