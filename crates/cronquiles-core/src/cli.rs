use std::ffi::OsString;
use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{ArgAction, Parser};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use crate::commands::{expand_command_abbrev, known_command_names};
use crate::config::Config;
use crate::datetime::YearMonth;

#[derive(Debug, Clone)]
pub struct PreprocessedArgs {
    pub cleaned_args: Vec<OsString>,
    pub rc_overrides: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
}

impl std::str::FromStr for KeyVal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (k, v) = s
            .split_once('=')
            .ok_or_else(|| anyhow!("expected KEY=VALUE, got: {s}"))?;
        Ok(Self {
            key: k.trim().to_string(),
            value: v.trim().to_string(),
        })
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "cronquiles",
    version,
    about = "Cron-Quiles: tech community events calendar for the terminal",
    disable_help_subcommand = true,
    arg_required_else_help = false
)]
pub struct GlobalCli {
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(short = 'q', long = "quiet", action = ArgAction::Count)]
    pub quiet: u8,

    #[arg(
        long = "rc",
        value_parser = clap::builder::ValueParser::new(|s: &str| s.parse::<KeyVal>()),
        action = ArgAction::Append
    )]
    pub rc_overrides: Vec<KeyVal>,

    #[arg(long = "rcfile")]
    pub rcfile: Option<PathBuf>,

    #[arg(long = "data")]
    pub data: Option<PathBuf>,

    /// Region slug, as the `city` page parameter.
    #[arg(long = "city")]
    pub city: Option<String>,

    /// Interface language (`es` or `en`), as the `lang` page parameter.
    #[arg(long = "lang")]
    pub lang: Option<String>,

    /// Include events that already happened.
    #[arg(long = "past")]
    pub past: bool,

    /// Pin the clock: `now`, `today`, `+3d`, or a timestamp.
    #[arg(long = "now")]
    pub now: Option<String>,

    /// Page URL whose `city`/`lang` query seeds the startup state.
    #[arg(long = "url")]
    pub url: Option<String>,

    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub rest: Vec<OsString>,
}

pub fn init_tracing(verbose: u8, quiet: u8) -> anyhow::Result<()> {
    let default_level = if quiet >= 2 {
        "error"
    } else if quiet == 1 {
        "warn"
    } else if verbose >= 3 {
        "trace"
    } else if verbose == 2 {
        "debug"
    } else if verbose == 1 {
        "info"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| anyhow!("invalid RUST_LOG / log filter: {e}"))?;

    let init_result = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_ansi(std::io::stderr().is_terminal())
        .try_init();

    if let Err(err) = init_result {
        debug!(error = %err, "tracing subscriber already set, continuing");
    }

    Ok(())
}

/// Pull positional `rc.key=value` / `rc.key:value` tokens out of the
/// argument list.
#[tracing::instrument(skip_all)]
pub fn preprocess_args(raw: &[OsString]) -> anyhow::Result<PreprocessedArgs> {
    let mut cleaned = Vec::with_capacity(raw.len());
    let mut overrides: Vec<(String, String)> = Vec::new();

    let mut iter = raw.iter().cloned();
    if let Some(bin) = iter.next() {
        cleaned.push(bin);
    }

    for arg in iter {
        let s = arg.to_string_lossy();
        if let Some(rest) = s.strip_prefix("rc.") {
            let parsed = if let Some((k, v)) = rest.split_once('=') {
                Some((format!("rc.{k}"), v.to_string()))
            } else if let Some((k, v)) = rest.split_once(':') {
                Some((format!("rc.{k}"), v.to_string()))
            } else {
                None
            };

            if let Some((k, v)) = parsed {
                debug!(key = %k, value = %v, "captured positional rc override");
                overrides.push((k, v));
                continue;
            }
        }

        cleaned.push(arg);
    }

    Ok(PreprocessedArgs {
        cleaned_args: cleaned,
        rc_overrides: overrides,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub command: String,
    pub command_args: Vec<String>,
}

impl Invocation {
    /// First token names the command (unique prefixes allowed). A bare
    /// `YYYY-MM` runs the default command for that month.
    #[tracing::instrument(skip(cfg, rest))]
    pub fn parse(cfg: &Config, rest: Vec<OsString>) -> anyhow::Result<Self> {
        let tokens: Vec<String> = rest
            .into_iter()
            .map(|arg| arg.to_string_lossy().to_string())
            .collect();
        let default_command = cfg
            .get("default.command")
            .unwrap_or_else(|| "month".to_string());

        let Some(first) = tokens.first() else {
            debug!(command = %default_command, "no explicit command, using default");
            return Ok(Self {
                command: default_command,
                command_args: vec![],
            });
        };

        if first.parse::<YearMonth>().is_ok() {
            debug!(month = %first, command = %default_command, "month token runs default command");
            return Ok(Self {
                command: default_command,
                command_args: tokens,
            });
        }

        let known = known_command_names();
        let command = expand_command_abbrev(first, &known)
            .ok_or_else(|| anyhow!("unknown or ambiguous command: {first}"))?;
        debug!(token = %first, expanded = %command, "resolved command token");

        Ok(Self {
            command: command.to_string(),
            command_args: tokens[1..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use super::{Invocation, preprocess_args};
    use crate::config::Config;

    fn os(args: &[&str]) -> Vec<OsString> {
        args.iter().map(OsString::from).collect()
    }

    #[test]
    fn extracts_positional_rc_overrides() {
        let pre = preprocess_args(&os(&["cronquiles", "rc.color=off", "month", "rc.feed.timeout:5"]))
            .expect("preprocess");
        assert_eq!(pre.cleaned_args, os(&["cronquiles", "month"]));
        assert_eq!(
            pre.rc_overrides,
            vec![
                ("rc.color".to_string(), "off".to_string()),
                ("rc.feed.timeout".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn resolves_commands_and_month_shortcut() {
        let cfg = Config::default();

        let default = Invocation::parse(&cfg, vec![]).expect("default");
        assert_eq!(default.command, "month");

        let abbreviated = Invocation::parse(&cfg, os(&["up", "2025-03", "3"])).expect("upcoming");
        assert_eq!(abbreviated.command, "upcoming");
        assert_eq!(abbreviated.command_args, vec!["2025-03", "3"]);

        let month = Invocation::parse(&cfg, os(&["2025-04"])).expect("month token");
        assert_eq!(month.command, "month");
        assert_eq!(month.command_args, vec!["2025-04"]);

        assert!(Invocation::parse(&cfg, os(&["frobnicate"])).is_err());
    }
}
