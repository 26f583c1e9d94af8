//! Command-line flags shared by the binaries.
//!
//! Configuration comes from the environment; the command line only raises log
//! verbosity and selects a sub-command.

#[derive(Debug, Default, PartialEq, Eq)]
pub struct CliArgs {
    /// Level forced by `-v` flags, overriding `LOG_LEVEL`.
    pub log_level: Option<&'static str>,
    pub help: bool,
    /// Positional arguments, in order.
    pub positional: Vec<String>,
}

impl CliArgs {
    pub fn from_env() -> Self {
        Self::parse(std::env::args().skip(1))
    }

    pub fn parse<I>(args: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut verbosity = 0u8;
        let mut help = false;
        let mut positional = Vec::new();

        let mut iter = args.into_iter();
        while let Some(arg) = iter.next() {
            if arg == "--" {
                positional.extend(iter.by_ref());
                break;
            }

            match arg.as_str() {
                "-h" | "--help" => help = true,
                "--verbose" => verbosity = verbosity.saturating_add(1),
                a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                    verbosity = verbosity.saturating_add((a.len() - 1) as u8);
                }
                _ => positional.push(arg),
            }
        }

        Self {
            log_level: verbosity_level(verbosity),
            help,
            positional,
        }
    }
}

/// Each `-v` raises verbosity one tier:
///   -v      → warn
///   -vv     → info
///   -vvv    → debug
///   -vvvv+  → trace
pub fn verbosity_level(verbosity: u8) -> Option<&'static str> {
    match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    }
}
