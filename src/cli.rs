//! Command-line interface.

use std::{ffi::OsString, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{UpdateOptions, report::Report};

/// Finds zombie processes and threads, and the processes keeping them alive.
#[derive(Debug, Parser)]
#[command(name = "zombie-finder", version)]
pub struct Cli {
    /// Outputs details about all zombies and owners instead of a summary.
    #[arg(long)]
    pub details: bool,

    /// Outputs tab-delimited fields instead of aligned text.
    #[arg(long)]
    pub csv: bool,

    /// Considers a process a zombie only if it exited at least this many
    /// seconds ago.
    #[arg(long, value_name = "SECONDS", default_value_t = UpdateOptions::DEFAULT_MIN_AGE.as_secs())]
    pub secs: u64,

    /// Lists all processes with counts of active and zombie threads in each
    /// (tab-delimited).
    #[arg(long)]
    pub threads: bool,

    /// Writes output to a file instead of stdout.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Writes all collected handle and zombie information to uniquely named
    /// files in this directory.
    #[arg(long, value_name = "DIRECTORY")]
    pub diag: Option<String>,

    /// Enables debug logging to stderr.
    #[arg(short, long)]
    pub verbose: bool,
}

/// What the command line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Zombies and the processes holding them.
    Owners {
        /// Report layout.
        report: Report,

        /// Engine options.
        options: UpdateOptions,
    },

    /// Per-process thread counts.
    Threads,
}

/// Invalid command-line usage.
#[derive(thiserror::Error, Debug)]
pub enum UsageError {
    /// `--threads` combined with an option of the owners report.
    #[error("Invalid combination of switches")]
    InvalidCombination,

    /// The diagnostics directory does not exist.
    #[error("--diag argument is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),
}

/// Long option names, and whether each takes a value.
const OPTIONS: &[(&str, bool)] = &[
    ("details", false),
    ("csv", false),
    ("secs", true),
    ("threads", false),
    ("out", true),
    ("diag", true),
    ("verbose", false),
    ("help", false),
    ("version", false),
];

impl Cli {
    /// Parses the command line, accepting the `-word` option spellings in
    /// any letter case as well as `--word`.
    pub fn try_parse_args<I, T>(args: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString>,
    {
        Self::try_parse_from(normalize_args(args))
    }

    /// Validates the options and resolves the requested mode.
    pub fn mode(&self) -> Result<Mode, UsageError> {
        let diag = self.diag.as_deref().filter(|directory| !directory.is_empty());

        if self.threads {
            if self.details
                || self.csv
                || self.secs != UpdateOptions::DEFAULT_MIN_AGE.as_secs()
                || diag.is_some()
            {
                return Err(UsageError::InvalidCombination);
            }

            return Ok(Mode::Threads);
        }

        let diagnostics = match diag {
            Some(directory) => Some(diagnostics_directory(directory)?),
            None => None,
        };

        Ok(Mode::Owners {
            report: Report::new(self.details, self.csv),
            options: UpdateOptions {
                min_age: Duration::from_secs(self.secs),
                diagnostics,
            },
        })
    }
}

/// Rewrites `-word`, `-WORD` and `--Word` to `--word`, and `-?` or `/?`
/// to `--help`. Option values are passed through unchanged, joined to
/// their option as `--word=value`.
fn normalize_args<I, T>(args: I) -> Vec<OsString>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString>,
{
    let mut result = Vec::new();
    let mut value_expected = false;

    for (index, arg) in args.into_iter().map(Into::into).enumerate() {
        if index == 0 {
            result.push(arg);
            continue;
        }

        // Attach the value so that values starting with `-` stay values.
        if value_expected {
            value_expected = false;
            if let Some(option) = result.last_mut() {
                option.push("=");
                option.push(&arg);
            }
            continue;
        }

        let Some(text) = arg.to_str()
        else {
            result.push(arg);
            continue;
        };

        if text == "-?" || text == "/?" {
            result.push(OsString::from("--help"));
            continue;
        }

        let word = text.strip_prefix("--").or_else(|| text.strip_prefix('-'));
        let option = word.and_then(|word| {
            OPTIONS
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(word))
        });

        match option {
            Some(&(name, takes_value)) => {
                value_expected = takes_value;
                result.push(OsString::from(format!("--{name}")));
            }
            None => result.push(arg),
        }
    }

    result
}

/// Trims trailing path separators and checks that the directory exists.
fn diagnostics_directory(directory: &str) -> Result<PathBuf, UsageError> {
    let trimmed = directory.trim_end_matches(['\\', '/']);
    let path = PathBuf::from(if trimmed.is_empty() { directory } else { trimmed });

    if !path.is_dir() {
        return Err(UsageError::NotADirectory(path));
    }

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        let mut argv = vec!["zombie-finder"];
        argv.extend_from_slice(args);
        Cli::try_parse_args(argv).expect("valid arguments")
    }

    #[test]
    fn defaults_to_summary() {
        let mode = parse(&[]).mode().expect("valid mode");

        assert_eq!(
            mode,
            Mode::Owners {
                report: Report::Summary,
                options: UpdateOptions::default(),
            }
        );
    }

    #[test]
    fn selects_report_layout() {
        let cases = [
            (&["--csv"][..], Report::SummaryTsv),
            (&["--details"][..], Report::Details),
            (&["--details", "--csv"][..], Report::DetailsTsv),
        ];

        for (args, expected) in cases {
            match parse(args).mode().expect("valid mode") {
                Mode::Owners { report, .. } => assert_eq!(report, expected),
                Mode::Threads => panic!("unexpected thread report"),
            }
        }
    }

    #[test]
    fn secs_sets_min_age() {
        match parse(&["--secs", "0"]).mode().expect("valid mode") {
            Mode::Owners { options, .. } => assert_eq!(options.min_age, Duration::ZERO),
            Mode::Threads => panic!("unexpected thread report"),
        }
    }

    #[test]
    fn threads_accepts_output_file() {
        let mode = parse(&["--threads", "--out", "threads.tsv"])
            .mode()
            .expect("valid mode");

        assert_eq!(mode, Mode::Threads);
    }

    #[test]
    fn threads_rejects_owner_options() {
        for args in [
            &["--threads", "--details"][..],
            &["--threads", "--csv"][..],
            &["--threads", "--secs", "10"][..],
            &["--threads", "--diag", "."][..],
        ] {
            assert!(matches!(
                parse(args).mode(),
                Err(UsageError::InvalidCombination)
            ));
        }
    }

    #[test]
    fn diag_trims_trailing_separators() {
        let directory = std::env::temp_dir();
        let argument = format!("{}//", directory.display());

        match parse(&["--diag", &argument]).mode().expect("valid mode") {
            Mode::Owners { options, .. } => {
                let diagnostics = options.diagnostics.expect("diagnostics directory");
                assert!(!diagnostics.to_string_lossy().ends_with('/'));
                assert!(diagnostics.is_dir());
            }
            Mode::Threads => panic!("unexpected thread report"),
        }
    }

    #[test]
    fn diag_requires_directory() {
        let missing = std::env::temp_dir().join("zombie-finder-missing-directory");

        assert!(matches!(
            parse(&["--diag", &missing.to_string_lossy()]).mode(),
            Err(UsageError::NotADirectory(_))
        ));
    }

    #[test]
    fn rejects_negative_secs() {
        assert!(Cli::try_parse_args(["zombie-finder", "--secs", "-1"]).is_err());
    }

    #[test]
    fn accepts_single_dash_words() {
        let cli = parse(&["-details", "-csv", "-secs", "5", "-out", "report.tsv"]);

        assert!(cli.details);
        assert!(cli.csv);
        assert_eq!(cli.secs, 5);
        assert_eq!(cli.out, Some(PathBuf::from("report.tsv")));
    }

    #[test]
    fn option_words_ignore_case() {
        assert!(parse(&["-DETAILS"]).details);
        assert!(parse(&["-Threads"]).threads);
        assert!(parse(&["--Csv"]).csv);
    }

    #[test]
    fn option_values_are_not_rewritten() {
        let cli = parse(&["-out", "-DETAILS"]);

        assert!(!cli.details);
        assert_eq!(cli.out, Some(PathBuf::from("-DETAILS")));
    }

    #[test]
    fn question_mark_shows_help() {
        for flag in ["-?", "/?"] {
            let err = Cli::try_parse_args(["zombie-finder", flag]).expect_err("help");
            assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        }
    }

    #[test]
    fn unknown_words_are_rejected() {
        assert!(Cli::try_parse_args(["zombie-finder", "-bogus"]).is_err());
    }
}
