use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use std::ffi::OsString;
use std::path::PathBuf;

use crate::diff_cmd;
use crate::unszip_cmd;
use crate::PKG_NAME;
use crate::PKG_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogOpts {
    pub filter: LevelFilter,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOpts {
    Diff(diff_cmd::Options),
    Unszip(unszip_cmd::Options),
}

pub fn parse_opts<I, T>(args: I) -> Result<(CommandOpts, LogOpts), clap::Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let diff_subcmd = Command::new("diff")
        .about("Report per-unit size differences between two application archives.")
        .arg(
            Arg::new("A")
                .value_name("A")
                .help("Old archive")
                .required(true),
        )
        .arg(
            Arg::new("B")
                .value_name("B")
                .help("New archive")
                .required(true),
        )
        .arg(
            Arg::new("symbols-a")
                .long("symbols-a")
                .value_name("FILE")
                .requires("symbols-b")
                .help("Symbol archive matching the old archive; enables per-source diffing of shared objects"),
        )
        .arg(
            Arg::new("symbols-b")
                .long("symbols-b")
                .value_name("FILE")
                .requires("symbols-a")
                .help("Symbol archive matching the new archive"),
        );
    let unszip_subcmd = Command::new("unszip")
        .about("Decompress a seekable-zip (szip) stream into a file.")
        .arg(
            Arg::new("INPUT")
                .value_name("INPUT")
                .help("Input file (szip stream or raw ELF image)")
                .required(true),
        )
        .arg(
            Arg::new("OUTPUT")
                .value_name("OUTPUT")
                .help("Output file")
                .required(true),
        );

    let matches = Command::new(PKG_NAME)
        .version(PKG_VERSION)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Set verbosity level"),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(diff_subcmd)
        .subcommand(unszip_subcmd)
        .try_get_matches_from(args)?;

    let log_opts = LogOpts {
        filter: match matches.get_count("verbose") {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        },
    };

    let command = if let Some(matches) = matches.subcommand_matches("diff") {
        CommandOpts::Diff(diff_cmd::Options {
            input_a: PathBuf::from(matches.get_one::<String>("A").unwrap()),
            input_b: PathBuf::from(matches.get_one::<String>("B").unwrap()),
            symbols_a: matches.get_one::<String>("symbols-a").map(PathBuf::from),
            symbols_b: matches.get_one::<String>("symbols-b").map(PathBuf::from),
        })
    } else if let Some(matches) = matches.subcommand_matches("unszip") {
        CommandOpts::Unszip(unszip_cmd::Options {
            input: PathBuf::from(matches.get_one::<String>("INPUT").unwrap()),
            output: PathBuf::from(matches.get_one::<String>("OUTPUT").unwrap()),
        })
    } else {
        unreachable!("subcommand required");
    };
    Ok((command, log_opts))
}
