use log::error;

mod cli;
mod diff_cmd;
mod string_utils;
mod unszip_cmd;

pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_log(level: log::LevelFilter) -> anyhow::Result<()> {
    let local_level = level;
    fern::Dispatch::new()
        .format(move |out, message, record| {
            if local_level > log::LevelFilter::Info {
                // Add some extra info to each message in debug
                out.finish(format_args!(
                    "[{}]({})({}) {}",
                    chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f"),
                    record.target(),
                    record.level(),
                    message
                ))
            } else {
                out.finish(format_args!("{}", message))
            }
        })
        .level(level)
        // Deltas go to stdout, diagnostics to stderr.
        .chain(std::io::stderr())
        .apply()?;
    Ok(())
}

fn main() {
    let (command, log_opts) = match cli::parse_opts(std::env::args_os()) {
        Ok(opts) => opts,
        Err(err) => err.exit(),
    };
    if let Err(err) = init_log(log_opts.filter) {
        eprintln!("unable to initialize log: {}", err);
        std::process::exit(1);
    }
    let result = match command {
        cli::CommandOpts::Diff(options) => diff_cmd::run(options),
        cli::CommandOpts::Unszip(options) => unszip_cmd::run(options),
    };
    if let Err(err) = result {
        error!("error: {:#}", err);
        std::process::exit(1);
    }
}
