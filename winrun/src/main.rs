//! winrun - run an unmodified Windows executable on the host.
//!
//! Loads the image through the winhost loader and transfers control; the
//! process exit code is the guest's. Load failures exit with documented
//! codes: 101 malformed, 102 unsupported machine/subsystem, 103
//! unresolved import, 104 allocation denied, 105 image unreadable.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "winrun", version, about = "Run Windows PE executables on a POSIX host")]
struct Args {
    /// Path to the guest PE image.
    image: PathBuf,

    /// Raise log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default))
        .format_timestamp_millis()
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    winhost::init();
    winhost::ke::env::set_command_line(&args.image.to_string_lossy());

    let bytes = match std::fs::read(&args.image)
        .with_context(|| format!("reading {}", args.image.display()))
    {
        Ok(b) => b,
        Err(e) => {
            log::error!("{e:#}");
            return ExitCode::from(105);
        }
    };

    let image = match winhost::ldr::load(&bytes) {
        Ok(image) => image,
        Err(e) => {
            log::error!("load failed: {e}");
            return ExitCode::from(winhost::ldr::exit_code_for(&e) as u8);
        }
    };

    log::info!(
        "guest mapped at {:p} ({} subsystem), entering",
        image.base(),
        if image.is_gui() { "GUI" } else { "console" }
    );
    let code = image.run();
    log::debug!("guest exited with code {code}");
    std::process::exit(code);
}
