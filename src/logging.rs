//! Ambient logging stack (SPEC_FULL.md §4), carried over from the
//! teacher's `fern` + `chrono` + `log` setup unchanged in spirit.

use log::LevelFilter;

/// Initializes the global logger at the verbosity selected by `-v`
/// repetitions on the CLI. `0` maps to warnings and above; each
/// additional `-v` lowers the threshold by one level.
pub fn init(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    let result = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{} [{}] {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply();

    if let Err(e) = result {
        eprintln!("logger init failed: {}", e);
    }
}
