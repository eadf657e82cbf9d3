use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::io::Write;

/// Installs the global logger. `RUST_LOG` takes precedence over `level`.
/// Calling it twice is harmless.
pub fn init(level: LevelFilter) {
    // The builder admits debug records so that `set_verbose` can raise the
    // global max level later without rebuilding the logger.
    let result = Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Debug)
        .parse_default_env()
        .try_init();

    if result.is_ok() {
        if std::env::var_os("RUST_LOG").is_none() {
            log::set_max_level(level);
        }
        log::info!("Logger initialized.");
    }
}

/// Switches between debug and info output at runtime.
pub fn set_verbose(verbose: bool) {
    let level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    log::set_max_level(level);
}
