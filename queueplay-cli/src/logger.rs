use std::{ fs::File, io::Write };

use log::LevelFilter;

const LOG_FILE: &str = "queueplay.log";

/// Send log records to `queueplay.log` so they do not interleave with the
/// prompt. `RUST_LOG` overrides the default level.
pub fn setup_logging() -> anyhow::Result<()> {
    let _ = std::fs::remove_file(LOG_FILE);
    let file = File::create(LOG_FILE)?;

    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format(|buf, record| {
            writeln!(buf, "[{}][{}] {}", buf.timestamp_seconds(), record.level(), record.args())
        })
        .target(env_logger::Target::Pipe(Box::new(file)))
        .try_init()?;

    Ok(())
}
