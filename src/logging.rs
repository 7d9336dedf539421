use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use crate::errors::ConfigError;

const PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {l} [{t}] - {m}{n}";

/// Builds and installs the process-wide log4rs logger.
///
/// # Arguments
///
/// * 'log_path' - path to the log file
/// * 'log_level' - minimum level recorded to the file appender
/// * 'log_to_stdout' - whether to also attach a console appender at the same level
pub fn setup_logger(log_path: &str, log_level: LevelFilter, log_to_stdout: bool) -> Result<(), ConfigError> {
    let file = FileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(PATTERN)))
        .build(log_path)?;

    let mut builder = Config::builder().appender(Appender::builder().build("file", Box::new(file)));
    let mut root = Root::builder().appender("file");

    if log_to_stdout {
        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new(PATTERN)))
            .build();
        builder = builder.appender(Appender::builder().build("stdout", Box::new(stdout)));
        root = root.appender("stdout");
    }

    // Quiet down noisy dependency crates regardless of our own level.
    let builder = builder
        .logger(Logger::builder().build("rayon_core", LevelFilter::Warn))
        .logger(Logger::builder().build("mio", LevelFilter::Warn));

    let config = builder.build(root.build(log_level))?;
    log4rs::init_config(config)?;

    Ok(())
}
