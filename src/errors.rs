use std::fmt;
use std::fmt::Formatter;
use chrono::Local;

/// Missing or malformed required scalar/list/map, an unknown tariff identifier,
/// or a schedule key out of range. Fatal for the run.
#[derive(Debug)]
pub struct ParameterError(pub String);

impl fmt::Display for ParameterError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "ParameterError: {}", self.0)
    }
}
impl From<&str> for ParameterError {
    fn from(e: &str) -> Self { ParameterError(e.to_string()) }
}
impl From<String> for ParameterError {
    fn from(e: String) -> Self { ParameterError(e) }
}

/// Vector length mismatch with the hourly axis, a mask sum that doesn't add
/// up to 24, or a required series that is entirely absent. Fatal for the run.
#[derive(Debug)]
pub struct DataShapeError(pub String);

impl fmt::Display for DataShapeError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "DataShapeError: {}", self.0)
    }
}
impl From<&str> for DataShapeError {
    fn from(e: &str) -> Self { DataShapeError(e.to_string()) }
}
impl From<String> for DataShapeError {
    fn from(e: String) -> Self { DataShapeError(e) }
}

/// NaN or +/-Inf in a persisted output outside the permitted price-NaN
/// convention, a negative realized flow, or SOC outside its bounds. Fatal
/// once detected, whether inline during commit or by the validator.
#[derive(Debug)]
pub struct NumericError(pub String);

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "NumericError: {}", self.0)
    }
}
impl From<&str> for NumericError {
    fn from(e: &str) -> Self { NumericError(e.to_string()) }
}
impl From<String> for NumericError {
    fn from(e: String) -> Self { NumericError(e) }
}

/// A connectivity or I/O hiccup on a suspension point (parameter read, axis
/// read, final persistence). Retried by the caller; the pipeline itself is
/// not restarted mid-run.
#[derive(Debug)]
pub struct TransientIOError(pub String);

impl fmt::Display for TransientIOError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "TransientIOError: {}", self.0)
    }
}
impl From<&str> for TransientIOError {
    fn from(e: &str) -> Self { TransientIOError(e.to_string()) }
}
impl From<std::io::Error> for TransientIOError {
    fn from(e: std::io::Error) -> Self { TransientIOError(e.to_string()) }
}

/// Error occurring while loading or validating configuration.
#[derive(Debug)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "ConfigError: {}", self.0)
    }
}
impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self { ConfigError(e.to_string()) }
}
impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self { ConfigError(e.to_string()) }
}
impl From<ParameterError> for ConfigError {
    fn from(e: ParameterError) -> Self { ConfigError(e.0) }
}
impl From<&str> for ConfigError {
    fn from(e: &str) -> Self { ConfigError(e.to_string()) }
}
impl From<log4rs::config::runtime::ConfigErrors> for ConfigError {
    fn from(e: log4rs::config::runtime::ConfigErrors) -> Self { ConfigError(e.to_string()) }
}
impl From<log::SetLoggerError> for ConfigError {
    fn from(e: log::SetLoggerError) -> Self { ConfigError(e.to_string()) }
}

/// Top-level error for a single run of the pipeline, carrying which stage
/// raised it. This is what the job queue records against a `failed` job
/// and what drives the truncated user-visible reason.
pub struct RunError {
    stage: &'static str,
    msg: String,
}

impl RunError {
    pub fn new(stage: &'static str, msg: impl Into<String>) -> RunError {
        RunError { stage, msg: msg.into() }
    }

    /// Short, queue-visible reason, truncated to 8 KiB per the failure contract.
    pub fn short_reason(&self) -> String {
        let full = format!("{}: {}", self.stage, self.msg);
        if full.len() > 8192 {
            let cut = full
                .char_indices()
                .map(|(i, _)| i)
                .take_while(|&i| i <= 8192)
                .last()
                .unwrap_or(0);
            full[..cut].to_string()
        } else {
            full
        }
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let report_time = format!("{}", Local::now().format("%Y-%m-%d %H:%M:%S"));
        let caption = format!("{} RunError [{}] ", report_time, self.stage);
        write!(f, "{:=<80}\n", caption)?;
        write!(f, "{}\n", self.msg)
    }
}
impl fmt::Debug for RunError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}
impl std::error::Error for RunError {}

impl From<ParameterError> for RunError {
    fn from(e: ParameterError) -> Self { RunError::new("consolidator", e.0) }
}
impl From<DataShapeError> for RunError {
    fn from(e: DataShapeError) -> Self { RunError::new("ingest", e.0) }
}
impl From<NumericError> for RunError {
    fn from(e: NumericError) -> Self { RunError::new("validator", e.0) }
}
impl From<TransientIOError> for RunError {
    fn from(e: TransientIOError) -> Self { RunError::new("io", e.0) }
}
impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self { RunError::new("config", e.0) }
}
impl From<std::io::Error> for RunError {
    fn from(e: std::io::Error) -> Self { RunError::new("io", e.to_string()) }
}
impl From<serde_json::Error> for RunError {
    fn from(e: serde_json::Error) -> Self { RunError::new("persistence", e.to_string()) }
}
