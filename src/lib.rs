#![ doc = include_str!( concat!( env!( "CARGO_MANIFEST_DIR" ), "/", "README.md" ) ) ]
use core::{fmt, num};
use std::env;
use std::io::Write;

use colored::Colorize as _;

pub use log::LevelFilter;

/// Run configuration
pub mod config;
/// Worker/training event logs
pub mod logger;
/// Line-framed TCP acceptor for worker connections
pub mod net;
/// Worker set and job dispatch
pub mod pool;
/// Self-play records: parsing, filters, per-iteration storage
pub mod record;
/// Iteration controller
pub mod server;
/// State shared between the controller and worker sessions
pub mod state;
/// Per-connection worker session
pub mod worker;

/// The crate result type
pub type Result<T> = std::result::Result<T, Error>;

/// The crate error type
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Standard I/O errors
    #[error("I/O error: {0}")]
    IO(#[from] std::io::Error),
    /// Non-standard I/O errors
    #[error("Communication error: {0}")]
    Comm(String),
    /// Run configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
    /// Invalid data received / parameters provided
    #[error("Invalid data: {0}")]
    InvalidData(String),
    /// All other errors
    #[error("operation failed: {0}")]
    Failed(String),
}

macro_rules! impl_error {
    ($t: ty, $key: ident) => {
        impl From<$t> for Error {
            fn from(err: $t) -> Self {
                Error::$key(err.to_string())
            }
        }
    };
}

impl_error!(num::ParseIntError, InvalidData);
impl_error!(toml::de::Error, Config);

impl Error {
    /// Creates new invalid data error
    pub fn invalid_data<S: fmt::Display>(msg: S) -> Self {
        Error::InvalidData(msg.to_string())
    }
    /// Creates new I/O error (for non-standard I/O)
    pub fn io<S: fmt::Display>(msg: S) -> Self {
        Error::Comm(msg.to_string())
    }
    /// Creates new configuration error
    pub fn config<S: fmt::Display>(msg: S) -> Self {
        Error::Config(msg.to_string())
    }
    /// Creates new function failed error
    pub fn failed<S: fmt::Display>(msg: S) -> Self {
        Error::Failed(msg.to_string())
    }
}

/// Immediately terminates the process with a message to stderr.
///
/// Used when an event-log or record-file write fails on a session thread,
/// where there is no caller left to propagate the error to.
pub fn critical(msg: &str) -> ! {
    eprintln!("{}", msg.red().bold());
    std::process::exit(1);
}

/// Returns true if started in production mode (as a systemd unit)
pub fn is_production() -> bool {
    env::var("INVOCATION_ID").map_or(false, |v| !v.is_empty())
}

/// Configures stdout logger with the given filter. If started in production mode, does not log
/// timestamps
pub fn configure_logger(filter: LevelFilter) {
    let mut builder = env_logger::Builder::new();
    builder.target(env_logger::Target::Stdout);
    builder.filter_level(filter);
    if is_production() {
        builder.format(|buf, record| writeln!(buf, "{} {}", record.level(), record.args()));
    }
    builder.init();
}

/// Prelude module
pub mod prelude {
    pub use crate::config::ServerConfig;
    pub use crate::server::TrainServer;
    pub use crate::worker::Role;
    pub use std::time::Duration;
}
