use thiserror::Error;

/// Result type alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Error taxonomy.
///
/// `Environment` failures are only raised during startup and are fatal.
/// `Input` failures reject a single shell command. `KernelOp` failures
/// surface on apply paths and are logged-and-swallowed on best-effort
/// teardown paths.
#[derive(Error, Debug)]
pub enum Error {
    /// Wrong OS, missing privileges, missing binaries, no usable
    /// interface or gateway.
    #[error("environment: {0}")]
    Environment(String),

    /// Malformed IP, malformed rate, unknown host id.
    #[error("invalid input: {0}")]
    Input(String),

    /// A `tc`/`iptables`/raw-socket operation failed.
    #[error("kernel operation failed: {0}")]
    KernelOp(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn environment<S: Into<String>>(msg: S) -> Self {
        Error::Environment(msg.into())
    }

    pub fn input<S: Into<String>>(msg: S) -> Self {
        Error::Input(msg.into())
    }

    pub fn kernel_op<S: Into<String>>(msg: S) -> Self {
        Error::KernelOp(msg.into())
    }
}
