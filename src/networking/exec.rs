//! External-program invocation for `tc`, `iptables`, and friends.
//!
//! This adapter is the only place that runs foreign binaries; callers
//! hand it pre-built argv vectors and pick between the surfacing and the
//! best-effort variant.

use std::path::Path;
use std::process::Command;

use log::debug;

use crate::common::{Error, Result};

/// Runs the command and surfaces a failure with the captured stderr.
pub fn run(bin: &Path, args: &[String]) -> Result<()> {
    let output = Command::new(bin).args(args).output()?;
    if output.status.success() {
        return Ok(());
    }
    let stderr = String::from_utf8_lossy(&output.stderr);
    Err(Error::kernel_op(format!(
        "{} {} ({}): {}",
        bin.display(),
        args.join(" "),
        output.status,
        stderr.trim()
    )))
}

/// Best-effort variant for idempotent deletes and teardown: failures are
/// logged at debug level and swallowed.
pub fn run_quiet(bin: &Path, args: &[String]) {
    match Command::new(bin).args(args).output() {
        Ok(output) if !output.status.success() => {
            debug!(
                "{} {} exited with {}",
                bin.display(),
                args.join(" "),
                output.status
            );
        }
        Ok(_) => {}
        Err(e) => debug!("{} failed to spawn: {}", bin.display(), e),
    }
}

/// Splits a command template into owned argv tokens.
///
/// Only used by the builders in `limit.rs`, which never embed whitespace
/// inside a single argument.
pub fn argv(template: &str) -> Vec<String> {
    template.split_whitespace().map(str::to_string).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_splits_on_whitespace() {
        assert_eq!(
            argv("class add dev wlan0 parent 1:1"),
            vec!["class", "add", "dev", "wlan0", "parent", "1:1"]
        );
    }

    #[test]
    fn run_surfaces_missing_binary_as_io_error() {
        let err = run(Path::new("/nonexistent/chokehold-test-bin"), &[]).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }
}
