//! Process liveness probing via the null signal.

use crate::Result;

/// Report whether `pid` refers to a running process.
///
/// Delivery of the null signal decides: success or `EPERM` mean the process
/// exists, `ESRCH` means it is gone. Any other errno is returned as an error.
/// A pid of zero, or one outside the platform range, never names a live
/// instance.
///
/// # Errors
///
/// Returns `AppError::Io` for unexpected signal-delivery failures.
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> Result<bool> {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return Ok(false);
    };
    if raw <= 0 {
        return Ok(false);
    }

    classify_signal_outcome(pid, kill(Pid::from_raw(raw), None))
}

/// Map the outcome of a null-signal delivery to `pid` onto liveness.
///
/// # Errors
///
/// Returns `AppError::Io` for any errno other than `EPERM` or `ESRCH`.
#[cfg(unix)]
pub fn classify_signal_outcome(pid: u32, outcome: nix::Result<()>) -> Result<bool> {
    use nix::errno::Errno;

    match outcome {
        Ok(()) | Err(Errno::EPERM) => Ok(true),
        Err(Errno::ESRCH) => Ok(false),
        Err(errno) => Err(crate::AppError::Io(format!(
            "failed to probe process {pid}: {errno}"
        ))),
    }
}

/// Non-unix platforms cannot probe; every process is presumed alive.
///
/// # Errors
///
/// Never fails.
#[cfg(not(unix))]
pub fn is_process_alive(_pid: u32) -> Result<bool> {
    Ok(true)
}
