//! Process open-file limit.

/// Handles needed beyond the archive streams themselves.
pub const OPEN_FILE_SLACK: u64 = 20;

/// Raise the soft open-file limit to at least `wanted`.
///
/// Returns the soft limit in effect afterwards. Never lowers the limit.
#[cfg(unix)]
pub fn raise_open_file_limit(wanted: u64) -> std::io::Result<u64> {
    let mut rlim = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // SAFETY: `rlim` is a valid, writable rlimit for the duration of the call.
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &raw mut rlim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let current = rlim.rlim_cur as u64;
    if current >= wanted {
        return Ok(current);
    }

    tracing::debug!("Setting open file limit to {wanted}");
    rlim.rlim_cur = wanted as libc::rlim_t;
    // SAFETY: `rlim` is a valid rlimit read back from getrlimit.
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &raw const rlim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(wanted)
}

/// Open-file limits are not adjusted on this platform.
#[cfg(not(unix))]
pub fn raise_open_file_limit(wanted: u64) -> std::io::Result<u64> {
    Ok(wanted)
}
