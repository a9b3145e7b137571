use log::warn;

use crate::config::LookupError;

/// How many times an external lookup is attempted before the round aborts.
pub const LOOKUP_ATTEMPTS: u32 = 3;

/// Runs `op` up to `attempts` times and returns the first success or the
/// last error. Definite misses (`LookupError::Missing`) are not retried;
/// they cannot heal on a re-read.
pub(crate) fn with_retry<T>(
    what: &str,
    attempts: u32,
    mut op: impl FnMut() -> Result<T, LookupError>,
) -> Result<T, LookupError> {
    for attempt in 1..attempts {
        match op() {
            Ok(v) => return Ok(v),
            Err(err @ LookupError::Missing { .. }) => return Err(err),
            Err(err) => {
                warn!("{}: attempt {}/{} failed: {}", what, attempt, attempts, err);
            }
        }
    }
    op()
}
