use std::error::Error as StdError;

use crate::error::GatewayError;

/// Maps a failed upstream call into the gateway taxonomy. Timeouts surface
/// wrapped inside generic transport errors, so the whole cause chain is
/// inspected rather than just the outermost type.
pub fn classify_upstream_error(err: reqwest::Error) -> GatewayError {
    if is_timeout_error(&err) {
        GatewayError::UpstreamTimeout(err)
    } else {
        GatewayError::UpstreamFailed(err)
    }
}

pub fn is_timeout_error(err: &(dyn StdError + 'static)) -> bool {
    let mut current: Option<&(dyn StdError + 'static)> = Some(err);
    while let Some(cause) = current {
        if let Some(request_error) = cause.downcast_ref::<reqwest::Error>() {
            if request_error.is_timeout() {
                return true;
            }
        }
        if let Some(io_error) = cause.downcast_ref::<std::io::Error>() {
            if io_error.kind() == std::io::ErrorKind::TimedOut {
                return true;
            }
        }
        let message = cause.to_string().to_lowercase();
        if message.contains("timeout") || message.contains("timed out") {
            return true;
        }
        current = cause.source();
    }
    false
}
