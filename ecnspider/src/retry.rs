// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Decides which probed targets are worth another run.

/// Connect errors that mark a probe half as permanently failed. A missing
/// error (the connect succeeded) counts the same way.
pub const NO_RETRY: &[&str] = &["Invalid argument", "Permission denied"];

/// A probe pair should be retried unless both halves either succeeded or
/// failed permanently: those outcomes will not change on a second run, while
/// anything else might have been intermittent.
pub fn is_retryable(eoff_err: Option<&str>, eon_err: Option<&str>) -> bool {
    !(no_retry(eoff_err) && no_retry(eon_err))
}

fn no_retry(err: Option<&str>) -> bool {
    match err {
        None => true,
        Some(err) => NO_RETRY.contains(&err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{NO_ATTEMPT, TIMEOUT_ERR};

    #[test]
    fn both_succeeded_is_not_retryable() {
        assert!(!is_retryable(None, None));
    }

    #[test]
    fn both_permanent_is_not_retryable() {
        assert!(!is_retryable(Some("Permission denied"), Some("Permission denied")));
        assert!(!is_retryable(Some("Invalid argument"), Some("Permission denied")));
        assert!(!is_retryable(Some("Invalid argument"), None));
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(is_retryable(Some(TIMEOUT_ERR), Some(TIMEOUT_ERR)));
        assert!(is_retryable(Some("Connection refused"), None));
        assert!(is_retryable(None, Some("No route to host")));
        assert!(is_retryable(Some("Network is unreachable"), Some("Invalid argument")));
    }

    #[test]
    fn skipped_half_is_retryable() {
        // fast-fail leaves `no_attempt` on the second half, which says
        // nothing permanent about the target
        assert!(is_retryable(Some(TIMEOUT_ERR), Some(NO_ATTEMPT)));
    }
}
