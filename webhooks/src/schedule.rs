//! Fixed retry schedule and response classification

use std::time::Duration;

/// Delay before each attempt: immediate, 1m, 5m, 30m, 2h, 6h, 24h
pub const RETRY_SCHEDULE: [Duration; 7] = [
    Duration::from_secs(0),
    Duration::from_secs(60),
    Duration::from_secs(5 * 60),
    Duration::from_secs(30 * 60),
    Duration::from_secs(2 * 3600),
    Duration::from_secs(6 * 3600),
    Duration::from_secs(24 * 3600),
];

/// Total attempts per delivery
pub const MAX_ATTEMPTS: u32 = RETRY_SCHEDULE.len() as u32;

/// Delay before the attempt with zero-based index `attempt`; `None` once the schedule is exhausted
pub fn delay_before_attempt(attempt: u32) -> Option<Duration> {
    RETRY_SCHEDULE.get(attempt as usize).copied()
}

/// How a response status is treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// 2xx
    Success,
    /// 400, 401, 403: the receiver will never accept this delivery
    Permanent,
    /// Anything else
    Retryable,
}

/// Classify an HTTP status code
pub fn classify(status: u16) -> StatusClass {
    match status {
        200..=299 => StatusClass::Success,
        400 | 401 | 403 => StatusClass::Permanent,
        _ => StatusClass::Retryable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule() {
        assert_eq!(MAX_ATTEMPTS, 7);
        assert_eq!(delay_before_attempt(0), Some(Duration::ZERO));
        assert_eq!(delay_before_attempt(1), Some(Duration::from_secs(60)));
        assert_eq!(delay_before_attempt(6), Some(Duration::from_secs(86_400)));
        assert_eq!(delay_before_attempt(7), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(200), StatusClass::Success);
        assert_eq!(classify(204), StatusClass::Success);
        assert_eq!(classify(400), StatusClass::Permanent);
        assert_eq!(classify(401), StatusClass::Permanent);
        assert_eq!(classify(403), StatusClass::Permanent);
        assert_eq!(classify(404), StatusClass::Retryable);
        assert_eq!(classify(429), StatusClass::Retryable);
        assert_eq!(classify(500), StatusClass::Retryable);
        assert_eq!(classify(302), StatusClass::Retryable);
    }
}
