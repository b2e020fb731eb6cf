//! Expiry alert day marks.
//!
//! The daily scan alerts at fixed distances from the expiry date rather than
//! continuously, so a batch produces a bounded number of expiry alerts over
//! its life.

use crate::notification::Severity;

/// Near-expiry day marks (days before expiry) and their severities.
pub const NEAR_EXPIRY_MARKS: [(i64, Severity); 5] = [
    (10, Severity::Low),
    (5, Severity::Low),
    (3, Severity::Medium),
    (2, Severity::Medium),
    (1, Severity::High),
];

/// Expired day marks (days after expiry) and their severities, high at day 0
/// degrading to low by day 10.
pub const EXPIRED_MARKS: [(i64, Severity); 6] = [
    (0, Severity::High),
    (1, Severity::High),
    (2, Severity::Medium),
    (3, Severity::Medium),
    (5, Severity::Low),
    (10, Severity::Low),
];

/// Severity for a batch `days_until` days before expiry, if today is a mark.
pub fn near_expiry_severity(days_until: i64) -> Option<Severity> {
    NEAR_EXPIRY_MARKS
        .iter()
        .find(|(d, _)| *d == days_until)
        .map(|(_, s)| *s)
}

/// Severity for a batch `days_past` days after expiry, if today is a mark.
pub fn expired_severity(days_past: i64) -> Option<Severity> {
    EXPIRED_MARKS
        .iter()
        .find(|(d, _)| *d == days_past)
        .map(|(_, s)| *s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn near_expiry_marks_cover_the_alert_days() {
        assert_eq!(near_expiry_severity(10), Some(Severity::Low));
        assert_eq!(near_expiry_severity(5), Some(Severity::Low));
        assert_eq!(near_expiry_severity(3), Some(Severity::Medium));
        assert_eq!(near_expiry_severity(2), Some(Severity::Medium));
        assert_eq!(near_expiry_severity(1), Some(Severity::High));
        assert_eq!(near_expiry_severity(4), None);
        assert_eq!(near_expiry_severity(0), None);
    }

    #[test]
    fn expired_severity_degrades_from_high_to_low() {
        assert_eq!(expired_severity(0), Some(Severity::High));
        assert_eq!(expired_severity(10), Some(Severity::Low));
        assert_eq!(expired_severity(4), None);
        assert_eq!(expired_severity(-1), None);
    }
}
