//! Descriptor matching against known customers
//!
//! The default policy is a linear scan that accepts the first record under
//! the distance threshold, even when a later record is closer. Results are
//! therefore sensitive to record order, which is stable because the store
//! preserves insertion order.

use serde::Deserialize;

use crate::customer::IdentityRecord;

/// Default euclidean distance under which two faces are the same person
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// How a descriptor is matched against the record set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// First record under the threshold, in store order
    #[default]
    FirstMatch,
    /// Closest record under the threshold
    Nearest,
}

impl MatchPolicy {
    /// Parse from a config string, falling back to the default
    #[must_use]
    pub fn from_name(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "nearest" => Self::Nearest,
            _ => Self::FirstMatch,
        }
    }
}

/// Outcome of matching one descriptor
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub record: Option<&'a IdentityRecord>,
    pub is_new: bool,
}

impl<'a> MatchResult<'a> {
    const fn found(record: &'a IdentityRecord) -> Self {
        Self {
            record: Some(record),
            is_new: false,
        }
    }

    const fn new_face() -> Self {
        Self {
            record: None,
            is_new: true,
        }
    }
}

/// Euclidean distance between two descriptors
///
/// Descriptors of different length are infinitely far apart.
#[must_use]
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return f32::INFINITY;
    }

    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

/// Match with the first-match policy
#[must_use]
pub fn match_descriptor<'a>(
    descriptor: &[f32],
    records: &'a [IdentityRecord],
    threshold: f32,
) -> MatchResult<'a> {
    match_with_policy(descriptor, records, threshold, MatchPolicy::FirstMatch)
}

/// Match with an explicit policy
#[must_use]
pub fn match_with_policy<'a>(
    descriptor: &[f32],
    records: &'a [IdentityRecord],
    threshold: f32,
    policy: MatchPolicy,
) -> MatchResult<'a> {
    let within = records
        .iter()
        .map(|record| (record, euclidean_distance(descriptor, record.descriptor())))
        .filter(|(_, distance)| *distance < threshold);

    let hit = match policy {
        MatchPolicy::FirstMatch => within.map(|(record, _)| record).next(),
        MatchPolicy::Nearest => within
            .min_by(|(_, a), (_, b)| a.total_cmp(b))
            .map(|(record, _)| record),
    };

    hit.map_or_else(MatchResult::new_face, MatchResult::found)
}

/// Index of the matched record, for callers that need to mutate it
#[must_use]
pub fn match_index(
    descriptor: &[f32],
    records: &[IdentityRecord],
    threshold: f32,
    policy: MatchPolicy,
) -> Option<usize> {
    let result = match_with_policy(descriptor, records, threshold, policy);
    let matched = result.record?;
    records.iter().position(|r| std::ptr::eq(r, matched))
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn record(descriptor: Vec<f32>) -> IdentityRecord {
        IdentityRecord::new(descriptor, Utc::now())
    }

    #[test]
    fn test_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-6);
        assert!(euclidean_distance(&[1.0], &[1.0, 2.0]).is_infinite());
    }

    #[test]
    fn test_empty_set_is_new() {
        let result = match_descriptor(&[0.1, 0.2], &[], DEFAULT_MATCH_THRESHOLD);
        assert!(result.is_new);
        assert!(result.record.is_none());
    }

    #[test]
    fn test_first_match_beats_closer_later_record() {
        let records = vec![record(vec![0.5, 0.0]), record(vec![0.01, 0.0])];

        let result = match_descriptor(&[0.0, 0.0], &records, DEFAULT_MATCH_THRESHOLD);
        assert!(!result.is_new);
        assert_eq!(result.record.unwrap().id(), records[0].id());

        let nearest = match_with_policy(
            &[0.0, 0.0],
            &records,
            DEFAULT_MATCH_THRESHOLD,
            MatchPolicy::Nearest,
        );
        assert_eq!(nearest.record.unwrap().id(), records[1].id());
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let records = vec![record(vec![0.6, 0.0])];
        let result = match_descriptor(&[0.0, 0.0], &records, 0.6);
        assert!(result.is_new);
    }

    #[test]
    fn test_skips_records_outside_threshold() {
        let records = vec![record(vec![5.0, 5.0]), record(vec![0.2, 0.0])];
        assert_eq!(
            match_index(&[0.0, 0.0], &records, 0.6, MatchPolicy::FirstMatch),
            Some(1)
        );
    }

    #[test]
    fn test_policy_parse() {
        assert_eq!(MatchPolicy::from_name("Nearest"), MatchPolicy::Nearest);
        assert_eq!(MatchPolicy::from_name("first"), MatchPolicy::FirstMatch);
    }
}
