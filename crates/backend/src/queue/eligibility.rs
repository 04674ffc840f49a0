//! Library eligibility: does a discovered file fall inside the library's
//! detection windows?
//!
//! Everything here is pure. A library scan calls [`matches_detection`] for
//! every file it finds; nothing is cached between scans, so a file that is
//! too young today simply passes on a later scan.

use std::path::Path;

use chrono::{DateTime, Utc};

use crate::domain::library::{DetectionRule, Library, MatchRange};

/// Filesystem facts the detection rules look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileFacts {
  pub created: DateTime<Utc>,
  pub last_written: DateTime<Utc>,
  pub size: u64,
}

impl FileFacts {
  /// Build from metadata. Filesystems without birth time report the
  /// modification time as creation time.
  pub fn from_metadata(metadata: &std::fs::Metadata) -> std::io::Result<Self> {
    let last_written: DateTime<Utc> = metadata.modified()?.into();
    let created = metadata.created().map(DateTime::<Utc>::from).unwrap_or(last_written);
    Ok(Self {
      created,
      last_written,
      size: metadata.len(),
    })
  }

  pub async fn read(path: &Path) -> std::io::Result<Self> {
    let metadata = tokio::fs::metadata(path).await?;
    Self::from_metadata(&metadata)
  }
}

/// Evaluate a single rule against an observed value.
///
/// `GreaterThan`/`LessThan` are strict and compare against `lower` only.
/// `Between` is inclusive on both ends and `NotBetween` is its exact complement.
pub fn matches(rule: &DetectionRule, value: i64) -> bool {
  match rule.range {
    MatchRange::Any => true,
    MatchRange::GreaterThan => value > rule.lower,
    MatchRange::LessThan => value < rule.lower,
    MatchRange::Between => is_between(rule, value),
    MatchRange::NotBetween => !is_between(rule, value),
  }
}

fn is_between(rule: &DetectionRule, value: i64) -> bool {
  value >= rule.lower && value <= rule.upper
}

/// Seconds elapsed between `timestamp` and `now`. Negative for future stamps.
fn age_secs(now: DateTime<Utc>, timestamp: DateTime<Utc>) -> i64 {
  (now - timestamp).num_seconds()
}

fn rule_passes(rule: Option<&DetectionRule>, value: impl FnOnce() -> i64) -> bool {
  match rule {
    Some(rule) if rule.is_configured() => matches(rule, value()),
    _ => true,
  }
}

/// Whether a file is a processing candidate for `library`.
///
/// `known_size` overrides `facts.size` (directories pass their summed size).
pub fn matches_detection(library: &Library, facts: &FileFacts, known_size: Option<u64>) -> bool {
  matches_detection_at(library, facts, known_size, Utc::now())
}

/// [`matches_detection`] with an explicit clock.
pub fn matches_detection_at(library: &Library, facts: &FileFacts, known_size: Option<u64>, now: DateTime<Utc>) -> bool {
  let size = known_size.unwrap_or(facts.size);

  rule_passes(library.detect_file_creation.as_ref(), || age_secs(now, facts.created))
    && rule_passes(library.detect_file_last_written.as_ref(), || {
      age_secs(now, facts.last_written)
    })
    && rule_passes(library.detect_file_size.as_ref(), || {
      i64::try_from(size).unwrap_or(i64::MAX)
    })
}
