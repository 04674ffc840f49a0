//! Library configuration: dispatch policy and file detection rules.
//!
//! A library is a watched location whose discovered files become work items.
//! Two independent pieces of configuration live here:
//!
//! - [`LibraryPolicy`]: how the library competes with other libraries for
//!   processing slots (`Priority`) and how its own files are ordered
//!   (`ProcessingOrder`). Consumed by the queue sorter.
//! - [`DetectionRule`]: age/size windows a file must fall into before it is
//!   considered a candidate at all. Consumed by the eligibility matcher.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// References
// ============================================================================

/// Lightweight pointer to another object (library, node, flow).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectReference {
  pub uid: Uuid,
  #[serde(default)]
  pub name: String,
}

impl ObjectReference {
  pub fn new(uid: Uuid, name: impl Into<String>) -> Self {
    Self { uid, name: name.into() }
  }
}

// ============================================================================
// Dispatch policy
// ============================================================================

/// Relative weight of a library when several libraries have eligible work.
///
/// Declaration order is significant: `Ord` ranks `Highest` above `Lowest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub enum Priority {
  Lowest,
  Low,
  #[default]
  Normal,
  High,
  Highest,
}

impl Priority {
  /// Numeric weight as stored by the server.
  pub fn value(self) -> i32 {
    match self {
      Priority::Lowest => 0,
      Priority::Low => 5,
      Priority::Normal => 10,
      Priority::High => 15,
      Priority::Highest => 20,
    }
  }
}

/// Ordering applied to the files of a single library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ProcessingOrder {
  /// Keep discovery order.
  #[default]
  AsFound,
  Alphabetical,
  SmallestFirst,
  LargestFirst,
  NewestFirst,
  OldestFirst,
  Random,
}

/// The pair the queue sorter looks up per library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LibraryPolicy {
  pub priority: Priority,
  pub processing_order: ProcessingOrder,
}

impl LibraryPolicy {
  pub fn new(priority: Priority, processing_order: ProcessingOrder) -> Self {
    Self {
      priority,
      processing_order,
    }
  }
}

impl Default for LibraryPolicy {
  /// Policy for files that belong to no library.
  fn default() -> Self {
    Self::new(Priority::Normal, ProcessingOrder::OldestFirst)
  }
}

// ============================================================================
// Detection rules
// ============================================================================

/// Comparison operator for a detection window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum MatchRange {
  #[default]
  Any,
  GreaterThan,
  LessThan,
  Between,
  NotBetween,
}

/// A single `(range, lower, upper)` window.
///
/// Bounds are seconds for the time based rules and bytes for the size rule.
/// `upper` is ignored by `GreaterThan` and `LessThan`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct DetectionRule {
  pub range: MatchRange,
  #[serde(default)]
  pub lower: i64,
  #[serde(default)]
  pub upper: i64,
}

impl DetectionRule {
  pub fn new(range: MatchRange, lower: i64, upper: i64) -> Self {
    Self { range, lower, upper }
  }

  pub fn any() -> Self {
    Self::default()
  }

  pub fn greater_than(lower: i64) -> Self {
    Self::new(MatchRange::GreaterThan, lower, 0)
  }

  pub fn less_than(lower: i64) -> Self {
    Self::new(MatchRange::LessThan, lower, 0)
  }

  pub fn between(lower: i64, upper: i64) -> Self {
    Self::new(MatchRange::Between, lower, upper)
  }

  pub fn not_between(lower: i64, upper: i64) -> Self {
    Self::new(MatchRange::NotBetween, lower, upper)
  }

  /// True when the rule constrains anything.
  pub fn is_configured(&self) -> bool {
    self.range != MatchRange::Any
  }
}

// ============================================================================
// Library
// ============================================================================

/// A configured library as seen by the dispatch core.
#[serde_with::skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Library {
  pub uid: Uuid,
  pub name: String,
  #[serde(default)]
  pub path: String,
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default)]
  pub priority: Priority,
  #[serde(default)]
  pub processing_order: ProcessingOrder,
  /// Window on seconds since the file was created.
  pub detect_file_creation: Option<DetectionRule>,
  /// Window on seconds since the file was last written.
  pub detect_file_last_written: Option<DetectionRule>,
  /// Window on file size in bytes.
  pub detect_file_size: Option<DetectionRule>,
}

fn default_true() -> bool {
  true
}

impl Library {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      uid: Uuid::new_v4(),
      name: name.into(),
      path: String::new(),
      enabled: true,
      priority: Priority::default(),
      processing_order: ProcessingOrder::default(),
      detect_file_creation: None,
      detect_file_last_written: None,
      detect_file_size: None,
    }
  }

  pub fn policy(&self) -> LibraryPolicy {
    LibraryPolicy::new(self.priority, self.processing_order)
  }

  pub fn reference(&self) -> ObjectReference {
    ObjectReference::new(self.uid, self.name.clone())
  }
}
