//! Work selection: which files are candidates and in what order they run.
//!
//! - [`eligibility`]: detection windows a file must satisfy to be queued
//! - [`sorter`]: global ordering of queued files
//!
//! Both are pure; [`select_next`] combines them for a single node.

pub mod eligibility;
pub mod sorter;

use std::collections::HashSet;

use uuid::Uuid;

pub use eligibility::{FileFacts, matches, matches_detection, matches_detection_at};
pub use sorter::{PolicyMap, sort, sort_with_rng};

use crate::domain::{library::Library, work_item::WorkItem};

/// Build the policy lookup the sorter needs from configured libraries.
pub fn policies_from(libraries: &[Library]) -> PolicyMap {
  libraries.iter().map(|l| (l.uid, l.policy())).collect()
}

/// Pick the next file a node should process.
///
/// `node_libraries` restricts the candidates to those libraries; empty means
/// the node processes everything, including files without a library.
/// Files in `in_flight` already have a runner somewhere and are skipped.
pub fn select_next(
  files: &[WorkItem],
  policies: &PolicyMap,
  node_libraries: &[Uuid],
  in_flight: &HashSet<Uuid>,
  advanced: bool,
) -> Option<WorkItem> {
  let candidates: Vec<WorkItem> = files
    .iter()
    .filter(|f| f.is_queued() && !in_flight.contains(&f.uid))
    .filter(|f| {
      node_libraries.is_empty() || f.library_uid().is_some_and(|uid| node_libraries.contains(&uid))
    })
    .cloned()
    .collect();

  sort(candidates, policies, advanced).into_iter().next()
}
