//! Global processing order over every candidate file.
//!
//! # Simple mode
//!
//! Manually ordered files (`order > 0`) first, ascending by `order`, then the
//! rest oldest first. Library policies are not consulted.
//!
//! # Advanced mode
//!
//! ```text
//! manual (order > 0, ascending)
//!   ++ for priority in Highest..=Lowest:
//!        round_robin(library groups at that priority, each intra-sorted)
//! ```
//!
//! The manual partition lets an operator force a file to the front; round
//! robin keeps one large library from starving its peers on the same tier;
//! each library still decides its own internal ordering.

use std::collections::{BTreeMap, HashMap};

use rand::{Rng, seq::SliceRandom};
use uuid::Uuid;

use crate::domain::{
  library::{LibraryPolicy, Priority, ProcessingOrder},
  work_item::WorkItem,
};

/// Library UID → policy.
pub type PolicyMap = HashMap<Uuid, LibraryPolicy>;

/// Sort with a fresh process-local RNG (only `ProcessingOrder::Random` uses it).
pub fn sort(files: Vec<WorkItem>, policies: &PolicyMap, advanced: bool) -> Vec<WorkItem> {
  sort_with_rng(files, policies, advanced, &mut rand::rng())
}

/// Sort with an explicit RNG, so `Random` libraries are reproducible.
pub fn sort_with_rng<R: Rng + ?Sized>(
  files: Vec<WorkItem>,
  policies: &PolicyMap,
  advanced: bool,
  rng: &mut R,
) -> Vec<WorkItem> {
  let (mut manual, rest): (Vec<_>, Vec<_>) = files.into_iter().partition(|f| f.order > 0);
  manual.sort_by_key(|f| f.order);

  let ordered = if advanced {
    sort_advanced(rest, policies, rng)
  } else {
    let mut rest = rest;
    rest.sort_by_key(|f| f.created);
    rest
  };

  manual.extend(ordered);
  manual
}

/// Files of one library (or of no library), in input order.
struct LibraryGroup {
  policy: LibraryPolicy,
  files: Vec<WorkItem>,
}

fn sort_advanced<R: Rng + ?Sized>(files: Vec<WorkItem>, policies: &PolicyMap, rng: &mut R) -> Vec<WorkItem> {
  // group by library, keeping first-seen order of groups
  let mut groups: Vec<LibraryGroup> = Vec::new();
  let mut index: HashMap<Option<Uuid>, usize> = HashMap::new();

  for file in files {
    let key = file.library_uid();
    let slot = *index.entry(key).or_insert_with(|| {
      let policy = key.and_then(|uid| policies.get(&uid).copied()).unwrap_or_default();
      groups.push(LibraryGroup {
        policy,
        files: Vec::new(),
      });
      groups.len() - 1
    });
    groups[slot].files.push(file);
  }

  let mut buckets: BTreeMap<Priority, Vec<Vec<WorkItem>>> = BTreeMap::new();
  for mut group in groups {
    order_within_library(&mut group.files, group.policy.processing_order, rng);
    buckets.entry(group.policy.priority).or_default().push(group.files);
  }

  let mut out = Vec::new();
  for (_, bucket) in buckets.into_iter().rev() {
    round_robin(bucket, &mut out);
  }
  out
}

/// Apply a library's own ordering. All sorts are stable.
fn order_within_library<R: Rng + ?Sized>(files: &mut [WorkItem], order: ProcessingOrder, rng: &mut R) {
  match order {
    ProcessingOrder::AsFound => {}
    ProcessingOrder::Alphabetical => files.sort_by_cached_key(|f| f.name.to_lowercase()),
    ProcessingOrder::SmallestFirst => files.sort_by_key(|f| f.original_size),
    ProcessingOrder::LargestFirst => files.sort_by_key(|f| std::cmp::Reverse(f.original_size)),
    ProcessingOrder::NewestFirst => files.sort_by_key(|f| std::cmp::Reverse(f.created)),
    ProcessingOrder::OldestFirst => files.sort_by_key(|f| f.created),
    ProcessingOrder::Random => files.shuffle(rng),
  }
}

/// Take one file from each group in turn until all are drained.
fn round_robin(groups: Vec<Vec<WorkItem>>, out: &mut Vec<WorkItem>) {
  let mut iters: Vec<_> = groups.into_iter().map(Vec::into_iter).collect();
  loop {
    let before = out.len();
    out.extend(iters.iter_mut().filter_map(Iterator::next));
    if out.len() == before {
      break;
    }
  }
}
