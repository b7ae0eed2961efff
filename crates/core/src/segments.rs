//! Segment enumeration, wave planning, and input rotation.
//!
//! A run renders a fixed list of segments in consecutive waves. Each wave
//! carries the accumulated artifact target that must be observed on disk
//! before the next wave may be dispatched.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::CoreError;
use crate::types::SegmentId;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Number of segments a song is split into.
pub const DEFAULT_SEGMENT_COUNT: u32 = 8;

/// Maximum number of render jobs in flight at once (one wave).
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 4;

// ---------------------------------------------------------------------------
// Selection policy
// ---------------------------------------------------------------------------

/// Which segments a run renders.
///
/// `Canonical` always renders `1..=count` regardless of what the caller
/// asked for. `Requested` renders exactly the caller's list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentSelection {
    Canonical { count: u32 },
    Requested,
}

impl Default for SegmentSelection {
    fn default() -> Self {
        SegmentSelection::Canonical {
            count: DEFAULT_SEGMENT_COUNT,
        }
    }
}

impl SegmentSelection {
    /// Resolve the segment list a run should render.
    pub fn resolve(&self, requested: &[SegmentId]) -> Result<Vec<SegmentId>, CoreError> {
        match self {
            SegmentSelection::Canonical { count } => Ok(canonical_segments(*count)),
            SegmentSelection::Requested => {
                validate_segments(requested)?;
                Ok(requested.to_vec())
            }
        }
    }

    /// Segment count fixed by the policy, if any.
    pub fn canonical_count(&self) -> Option<u32> {
        match self {
            SegmentSelection::Canonical { count } => Some(*count),
            SegmentSelection::Requested => None,
        }
    }

    /// Whether resolving `requested` under this policy discards the caller's list.
    pub fn overrides(&self, requested: &[SegmentId]) -> bool {
        match self {
            SegmentSelection::Canonical { count } => requested != canonical_segments(*count),
            SegmentSelection::Requested => false,
        }
    }
}

impl fmt::Display for SegmentSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SegmentSelection::Canonical { count } => write!(f, "canonical:{count}"),
            SegmentSelection::Requested => f.write_str("requested"),
        }
    }
}

impl FromStr for SegmentSelection {
    type Err = CoreError;

    /// Accepts `requested`, `canonical`, or `canonical:<count>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("requested") {
            return Ok(SegmentSelection::Requested);
        }
        if s.eq_ignore_ascii_case("canonical") {
            return Ok(SegmentSelection::default());
        }
        let count = s
            .strip_prefix("canonical:")
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown segment selection '{s}'. Expected 'requested' or 'canonical:<count>'"
                ))
            })?
            .parse::<u32>()
            .map_err(|e| CoreError::Validation(format!("Invalid canonical segment count: {e}")))?;
        if count == 0 {
            return Err(CoreError::Validation(
                "Canonical segment count must be at least 1".to_string(),
            ));
        }
        Ok(SegmentSelection::Canonical { count })
    }
}

/// The canonical segment list `1..=count`.
pub fn canonical_segments(count: u32) -> Vec<SegmentId> {
    (1..=count).collect()
}

/// Validate a caller-supplied segment list.
///
/// Rules:
/// - Must not be empty.
/// - Segment ids start at 1.
/// - No duplicates.
pub fn validate_segments(segments: &[SegmentId]) -> Result<(), CoreError> {
    if segments.is_empty() {
        return Err(CoreError::Validation(
            "At least one segment must be requested".to_string(),
        ));
    }
    let mut seen = HashSet::with_capacity(segments.len());
    for &segment in segments {
        if segment == 0 {
            return Err(CoreError::Validation(
                "Segment ids start at 1".to_string(),
            ));
        }
        if !seen.insert(segment) {
            return Err(CoreError::Validation(format!(
                "Duplicate segment: {segment}"
            )));
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Wave planning
// ---------------------------------------------------------------------------

/// One batch of segments dispatched together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Wave {
    /// Zero-based position in the run.
    pub index: usize,
    /// Segments dispatched in this wave, in list order.
    pub segments: Vec<SegmentId>,
    /// Artifacts that must exist on disk once this wave is done
    /// (sum of the sizes of this and every earlier wave).
    pub target: usize,
}

impl Wave {
    /// One-based wave number for log output.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

/// Split `segments` into consecutive waves of at most `limit` entries.
///
/// The last wave may be smaller. An empty list yields no waves.
pub fn plan_waves(segments: &[SegmentId], limit: usize) -> Result<Vec<Wave>, CoreError> {
    if limit == 0 {
        return Err(CoreError::Validation(
            "Concurrency limit must be at least 1".to_string(),
        ));
    }

    let mut target = 0;
    Ok(segments
        .chunks(limit)
        .enumerate()
        .map(|(index, chunk)| {
            target += chunk.len();
            Wave {
                index,
                segments: chunk.to_vec(),
                target,
            }
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Input rotation
// ---------------------------------------------------------------------------

/// Index into a pool of `pool_len` inputs for `segment`.
///
/// Segment 1 takes entry 0, segment 2 entry 1, and so on, wrapping
/// around. Returns `None` for an empty pool or segment 0.
pub fn rotation_index(segment: SegmentId, pool_len: usize) -> Option<usize> {
    if pool_len == 0 || segment == 0 {
        return None;
    }
    Some((segment as usize - 1) % pool_len)
}

/// Pick the pool entry assigned to `segment`.
pub fn select_rotating<T>(pool: &[T], segment: SegmentId) -> Option<&T> {
    rotation_index(segment, pool.len()).map(|i| &pool[i])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
