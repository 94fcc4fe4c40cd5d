//! Tiered merge policy and merge cancellation
//!
//! Segment size & merge policy:
//! - segments are grouped into size tiers (`floor * segments_per_tier^n`)
//! - a tier holding more than `segments_per_tier` segments is merged down
//! - segments with many tombstones are merged early to reclaim space

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::reader::SegmentView;
use super::types::SegmentId;
use crate::error::{QuarryError, Result};

/// Configuration for the tiered merge policy
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MergePolicyConfig {
    /// Maximum size for a merged segment (default: 5GB)
    pub max_merged_segment_bytes: u64,
    /// Target number of segments per tier (default: 10)
    pub segments_per_tier: usize,
    /// Minimum number of segments to merge at once
    pub min_merge_count: usize,
    /// Maximum number of segments to merge at once
    pub max_merge_count: usize,
    /// Delete ratio threshold to force merge (default: 0.15 = 15%)
    pub delete_ratio_threshold: f64,
    /// Segments smaller than this all count as tier 0
    pub floor_segment_bytes: u64,
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        Self {
            max_merged_segment_bytes: 5 * 1024 * 1024 * 1024, // 5GB
            segments_per_tier: 10,
            min_merge_count: 2,
            max_merge_count: 10,
            delete_ratio_threshold: 0.15,
            floor_segment_bytes: 1024 * 1024, // 1MB
        }
    }
}

/// Cooperative cancellation flag shared between a caller and a merge
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once `cancel` has been called
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(QuarryError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What the policy needs to know about a segment
#[derive(Clone, Debug, PartialEq)]
pub struct MergeInput {
    pub id: SegmentId,
    pub size_bytes: u64,
    pub delete_ratio: f64,
}

impl From<&SegmentView> for MergeInput {
    fn from(view: &SegmentView) -> Self {
        Self {
            id: view.id(),
            size_bytes: view.size_bytes(),
            delete_ratio: view.delete_ratio(),
        }
    }
}

/// A candidate merge operation
#[derive(Clone, Debug)]
pub struct MergeCandidate {
    pub segment_ids: Vec<SegmentId>,
    /// Total size after merge (estimate)
    pub estimated_size: u64,
    /// Merge score (higher = more urgent)
    pub score: f64,
    pub reason: MergeReason,
}

/// Reason why segments should be merged
#[derive(Clone, Debug, PartialEq)]
pub enum MergeReason {
    /// Too many segments in a tier
    TierOverflow,
    /// High delete ratio
    HighDeleteRatio,
    /// Explicit compaction of the whole index
    Forced,
}

/// Tiered merge policy implementation
pub struct TieredMergePolicy {
    config: MergePolicyConfig,
}

impl TieredMergePolicy {
    pub fn new(config: MergePolicyConfig) -> Self {
        Self { config }
    }

    /// Find merge candidates, most urgent first
    pub fn find_merges(&self, segments: &[MergeInput]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();

        if segments.len() < self.config.min_merge_count {
            return candidates;
        }

        if let Some(candidate) = self.find_high_delete_merge(segments) {
            candidates.push(candidate);
        }
        candidates.extend(self.find_tiered_merges(segments));

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        candidates
    }

    /// Candidates that share no segment, in priority order
    pub fn select_merges(&self, segments: &[MergeInput]) -> Vec<MergeCandidate> {
        let mut taken: HashSet<SegmentId> = HashSet::new();
        let mut selected = Vec::new();

        for candidate in self.find_merges(segments) {
            if candidate.segment_ids.iter().any(|id| taken.contains(id)) {
                continue;
            }
            taken.extend(candidate.segment_ids.iter().copied());
            selected.push(candidate);
        }
        selected
    }

    /// A merge of every segment (compaction)
    pub fn forced_merge(&self, segments: &[MergeInput]) -> Option<MergeCandidate> {
        if segments.is_empty() {
            return None;
        }
        Some(MergeCandidate {
            segment_ids: segments.iter().map(|s| s.id).collect(),
            estimated_size: segments.iter().map(|s| s.size_bytes).sum(),
            score: f64::MAX,
            reason: MergeReason::Forced,
        })
    }

    fn find_high_delete_merge(&self, segments: &[MergeInput]) -> Option<MergeCandidate> {
        let high_delete: Vec<&MergeInput> = segments
            .iter()
            .filter(|s| s.delete_ratio > self.config.delete_ratio_threshold)
            .take(self.config.max_merge_count)
            .collect();

        if high_delete.len() < self.config.min_merge_count {
            return None;
        }

        let avg_delete_ratio =
            high_delete.iter().map(|s| s.delete_ratio).sum::<f64>() / high_delete.len() as f64;

        Some(MergeCandidate {
            segment_ids: high_delete.iter().map(|s| s.id).collect(),
            estimated_size: high_delete.iter().map(|s| s.size_bytes).sum(),
            score: avg_delete_ratio * 100.0,
            reason: MergeReason::HighDeleteRatio,
        })
    }

    fn find_tiered_merges(&self, segments: &[MergeInput]) -> Vec<MergeCandidate> {
        let mut candidates = Vec::new();

        for (tier_idx, tier_segments) in self.group_by_tier(segments).iter().enumerate() {
            if tier_segments.len() <= self.config.segments_per_tier {
                continue;
            }

            let merge_count = (tier_segments.len() - self.config.segments_per_tier + 1)
                .min(self.config.max_merge_count)
                .max(self.config.min_merge_count);

            // Smallest segments of the tier first
            let mut sorted = tier_segments.clone();
            sorted.sort_by_key(|s| (s.size_bytes, s.id));

            let mut to_merge: Vec<&MergeInput> = Vec::new();
            let mut total = 0u64;
            for segment in sorted.into_iter().take(merge_count) {
                if total + segment.size_bytes > self.config.max_merged_segment_bytes {
                    break;
                }
                total += segment.size_bytes;
                to_merge.push(segment);
            }

            if to_merge.len() >= self.config.min_merge_count {
                let score = (10.0 - tier_idx as f64).max(1.0) * to_merge.len() as f64;
                candidates.push(MergeCandidate {
                    segment_ids: to_merge.iter().map(|s| s.id).collect(),
                    estimated_size: total,
                    score,
                    reason: MergeReason::TierOverflow,
                });
            }
        }

        candidates
    }

    fn group_by_tier<'a>(&self, segments: &'a [MergeInput]) -> Vec<Vec<&'a MergeInput>> {
        let floor = self.config.floor_segment_bytes.max(1);
        let ratio = (self.config.segments_per_tier as u64).max(2);

        let max_tier = 10;
        let mut tiers: Vec<Vec<&MergeInput>> = vec![Vec::new(); max_tier];

        for segment in segments {
            let size = segment.size_bytes.max(floor);
            let tier = size_to_tier(size, floor, ratio).min(max_tier - 1);
            tiers[tier].push(segment);
        }

        while tiers.last().map(|t| t.is_empty()).unwrap_or(false) {
            tiers.pop();
        }

        tiers
    }
}

impl Default for TieredMergePolicy {
    fn default() -> Self {
        Self::new(MergePolicyConfig::default())
    }
}

/// Tier 0 holds sizes up to `floor * ratio`, tier n up to `floor * ratio^(n+1)`
fn size_to_tier(size: u64, floor: u64, ratio: u64) -> usize {
    if size <= floor {
        return 0;
    }

    let mut tier_max = floor.saturating_mul(ratio);
    let mut tier = 0;

    while size > tier_max && tier < 10 {
        tier += 1;
        tier_max = tier_max.saturating_mul(ratio);
    }

    tier
}
