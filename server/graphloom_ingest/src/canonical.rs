//! Local canonicalization: dedup of entity candidates within one document.
//!
//! Two stages. Stage one groups candidates by the exact key
//! `normalized_name + "|" + type`, unioning chunk provenance and summing
//! frequency. Stage two runs pairwise similarity over the surviving groups of
//! the same type and merges any pair at or above the intra-document
//! threshold. Both stages visit candidates in first-seen order, and the
//! earlier candidate is always the survivor, so output order is stable.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use graphloom_core::ChunkId;

use crate::similarity::{candidate_key, lcs_ratio, normalize_name, same_type};
use crate::CandidateEntity;

/// One in-document entity after canonicalization: the unit the resolver and
/// the entity-application step operate on.
#[derive(Debug, Clone)]
pub struct CanonicalCandidate {
    /// Display name, taken from the first-seen raw candidate.
    pub name: String,
    /// Type label, taken from the first-seen raw candidate.
    pub entity_type: String,
    /// Longest description seen across the merged candidates.
    pub description: String,
    /// Precomputed [`normalize_name`] of `name`'s group.
    pub normalized_name: String,
    /// Union of source chunks across the merged candidates.
    pub chunk_ids: BTreeSet<ChunkId>,
    /// Sum of merged candidate frequencies.
    pub frequency: u32,
}

impl CanonicalCandidate {
    /// Dedup key shared with the resolver's exact-match index.
    pub fn key(&self) -> String {
        candidate_key(&self.normalized_name, &self.entity_type)
    }
}

/// Strictly longer wins; ties keep the incumbent.
fn keep_longer_description(current: &mut String, incoming: &str) {
    if incoming.len() > current.len() {
        *current = incoming.to_string();
    }
}

/// Collapse one document's raw candidates into canonical candidates.
///
/// Candidates whose name normalizes to the empty string are discarded: there
/// is nothing to key or compare them on.
pub fn canonicalize(
    candidates: Vec<CandidateEntity>,
    local_merge_threshold: f64,
) -> Vec<CanonicalCandidate> {
    let raw_count = candidates.len();

    // ── Stage 1: exact-key grouping ──
    let mut groups: Vec<CanonicalCandidate> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    for candidate in candidates {
        let normalized = normalize_name(&candidate.name);
        if normalized.is_empty() {
            debug!("Dropping candidate with empty normalized name: {:?}", candidate.name);
            continue;
        }
        let key = candidate_key(&normalized, &candidate.entity_type);
        match index.get(&key) {
            Some(&i) => {
                let group = &mut groups[i];
                group.chunk_ids.insert(candidate.chunk_id);
                group.frequency += candidate.frequency;
                keep_longer_description(&mut group.description, &candidate.description);
            }
            None => {
                index.insert(key, groups.len());
                groups.push(CanonicalCandidate {
                    name: candidate.name,
                    entity_type: candidate.entity_type,
                    description: candidate.description,
                    normalized_name: normalized,
                    chunk_ids: BTreeSet::from([candidate.chunk_id]),
                    frequency: candidate.frequency,
                });
            }
        }
    }

    // ── Stage 2: similarity merging within each type ──
    // A group absorbed into a survivor is gone: later groups only compare
    // against survivors, which keeps the pass single and the order stable.
    let mut canonical: Vec<CanonicalCandidate> = Vec::new();
    for group in groups {
        let mut absorbed = false;
        for survivor in canonical.iter_mut() {
            if !same_type(&survivor.entity_type, &group.entity_type) {
                continue;
            }
            if lcs_ratio(&survivor.normalized_name, &group.normalized_name)
                >= local_merge_threshold
            {
                survivor.frequency += group.frequency;
                survivor.chunk_ids.extend(group.chunk_ids.iter().copied());
                keep_longer_description(&mut survivor.description, &group.description);
                absorbed = true;
                break;
            }
        }
        if !absorbed {
            canonical.push(group);
        }
    }

    debug!(
        "Canonicalized {} raw candidates into {} entities",
        raw_count,
        canonical.len()
    );
    canonical
}
