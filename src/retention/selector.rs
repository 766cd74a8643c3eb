use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};

use super::policy::RetentionPolicy;
use crate::{
    db::{DbResult, RevisionRepo},
    models::{EntityId, RevisionId, RevisionRow},
};

/// Deletable revisions per entity. Entities ascend; each entity's revisions
/// are listed newest first. Entities with nothing to delete are absent.
pub type CandidateSet = BTreeMap<EntityId, Vec<RevisionId>>;

/// Total number of revisions in a candidate set.
pub fn candidate_count(candidates: &CandidateSet) -> usize {
    candidates.values().map(Vec::len).sum()
}

/// Computes deletion candidates for a bundle from the store's revision listing.
#[derive(Clone)]
pub struct CandidateSelector {
    repo: Arc<dyn RevisionRepo>,
}

impl CandidateSelector {
    pub fn new(repo: Arc<dyn RevisionRepo>) -> Self {
        Self { repo }
    }

    /// Candidates for `bundle` under `policy`, optionally restricted to one entity.
    pub async fn select(
        &self,
        bundle: &str,
        policy: &RetentionPolicy,
        entity_id: Option<EntityId>,
    ) -> DbResult<CandidateSet> {
        self.select_at(bundle, policy, entity_id, Utc::now()).await
    }

    /// Same as [`select`](Self::select) with an explicit clock.
    pub async fn select_at(
        &self,
        bundle: &str,
        policy: &RetentionPolicy,
        entity_id: Option<EntityId>,
        now: DateTime<Utc>,
    ) -> DbResult<CandidateSet> {
        let rows = self
            .repo
            .list_non_current_revisions(bundle, entity_id)
            .await?;
        Ok(select_candidates(rows, policy, now))
    }
}

/// Apply a policy to a listing of non-current revisions.
///
/// Age rules first narrow each entity's revisions to the ones old enough to
/// delete. The keep floor then spares the newest of what is left, so young
/// revisions never count toward it.
pub fn select_candidates(
    rows: Vec<RevisionRow>,
    policy: &RetentionPolicy,
    now: DateTime<Utc>,
) -> CandidateSet {
    let mut by_entity: BTreeMap<EntityId, Vec<RevisionRow>> = BTreeMap::new();
    for row in rows {
        by_entity.entry(row.entity_id).or_default().push(row);
    }

    let floor = policy.keep_floor();
    let cutoff = policy.age_cutoff(now);

    by_entity
        .into_iter()
        .filter_map(|(entity_id, mut revisions)| {
            revisions.sort_unstable_by(|a, b| b.revision_id.cmp(&a.revision_id));

            let candidates: Vec<RevisionId> = revisions
                .into_iter()
                .filter(|r| cutoff.is_none_or(|cutoff| r.last_modified <= cutoff))
                .skip(floor)
                .map(|r| r.revision_id)
                .collect();

            (!candidates.is_empty()).then_some((entity_id, candidates))
        })
        .collect()
}
