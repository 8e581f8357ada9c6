// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Selection policy — pure decisions over snapshots of the store.
//
// Nothing here touches the database or the filesystem.  Every function is
// deterministic for a given input, so the controller and the reaper can ask
// the same question repeatedly and get the same answer.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use airlift_core::manifest;
use airlift_core::types::{ManifestFilters, Update, UpdateId};
use serde_json::Value;

/// Chooses which update to launch and which ones may be discarded.
///
/// Only the embedded update of the running binary is special.  Rows left
/// behind by the embedded update of an earlier binary are stale: they never
/// qualify and are always reapable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionPolicy {
    runtime_version: String,
    embedded_id: Option<UpdateId>,
}

impl SelectionPolicy {
    pub fn new(runtime_version: impl Into<String>) -> Self {
        Self {
            runtime_version: runtime_version.into(),
            embedded_id: None,
        }
    }

    /// Name the embedded update shipped in the running binary.
    pub fn with_embedded(mut self, id: UpdateId) -> Self {
        self.embedded_id = Some(id);
        self
    }

    pub fn runtime_version(&self) -> &str {
        &self.runtime_version
    }

    /// Whether `update` is the embedded update of the running binary.
    pub fn is_current_embedded(&self, update: &Update) -> bool {
        update.is_embedded() && self.embedded_id == Some(update.id)
    }

    fn is_stale_embedded(&self, update: &Update) -> bool {
        update.is_embedded() && self.embedded_id != Some(update.id)
    }

    /// The newest candidate compatible with this build.
    ///
    /// The current embedded update always qualifies; pending ones and stale
    /// embedded rows never do.  Equal commit times are broken by the
    /// lexically greatest id.
    pub fn select_update_to_launch(&self, candidates: &[Update]) -> Option<Update> {
        candidates
            .iter()
            .filter(|u| self.qualifies(u))
            .max_by(|a, b| newest_first(a, b))
            .cloned()
    }

    /// Whether a freshly downloaded update should replace the launched one on
    /// the next launch.
    ///
    /// An update for another runtime version is refused up front, since
    /// selection on this build would never pick it.  Otherwise it must match
    /// the filters and be strictly newer than the launched update.
    pub fn should_load_new_update(
        &self,
        new: &Update,
        launched: Option<&Update>,
        filters: Option<&ManifestFilters>,
    ) -> bool {
        if new.runtime_version != self.runtime_version {
            return false;
        }
        if let Some(filters) = filters {
            if !matches_filters(&new.manifest, filters) {
                return false;
            }
        }
        match launched {
            None => true,
            Some(launched) => new.commit_time > launched.commit_time,
        }
    }

    /// Updates that can never be selected again.
    ///
    /// Kept: the launched update, the newest launch-eligible update per
    /// runtime version, the current embedded update, and anything committed
    /// after the launched update (it may be the next launch).  Stale embedded
    /// rows go unless one of them is the launched update.
    pub fn updates_to_delete(&self, all: &[Update], launched: Option<&Update>) -> Vec<UpdateId> {
        let mut newest: HashMap<&str, &Update> = HashMap::new();
        let eligible = all
            .iter()
            .filter(|u| u.status.is_launchable() && !self.is_stale_embedded(u));
        for update in eligible {
            newest
                .entry(update.runtime_version.as_str())
                .and_modify(|current| {
                    if newest_first(update, *current) == Ordering::Greater {
                        *current = update;
                    }
                })
                .or_insert(update);
        }

        let mut keep: HashSet<UpdateId> = newest.values().map(|u| u.id).collect();
        if let Some(launched) = launched {
            keep.insert(launched.id);
        }

        all.iter()
            .filter(|u| !keep.contains(&u.id))
            .filter(|u| !self.is_current_embedded(u))
            .filter(|u| {
                self.is_stale_embedded(u)
                    || launched.is_none_or(|l| u.commit_time <= l.commit_time)
            })
            .map(|u| u.id)
            .collect()
    }

    fn qualifies(&self, update: &Update) -> bool {
        if update.is_embedded() {
            return self.is_current_embedded(update);
        }
        update.status.is_launchable() && update.runtime_version == self.runtime_version
    }
}

/// Manifest filter predicate.
///
/// Each filter key is looked up in the manifest's metadata.  A field that is
/// present must equal the filter value; an absent field does not disqualify.
pub fn matches_filters(manifest: &Value, filters: &ManifestFilters) -> bool {
    let Some(metadata) = manifest::metadata(manifest) else {
        return true;
    };
    filters
        .iter()
        .all(|(key, expected)| metadata.get(key).is_none_or(|actual| actual == expected))
}

fn newest_first(a: &Update, b: &Update) -> Ordering {
    a.commit_time
        .cmp(&b.commit_time)
        .then_with(|| a.id.to_string().cmp(&b.id.to_string()))
}
