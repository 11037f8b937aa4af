use crate::pair::{CandidatePair, PairState};
use slotmap::SlotMap;
use std::collections::VecDeque;
use crate::candidate::PairId;

/// Overall progress of one stream's checklist (RFC 8445 §6.1.2.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecklistState {
    Running,
    Completed,
    Failed,
}

/// The set of candidate pairs for one stream, plus the freeze/unfreeze and scheduling logic
/// RFC 8445 §6.1.2 attaches to it.
pub struct Checklist {
    pairs: SlotMap<PairId, CandidatePair>,
    pub state: ChecklistState,
    /// RFC 8445 §6.1.4.2's triggered-check queue: pairs an inbound request or a fresh
    /// peer-reflexive discovery has fast-tracked, checked before falling back to ordinary
    /// priority-ordered scheduling. Entries may go stale (pair already terminal, or removed by
    /// pruning) and are simply skipped when popped.
    triggered_queue: VecDeque<PairId>,
}

impl Checklist {
    pub fn new() -> Self {
        Self { pairs: SlotMap::with_key(), state: ChecklistState::Running, triggered_queue: VecDeque::new() }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Fast-tracks `pair_id` for the next call to [`Checklist::next_to_check`] (RFC 8445
    /// §6.1.4.2 point 1).
    pub fn enqueue_triggered(&mut self, pair_id: PairId) {
        self.triggered_queue.push_back(pair_id);
    }

    pub fn insert(&mut self, mut pair: CandidatePair) -> PairId {
        self.pairs.insert_with_key(|id| {
            pair.id = id;
            pair
        })
    }

    pub fn get(&self, id: PairId) -> Option<&CandidatePair> {
        self.pairs.get(id)
    }

    pub fn get_mut(&mut self, id: PairId) -> Option<&mut CandidatePair> {
        self.pairs.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CandidatePair> {
        self.pairs.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut CandidatePair> {
        self.pairs.values_mut()
    }

    /// Removes every pair whose id is in `redundant`. Used by the agent after resolving pairs
    /// through the candidate tables to find ones sharing a base/remote address (RFC 8445
    /// §6.1.2.4), which this module can't detect on its own since it only holds candidate ids.
    pub fn remove_all(&mut self, redundant: &[PairId]) {
        for id in redundant {
            self.pairs.remove(*id);
        }
    }

    /// Marks every Frozen pair sharing `foundation` with a just-unfrozen pair as Waiting. Called
    /// once per foundation the first time any pair with that foundation is added, and again
    /// whenever a pair with a shared foundation finishes checking (RFC 8445 §6.1.2.6).
    pub fn unfreeze_foundation(&mut self, foundation: &(String, String)) {
        for pair in self.pairs.values_mut() {
            if pair.state == PairState::Frozen && &pair.foundation == foundation {
                pair.state = PairState::Waiting;
            }
        }
    }

    /// RFC 8445 §6.1.4.2: a pair sitting in the triggered-check queue always goes first; failing
    /// that, the highest-priority `Waiting` pair. Returns `None` if nothing is eligible (either
    /// everything is frozen/in-progress, or the checklist is done).
    pub fn next_to_check(&mut self) -> Option<PairId> {
        while let Some(pair_id) = self.triggered_queue.pop_front() {
            if let Some(p) = self.pairs.get(pair_id) {
                if matches!(p.state, PairState::Waiting | PairState::Frozen) {
                    return Some(pair_id);
                }
            }
        }
        self.pairs
            .iter()
            .filter(|(_, p)| p.state == PairState::Waiting)
            .max_by_key(|(_, p)| p.priority)
            .map(|(id, _)| id)
    }

    /// RFC 8445 §6.1.2.1: on the very first pair added to a checklist for a given foundation,
    /// set it (and every pair sharing its foundation) to Waiting; everything else starts Frozen.
    pub fn unfreeze_first_of_each_foundation(&mut self) {
        let mut unfrozen_foundations: Vec<(String, String)> = Vec::new();
        let ids: Vec<PairId> = self.pairs.keys().collect();
        for id in ids {
            let foundation = self.pairs[id].foundation.clone();
            if !unfrozen_foundations.contains(&foundation) {
                unfrozen_foundations.push(foundation.clone());
                if let Some(p) = self.pairs.get_mut(id) {
                    if p.state == PairState::Frozen {
                        p.state = PairState::Waiting;
                    }
                }
            }
        }
    }

    pub fn all_terminal(&self) -> bool {
        self.pairs
            .values()
            .all(|p| matches!(p.state, PairState::Succeeded | PairState::Failed))
    }

    pub fn has_nominated(&self, component_id: u16) -> bool {
        self.pairs.values().any(|p| p.component_id == component_id && p.nominated)
    }

    pub fn highest_priority_valid(&self, component_id: u16) -> Option<PairId> {
        self.pairs
            .iter()
            .filter(|(_, p)| p.component_id == component_id && p.valid)
            .max_by_key(|(_, p)| p.priority)
            .map(|(id, _)| id)
    }
}

impl Default for Checklist {
    fn default() -> Self {
        Self::new()
    }
}
