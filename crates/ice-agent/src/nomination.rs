use crate::candidate::PairId;
use crate::checklist::{Checklist, ChecklistState};
use crate::config::NominationStrategy;
use crate::pair::PairState;

/// Decides whether a component has a pair ready to nominate right now, given the configured
/// strategy (RFC 8445 §8.1.1). Returns `None` when nothing should be nominated yet.
pub fn pair_to_nominate(
    checklist: &Checklist,
    component_id: u16,
    strategy: NominationStrategy,
    just_validated: Option<PairId>,
) -> Option<PairId> {
    if checklist.has_nominated(component_id) {
        return None;
    }

    match strategy {
        NominationStrategy::FirstValid => {
            let candidate = just_validated.filter(|id| {
                checklist.get(*id).is_some_and(|p| p.component_id == component_id && p.valid)
            });
            candidate.or_else(|| checklist.highest_priority_valid(component_id))
        }
        NominationStrategy::HighestPriority => {
            if all_foundations_settled(checklist) {
                checklist.highest_priority_valid(component_id)
            } else {
                None
            }
        }
        NominationStrategy::AfterChecklistCompletion => {
            if checklist.state == ChecklistState::Completed {
                checklist.highest_priority_valid(component_id)
            } else {
                None
            }
        }
    }
}

/// True once every pair has left the Frozen/Waiting/InProgress states — i.e. the checklist as a
/// whole has nothing left to try.
fn all_foundations_settled(checklist: &Checklist) -> bool {
    checklist
        .iter()
        .all(|p| matches!(p.state, PairState::Succeeded | PairState::Failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{LocalCandidateId, RemoteCandidateId};
    use crate::pair::CandidatePair;

    fn dummy_pair(priority: u64, state: PairState, valid: bool) -> CandidatePair {
        CandidatePair {
            id: PairId::default(),
            local: LocalCandidateId::default(),
            remote: RemoteCandidateId::default(),
            component_id: 1,
            priority,
            state,
            nominated: false,
            valid,
            peer_nomination_requested: false,
            foundation: ("0".into(), "0".into()),
        }
    }

    #[test]
    fn highest_priority_waits_for_every_pair_to_settle() {
        let mut checklist = Checklist::new();
        let low = checklist.insert(dummy_pair(1, PairState::Succeeded, true));
        checklist.insert(dummy_pair(2, PairState::Waiting, false));

        assert!(pair_to_nominate(&checklist, 1, NominationStrategy::HighestPriority, Some(low)).is_none());
    }

    #[test]
    fn highest_priority_nominates_once_all_settled() {
        let mut checklist = Checklist::new();
        checklist.insert(dummy_pair(1, PairState::Succeeded, true));
        let high = checklist.insert(dummy_pair(2, PairState::Succeeded, true));

        assert_eq!(
            pair_to_nominate(&checklist, 1, NominationStrategy::HighestPriority, None),
            Some(high)
        );
    }

    #[test]
    fn first_valid_nominates_immediately() {
        let mut checklist = Checklist::new();
        let first = checklist.insert(dummy_pair(1, PairState::Succeeded, true));
        checklist.insert(dummy_pair(100, PairState::Waiting, false));

        assert_eq!(
            pair_to_nominate(&checklist, 1, NominationStrategy::FirstValid, Some(first)),
            Some(first)
        );
    }
}
