//! Broadcast (shot) lifecycle state machine: validates transitions before
//! the caller issues the corresponding persistence update.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BroadcastState {
    Draft,
    Queued,
    Sending,
    Paused,
    Completed,
    Canceled,
}

impl fmt::Display for BroadcastState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BroadcastState::Draft => "draft",
            BroadcastState::Queued => "queued",
            BroadcastState::Sending => "sending",
            BroadcastState::Paused => "paused",
            BroadcastState::Completed => "completed",
            BroadcastState::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastTransition {
    Populate,
    Start,
    Pause,
    Resume,
    Cancel,
    AutoComplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot apply {transition:?} while broadcast is {from}")]
pub struct InvalidTransition {
    pub from: BroadcastState,
    pub transition: BroadcastTransition,
}

/// Validates and applies a transition, returning the new state or an
/// error naming the rejected (from, transition) pair.
///
/// `draft -> queued -> sending -> (completed | canceled)`, with
/// `sending <-> paused` permitted. `cancel` is permitted from any
/// non-terminal state.
pub fn apply_transition(from: BroadcastState, transition: BroadcastTransition) -> Result<BroadcastState, InvalidTransition> {
    use BroadcastState::*;
    use BroadcastTransition::*;

    let to = match (from, transition) {
        (Draft, Populate) => Queued,
        (Queued, Start) | (Paused, Start) => Sending,
        (Sending, Pause) => Paused,
        (Paused, Resume) => Sending,
        (Sending, AutoComplete) => Completed,
        (Draft | Queued | Sending | Paused, Cancel) => Canceled,
        _ => return Err(InvalidTransition { from, transition }),
    };
    Ok(to)
}

pub fn is_terminal(state: BroadcastState) -> bool {
    matches!(state, BroadcastState::Completed | BroadcastState::Canceled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use BroadcastState::*;
    use BroadcastTransition::*;

    #[test]
    fn happy_path_draft_to_completed() {
        assert_eq!(apply_transition(Draft, Populate), Ok(Queued));
        assert_eq!(apply_transition(Queued, Start), Ok(Sending));
        assert_eq!(apply_transition(Sending, AutoComplete), Ok(Completed));
    }

    #[test]
    fn sending_and_paused_toggle_back_and_forth() {
        assert_eq!(apply_transition(Sending, Pause), Ok(Paused));
        assert_eq!(apply_transition(Paused, Resume), Ok(Sending));
        assert_eq!(apply_transition(Paused, Start), Ok(Sending));
    }

    #[test]
    fn cancel_reachable_from_any_non_terminal_state() {
        for state in [Draft, Queued, Sending, Paused] {
            assert_eq!(apply_transition(state, Cancel), Ok(Canceled));
        }
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        assert!(apply_transition(Completed, Start).is_err());
        assert!(apply_transition(Canceled, Populate).is_err());
    }

    #[test]
    fn cannot_skip_queued_straight_to_sending_from_draft() {
        assert!(apply_transition(Draft, Start).is_err());
    }

    #[test]
    fn is_terminal_matches_completed_and_canceled_only() {
        assert!(is_terminal(Completed));
        assert!(is_terminal(Canceled));
        assert!(!is_terminal(Sending));
        assert!(!is_terminal(Paused));
    }
}
