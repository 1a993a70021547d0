//! Wire state policy
//!
//! Maps a provider's (stream state, data state, code) triple, together with
//! the subscription's current state, onto what the subscription should do.
//! The function is pure; the subscription applies the outcome.

use rdm_types::{DataState, State, StateCode, StreamState};

use crate::error::ItemError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionState {
    Inactive,
    Subscribing,
    Live,
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOutcome {
    /// Stream is gone; listeners get the error and the item is torn down
    Error(ItemError),
    /// Answer to an outstanding snapshot
    SnapshotComplete,
    Stale { text: String },
    /// Stale → Live
    Recovered { text: String },
    /// Subscribing → Live
    FirstLive,
    NoChange,
    /// Combination the policy does not expect; logged and counted
    Anomaly { reason: String },
}

/// Whether the provider still holds the stream after sending `state`
///
/// An error on a stream that is still open (preemption) leaves the id in use
/// on the provider side until the consumer closes it.
pub fn still_open(state: &State) -> bool {
    state.stream_state == StreamState::Open
}

/// Classify one state against the subscription's current state
pub fn classify(state: &State, current: SubscriptionState, snapshot_active: bool) -> StateOutcome {
    if state.is_closed() {
        return StateOutcome::Error(ItemError::from_closed_state(state));
    }

    match (state.stream_state, state.data_state) {
        (StreamState::NonStreaming, _) if snapshot_active => StateOutcome::SnapshotComplete,
        (StreamState::Open, _) if state.code == StateCode::Preempted => {
            StateOutcome::Error(ItemError::Platform {
                text: state.text.clone(),
            })
        }
        (StreamState::Open, DataState::Suspect) => {
            if current == SubscriptionState::Stale {
                StateOutcome::NoChange
            } else {
                StateOutcome::Stale {
                    text: state.text.clone(),
                }
            }
        }
        (StreamState::Open, DataState::Ok) => match current {
            SubscriptionState::Stale => StateOutcome::Recovered {
                text: state.text.clone(),
            },
            SubscriptionState::Subscribing => StateOutcome::FirstLive,
            SubscriptionState::Live | SubscriptionState::Inactive => StateOutcome::NoChange,
        },
        (StreamState::Open, DataState::NoChange) => StateOutcome::NoChange,
        (stream, data) => StateOutcome::Anomaly {
            reason: format!(
                "unexpected {:?}/{:?}/{:?} while {:?}",
                stream, data, state.code, current
            ),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SubscriptionState::*;

    fn state(stream: StreamState, data: DataState, code: StateCode) -> State {
        State::new(stream, data, code, "text")
    }

    #[test]
    fn test_preempted_stream_is_still_open() {
        let preempted = state(StreamState::Open, DataState::Suspect, StateCode::Preempted);
        assert!(matches!(
            classify(&preempted, Live, false),
            StateOutcome::Error(ItemError::Platform { .. })
        ));
        assert!(still_open(&preempted));
        assert!(!still_open(&state(StreamState::Closed, DataState::Suspect, StateCode::NotFound)));
        assert!(!still_open(&state(StreamState::NonStreaming, DataState::Ok, StateCode::None)));
    }

    #[test]
    fn test_closed_codes_map_to_errors() {
        let cases = [
            (StateCode::NotFound, ItemError::NotFound { text: "text".into() }),
            (StateCode::NotEntitled, ItemError::NotEntitled { text: "text".into() }),
            (StateCode::Timeout, ItemError::Timeout { text: "text".into() }),
        ];
        for (code, expected) in cases {
            let s = state(StreamState::Closed, DataState::Suspect, code);
            assert_eq!(classify(&s, Subscribing, false), StateOutcome::Error(expected));
        }
    }

    #[test]
    fn test_preempted_is_platform_error() {
        let s = state(StreamState::Open, DataState::Suspect, StateCode::Preempted);
        assert!(matches!(
            classify(&s, Live, false),
            StateOutcome::Error(ItemError::Platform { .. })
        ));
    }

    #[test]
    fn test_suspect_and_ok_transitions() {
        let suspect = state(StreamState::Open, DataState::Suspect, StateCode::None);
        let ok = state(StreamState::Open, DataState::Ok, StateCode::None);

        assert!(matches!(classify(&suspect, Live, false), StateOutcome::Stale { .. }));
        assert_eq!(classify(&suspect, Stale, false), StateOutcome::NoChange);
        assert!(matches!(classify(&ok, Stale, false), StateOutcome::Recovered { .. }));
        assert_eq!(classify(&ok, Subscribing, false), StateOutcome::FirstLive);
        assert_eq!(classify(&ok, Live, false), StateOutcome::NoChange);
    }

    #[test]
    fn test_snapshot_answer() {
        let s = state(StreamState::NonStreaming, DataState::Ok, StateCode::None);
        assert_eq!(classify(&s, Subscribing, true), StateOutcome::SnapshotComplete);
        assert!(matches!(
            classify(&s, Subscribing, false),
            StateOutcome::Anomaly { .. }
        ));
    }
}
