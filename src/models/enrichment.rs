// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Per-activity enrichment state machine.
//!
//! Storage stays columnar (`detail_fetched_at`, `streams_fetched_at`,
//! `last_error`); the named state is derived from the columns at read time by
//! [`EnrichmentState::derive`] and never stored.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Row of `enrichment_status`. A missing row means the activity is pending.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct EnrichmentStatus {
    pub activity_id: i64,
    pub athlete_id: i64,
    pub detail_fetched_at: Option<DateTime<Utc>>,
    pub streams_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    /// Failed attempts since the last successful step
    pub attempts: i64,
    pub updated_at: DateTime<Utc>,
}

impl EnrichmentStatus {
    pub fn state(&self) -> EnrichmentState {
        EnrichmentState::derive(self.detail_fetched_at, self.streams_fetched_at)
    }
}

/// An activity selected for enrichment, joined with its status row (if any).
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct EnrichmentCandidate {
    pub activity_id: i64,
    pub athlete_id: i64,
    pub start_date: DateTime<Utc>,
    pub detail_fetched_at: Option<DateTime<Utc>>,
    pub streams_fetched_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub attempts: Option<i64>,
}

impl EnrichmentCandidate {
    pub fn state(&self) -> EnrichmentState {
        EnrichmentState::derive(self.detail_fetched_at, self.streams_fetched_at)
    }
}

/// Number of an athlete's activities in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EnrichmentCounts {
    pub pending: i64,
    pub detail_done: i64,
    pub complete: i64,
    /// Activities whose last attempt failed
    pub with_errors: i64,
}

/// Where an activity is in its enrichment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentState {
    /// Nothing fetched yet; eligible for detail fetch.
    Pending,
    /// Detail stored; eligible for stream fetch.
    DetailDone,
    /// Streams stored; no further work.
    Complete,
}

/// A unit of upstream work that moves an activity forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichmentStep {
    FetchDetail,
    FetchStreams,
}

impl EnrichmentState {
    /// Derive the state from the status columns.
    pub fn derive(
        detail_fetched_at: Option<DateTime<Utc>>,
        streams_fetched_at: Option<DateTime<Utc>>,
    ) -> Self {
        match (detail_fetched_at, streams_fetched_at) {
            (_, Some(_)) => EnrichmentState::Complete,
            (Some(_), None) => EnrichmentState::DetailDone,
            (None, None) => EnrichmentState::Pending,
        }
    }

    /// State of an activity that may not have a status row yet.
    pub fn of(status: Option<&EnrichmentStatus>) -> Self {
        status.map_or(EnrichmentState::Pending, EnrichmentStatus::state)
    }

    /// The step that would advance this state, if any.
    pub fn next_step(self) -> Option<EnrichmentStep> {
        match self {
            EnrichmentState::Pending => Some(EnrichmentStep::FetchDetail),
            EnrichmentState::DetailDone => Some(EnrichmentStep::FetchStreams),
            EnrichmentState::Complete => None,
        }
    }

    /// Transition after `step` succeeded.
    ///
    /// Only the step returned by [`next_step`](Self::next_step) is accepted.
    pub fn advance(self, step: EnrichmentStep) -> Result<Self, InvalidTransition> {
        match (self, step) {
            (EnrichmentState::Pending, EnrichmentStep::FetchDetail) => {
                Ok(EnrichmentState::DetailDone)
            }
            (EnrichmentState::DetailDone, EnrichmentStep::FetchStreams) => {
                Ok(EnrichmentState::Complete)
            }
            (from, step) => Err(InvalidTransition { from, step }),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentState::Pending => "pending",
            EnrichmentState::DetailDone => "detail_done",
            EnrichmentState::Complete => "complete",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid enrichment transition: {step:?} from {from:?}")]
pub struct InvalidTransition {
    pub from: EnrichmentState,
    pub step: EnrichmentStep,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(detail: bool, streams: bool) -> EnrichmentStatus {
        let now = Utc::now();
        EnrichmentStatus {
            activity_id: 1,
            athlete_id: 1,
            detail_fetched_at: detail.then_some(now),
            streams_fetched_at: streams.then_some(now),
            last_error: None,
            attempts: 0,
            updated_at: now,
        }
    }

    #[test]
    fn test_missing_row_is_pending() {
        assert_eq!(EnrichmentState::of(None), EnrichmentState::Pending);
    }

    #[test]
    fn test_derive_from_columns() {
        assert_eq!(status(false, false).state(), EnrichmentState::Pending);
        assert_eq!(status(true, false).state(), EnrichmentState::DetailDone);
        assert_eq!(status(true, true).state(), EnrichmentState::Complete);
        // streams without detail still counts as done
        assert_eq!(status(false, true).state(), EnrichmentState::Complete);
    }

    #[test]
    fn test_error_does_not_change_state() {
        let mut row = status(true, false);
        row.last_error = Some("HTTP 500".to_string());
        row.attempts = 3;
        assert_eq!(row.state(), EnrichmentState::DetailDone);
    }

    #[test]
    fn test_forward_transitions() {
        let state = EnrichmentState::Pending;
        let step = state.next_step().unwrap();
        assert_eq!(step, EnrichmentStep::FetchDetail);

        let state = state.advance(step).unwrap();
        assert_eq!(state, EnrichmentState::DetailDone);

        let step = state.next_step().unwrap();
        assert_eq!(step, EnrichmentStep::FetchStreams);

        let state = state.advance(step).unwrap();
        assert_eq!(state, EnrichmentState::Complete);
        assert_eq!(state.next_step(), None);
    }

    #[test]
    fn test_backward_or_skipping_transitions_rejected() {
        assert!(EnrichmentState::Pending
            .advance(EnrichmentStep::FetchStreams)
            .is_err());
        assert!(EnrichmentState::DetailDone
            .advance(EnrichmentStep::FetchDetail)
            .is_err());
        assert!(EnrichmentState::Complete
            .advance(EnrichmentStep::FetchStreams)
            .is_err());
    }

    #[test]
    fn test_states_are_ordered_forward() {
        assert!(EnrichmentState::Pending < EnrichmentState::DetailDone);
        assert!(EnrichmentState::DetailDone < EnrichmentState::Complete);
    }
}
