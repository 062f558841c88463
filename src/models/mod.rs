// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the application.

pub mod activity;
pub mod athlete;
pub mod cursor;
pub mod enrichment;
pub mod features;
pub mod prediction;
pub mod stream;

pub use activity::{Activity, ActivityMetrics, ActivityRecord, PayloadKind, RawPayload};
pub use athlete::{Athlete, StoredTokens, TokenCredential};
pub use cursor::SyncCursor;
pub use enrichment::{
    EnrichmentCandidate, EnrichmentCounts, EnrichmentState, EnrichmentStatus, EnrichmentStep,
};
pub use features::FeatureRow;
pub use prediction::Prediction;
pub use stream::ActivityStream;
