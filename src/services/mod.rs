// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod cipher;
pub mod enrichment;
pub mod features;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod strava;
pub mod tokens;

pub use cipher::TokenCipher;
pub use enrichment::{EnrichmentOrchestrator, EnrichmentReport};
pub use features::{FeatureAggregator, FeatureMode, FeatureReport};
pub use ingest::{ActivityIngestor, SyncReport};
pub use model::{ModelReport, ModelRunner, ModelScope, Regressor};
pub use pipeline::{AthleteRunReport, Pipeline, StageOutcome};
pub use strava::StravaClient;
pub use tokens::TokenStore;
