// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Pace-Pipeline: Strava ingestion and pace modelling
//!
//! This crate syncs an athlete's activities from Strava, enriches them with
//! detail and streams, derives leakage-safe rolling training-load features
//! and fits a pace model over them.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod time_utils;

use config::Config;
use db::Database;
use services::{Pipeline, TokenStore};

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub db: Database,
    pub tokens: TokenStore,
    pub pipeline: Pipeline,
}

impl AppState {
    /// Wire the services for `config` on top of an open database.
    pub fn new(config: Config, db: Database) -> error::Result<Self> {
        let cipher = services::TokenCipher::new(&config.token_encryption_secret)?;
        let client = services::StravaClient::new(&config);
        let tokens = TokenStore::new(client, db.clone(), cipher);
        let pipeline = Pipeline::new(&config, db.clone(), tokens.clone());

        Ok(Self {
            config,
            db,
            tokens,
            pipeline,
        })
    }
}
