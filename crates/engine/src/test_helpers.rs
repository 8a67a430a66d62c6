// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared fixtures for engine tests.

use crate::health::HealthTracker;
use crate::reviews::ReviewService;
use crate::runs::RunService;
use crate::store::Store;
use crate::tasks::TaskService;
use fuel_core::test_support::epoch;
use fuel_core::{FakeClock, SequentialIdGen};
use std::sync::Arc;

pub struct TestEnv {
    // NOTE(lifetime): keeps the data directory alive for the store
    #[allow(dead_code)]
    pub dir: tempfile::TempDir,
    pub store: Arc<Store>,
    pub ids: Arc<SequentialIdGen>,
    pub clock: Arc<FakeClock>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path()).unwrap());
        Self {
            dir,
            store,
            ids: Arc::new(SequentialIdGen::new()),
            clock: Arc::new(FakeClock::at(epoch())),
        }
    }

    pub fn tasks(&self) -> TaskService {
        TaskService::new(
            Arc::clone(&self.store),
            self.ids.clone(),
            self.clock.clone(),
        )
    }

    pub fn runs(&self) -> RunService {
        RunService::new(
            Arc::clone(&self.store),
            self.ids.clone(),
            self.clock.clone(),
        )
    }

    pub fn health(&self) -> HealthTracker {
        HealthTracker::new(Arc::clone(&self.store), self.clock.clone())
    }

    pub fn reviews(&self) -> ReviewService {
        ReviewService::new(
            Arc::clone(&self.store),
            self.ids.clone(),
            self.clock.clone(),
        )
    }
}
