// This file is part of TRINCI.
//
// Copyright (C) 2021 Affidaty Spa.
//
// TRINCI is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// TRINCI is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with TRINCI. If not, see <https://www.gnu.org/licenses/>.

//! Aggregator loop.
//!
//! Re-verifies the results of the requests that look ready and commits the
//! ones where at least `quorum` distinct nodes hold a verified result.
//! Requests still open once `deadline + grace` has passed are expired and
//! never looked at again.

use crate::{
    base::{JobResult, ResultEntry, RwLock},
    db::Store,
    external::{EpochService, VrfService},
    oracle::{
        eligibility::{self, Difficulty},
        ledger::Publisher,
        scheduler::Task,
        Clock,
    },
    ErrorKind, Result,
};
use std::{collections::HashSet, sync::Arc, time::Duration};

/// Default expiration grace, covers a program run started right before the
/// deadline.
const DEFAULT_GRACE: Duration = Duration::from_millis(30_000);

/// Aggregator (singleton).
pub struct Aggregator<S: Store, E: EpochService, V: VrfService, P: Publisher> {
    quorum: usize,
    difficulty: Difficulty,
    store: Arc<RwLock<S>>,
    epoch: Arc<E>,
    vrf: Arc<V>,
    publisher: Arc<P>,
    /// Time past the deadline before an open request is expired.
    grace: Duration,
    clock: Arc<dyn Clock>,
}

impl<S: Store, E: EpochService, V: VrfService, P: Publisher> Aggregator<S, E, V, P> {
    pub fn new(
        quorum: usize,
        difficulty: Difficulty,
        store: Arc<RwLock<S>>,
        epoch: Arc<E>,
        vrf: Arc<V>,
        publisher: Arc<P>,
    ) -> Self {
        Aggregator {
            quorum,
            difficulty,
            store,
            epoch,
            vrf,
            publisher,
            grace: DEFAULT_GRACE,
            clock: Arc::new(crate::base::timestamp_ms),
        }
    }

    /// Replace the expiration grace.
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Drop from the candidates the requests whose deadline plus grace is
    /// in the past.
    fn expire(&self) -> Result<()> {
        let now = (self.clock)();
        let before = now.saturating_sub(self.grace.as_millis() as u64);
        let expired = self.store.write().expire_requests(before)?;
        for id in expired {
            info!("{} EXPIRED", id);
        }
        Ok(())
    }

    /// Run one pass over the candidate requests.
    /// Returns the ids of the requests committed by this pass.
    pub fn run_once(&self) -> Result<Vec<u64>> {
        self.expire()?;
        let candidates = self.store.read().requests_to_publish(self.quorum);
        if candidates.is_empty() {
            return Ok(vec![]);
        }
        let epoch_length = self.epoch.epoch_length()?;

        let mut committed = vec![];
        for id in candidates {
            let entries = self.store.read().results_by_request(id);
            let verified = self.verified_results(&entries, epoch_length);
            if verified.len() < self.quorum {
                debug!(
                    "{} verified {}/{}, left open",
                    id,
                    verified.len(),
                    self.quorum
                );
                continue;
            }
            let marker = self.publisher.publish(id, &verified)?;
            match self.store.write().set_tx(id, &marker) {
                Ok(()) => {
                    info!("{} DONE ({})", id, marker);
                    committed.push(id);
                }
                Err(err) if err.kind == ErrorKind::AlreadyResolved => {
                    debug!("{} already committed", id);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(committed)
    }

    /// Results passing every check, at most one per node.
    fn verified_results(&self, entries: &[ResultEntry], epoch_length: u64) -> Vec<JobResult> {
        let mut nodes = HashSet::new();
        let mut verified = vec![];
        for entry in entries {
            if nodes.contains(&entry.result.node_id) || !self.verify(entry, epoch_length) {
                continue;
            }
            nodes.insert(entry.result.node_id);
            verified.push(entry.result.clone());
        }
        verified
    }

    /// A failed check means the result does not count, it is never an error.
    fn verify(&self, entry: &ResultEntry, epoch_length: u64) -> bool {
        let result = &entry.result;
        if result.timestamp > entry.deadline {
            debug!("{}: result {} past deadline", result.request_id, result.id);
            return false;
        }
        if result.verify(&entry.public_key).is_err() {
            debug!("{}: result {} bad signature", result.request_id, result.id);
            return false;
        }
        if !self.difficulty.is_met_by(&result.hash) {
            debug!("{}: result {} above difficulty", result.request_id, result.id);
            return false;
        }
        let nonce = match eligibility::nonce(result.timestamp, epoch_length) {
            Ok(nonce) => nonce,
            Err(_) => return false,
        };
        let msg = eligibility::message(result.request_id, &entry.seed, nonce);
        match self
            .vrf
            .verify(&entry.public_key, &msg, &result.hash, &result.proof)
        {
            Ok(true) => true,
            Ok(false) => {
                debug!("{}: result {} bad proof", result.request_id, result.id);
                false
            }
            Err(err) => {
                warn!(
                    "{}: result {} not verified: {}",
                    result.request_id,
                    result.id,
                    err.to_string_full()
                );
                false
            }
        }
    }
}

impl<S: Store, E: EpochService, V: VrfService, P: Publisher> Task for Aggregator<S, E, V, P> {
    fn name(&self) -> &str {
        "aggregator"
    }

    fn tick(&self) -> Result<()> {
        let committed = self.run_once()?;
        if !committed.is_empty() {
            debug!("[aggregator] committed {:?}", committed);
        }
        Ok(())
    }
}
