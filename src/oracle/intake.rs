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

//! Request intake.

use crate::{
    base::{Request, RequestState, RwLock},
    db::Store,
    external::EpochService,
    oracle::Clock,
    Error, ErrorKind, Result,
};
use std::sync::Arc;

/// Client submission.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Submission {
    /// Program location.
    pub uri: String,
    /// Program input, any JSON value.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Results produced after this instant (ms since unix epoch) are ignored.
    pub deadline: u64,
}

/// Request view returned to the clients.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct RequestStatus {
    pub request: Request,
    pub state: RequestState,
    /// Number of results stored so far.
    pub results: usize,
}

/// Validates submissions, stamps them with a fresh seed and persists them.
pub struct Intake<S: Store, E: EpochService> {
    store: Arc<RwLock<S>>,
    epoch: Arc<E>,
    clock: Arc<dyn Clock>,
}

impl<S: Store, E: EpochService> Intake<S, E> {
    pub fn new(store: Arc<RwLock<S>>, epoch: Arc<E>) -> Self {
        Intake {
            store,
            epoch,
            clock: Arc::new(crate::base::timestamp_ms),
        }
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Persist a new pending request. Returns its id.
    pub fn submit(&self, submission: Submission) -> Result<u64> {
        if submission.uri.trim().is_empty() {
            return Err(Error::new_ext(ErrorKind::MalformedData, "missing uri"));
        }
        let now = (self.clock)();
        if submission.deadline <= now {
            return Err(Error::new_ext(
                ErrorKind::ExpiredDeadline,
                "deadline is in the past",
            ));
        }
        let seed = self.epoch.seed()?;
        let request = Request {
            id: 0,
            uri: submission.uri,
            params: submission.params.to_string(),
            submitted_at: now,
            deadline: submission.deadline,
            seed,
            tx: None,
        };
        let id = self.store.write().save_request(request)?;
        info!("request {} accepted (deadline {})", id, submission.deadline);
        Ok(id)
    }

    /// Current view of a request.
    pub fn status(&self, id: u64) -> Result<RequestStatus> {
        let store = self.store.read();
        let request = store
            .load_request(id)
            .ok_or_else(|| Error::new_ext(ErrorKind::ResourceNotFound, "request not found"))?;
        let results = store.count_results(id);
        let state = request.state((self.clock)(), results);
        Ok(RequestStatus {
            request,
            state,
            results,
        })
    }
}
