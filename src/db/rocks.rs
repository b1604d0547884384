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

//! Request store implementation over the MerkleDB RocksDB backend.
//!
//! Layout:
//! - `requests`, `nodes`, `results`: append-only lists, element `i` has id `i + 1`.
//! - `(results_by_request, request_id)`: map from node id to result id.
//! - `open_requests`: map from request id to deadline, for requests without
//!   a commit marker that are not yet expired.

use crate::{
    base::{
        schema::{JobResult, Node, Request, ResultEntry},
        serialize::{rmp_deserialize, rmp_serialize},
    },
    crypto::PublicKey,
    db::Store,
    Error, ErrorKind, Result,
};
use merkledb::{
    access::CopyAccessExt, BinaryValue, Database, DbOptions, Fork, ListIndex, MapIndex, RocksDB,
    Snapshot, _reexports::Error as MisteryError,
};
use std::{borrow::Cow, path::Path};

macro_rules! impl_rmp_binary_value {
    ($($t:ty),*) => {$(
        impl BinaryValue for $t {
            fn to_bytes(&self) -> Vec<u8> {
                rmp_serialize(self).unwrap()
            }

            fn from_bytes(bytes: Cow<'_, [u8]>) -> std::result::Result<Self, MisteryError> {
                rmp_deserialize(bytes.as_ref()).map_err(|err| err.into())
            }
        }
    )*};
}

impl_rmp_binary_value!(Request, Node, JobResult);

const REQUESTS: &str = "requests";
const NODES: &str = "nodes";
const RESULTS: &str = "results";
const RESULTS_BY_REQUEST: &str = "results_by_request";
const OPEN_REQUESTS: &str = "open_requests";

/// Store implementation using rocks db.
pub struct RocksStore {
    /// Backend implementing the `Database` trait (defined by merkledb crate).
    backend: RocksDB,
    /// Last state read-only snapshot.
    snap: Box<dyn Snapshot>,
}

impl RocksStore {
    /// Create/Open a store from the filesystem.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let options = DbOptions::default();
        let backend = RocksDB::open(path, &options)
            .map_err(|err| Error::new_ext(ErrorKind::DatabaseFault, err))?;
        let snap = backend.snapshot();
        Ok(RocksStore { backend, snap })
    }

    /// Apply the fork changes and refresh the read snapshot.
    fn merge(&mut self, fork: Fork) -> Result<()> {
        let patch = fork.into_patch();
        self.backend
            .merge(patch)
            .map_err(|err| Error::new_ext(ErrorKind::DatabaseFault, err))?;
        self.snap = self.backend.snapshot();
        Ok(())
    }

    fn load_result(&self, id: u64) -> Option<JobResult> {
        let list: ListIndex<_, JobResult> = self.snap.get_list(RESULTS);
        id.checked_sub(1).and_then(|idx| list.get(idx))
    }

    /// Result ids of a request, keyed by node id.
    fn result_ids(&self, request_id: u64) -> Vec<(u64, u64)> {
        let map: MapIndex<_, u64, u64> = self.snap.get_map((RESULTS_BY_REQUEST, &request_id));
        map.iter().collect()
    }
}

impl Store for RocksStore {
    fn load_request(&self, id: u64) -> Option<Request> {
        let list: ListIndex<_, Request> = self.snap.get_list(REQUESTS);
        id.checked_sub(1).and_then(|idx| list.get(idx))
    }

    fn load_node(&self, id: u64) -> Option<Node> {
        let list: ListIndex<_, Node> = self.snap.get_list(NODES);
        id.checked_sub(1).and_then(|idx| list.get(idx))
    }

    fn requests_to_run(&self, node_id: u64, now: u64) -> Vec<Request> {
        let open: MapIndex<_, u64, u64> = self.snap.get_map(OPEN_REQUESTS);
        open.iter()
            .filter(|(_, deadline)| *deadline > now)
            .filter(|(id, _)| {
                let map: MapIndex<_, u64, u64> = self.snap.get_map((RESULTS_BY_REQUEST, id));
                !map.contains(&node_id)
            })
            .filter_map(|(id, _)| self.load_request(id))
            .collect()
    }

    fn requests_to_publish(&self, quorum: usize) -> Vec<u64> {
        let open: MapIndex<_, u64, u64> = self.snap.get_map(OPEN_REQUESTS);
        open.iter()
            .filter(|(id, deadline)| {
                let ids = self.result_ids(*id);
                if ids.len() < quorum || ids.is_empty() {
                    return false;
                }
                let latest = ids
                    .iter()
                    .filter_map(|(_, result_id)| self.load_result(*result_id))
                    .map(|result| result.timestamp)
                    .max();
                matches!(latest, Some(ts) if ts <= *deadline)
            })
            .map(|(id, _)| id)
            .collect()
    }

    fn results_by_request(&self, request_id: u64) -> Vec<ResultEntry> {
        let request = match self.load_request(request_id) {
            Some(request) => request,
            None => return vec![],
        };
        self.result_ids(request_id)
            .into_iter()
            .filter_map(|(node_id, result_id)| {
                let node = self.load_node(node_id)?;
                let result = self.load_result(result_id)?;
                Some(ResultEntry {
                    result,
                    public_key: node.public_key,
                    seed: request.seed.clone(),
                    deadline: request.deadline,
                })
            })
            .collect()
    }

    fn count_results(&self, request_id: u64) -> usize {
        let map: MapIndex<_, u64, u64> = self.snap.get_map((RESULTS_BY_REQUEST, &request_id));
        map.keys().count()
    }

    fn save_request(&mut self, mut request: Request) -> Result<u64> {
        let fork = self.backend.fork();
        let id = {
            let mut list: ListIndex<_, Request> = fork.get_list(REQUESTS);
            let id = list.len() + 1;
            request.id = id;
            request.tx = None;
            let deadline = request.deadline;
            list.push(request);
            let mut open: MapIndex<_, u64, u64> = fork.get_map(OPEN_REQUESTS);
            open.put(&id, deadline);
            id
        };
        self.merge(fork)?;
        Ok(id)
    }

    fn save_node(&mut self, public_key: PublicKey) -> Result<u64> {
        let fork = self.backend.fork();
        let id = {
            let mut list: ListIndex<_, Node> = fork.get_list(NODES);
            let id = list.len() + 1;
            list.push(Node { id, public_key });
            id
        };
        self.merge(fork)?;
        Ok(id)
    }

    fn save_result(&mut self, mut result: JobResult) -> Result<u64> {
        if self.load_request(result.request_id).is_none() {
            return Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("request {}", result.request_id),
            ));
        }
        if self.load_node(result.node_id).is_none() {
            return Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("node {}", result.node_id),
            ));
        }
        let fork = self.backend.fork();
        let id = {
            let mut by_node: MapIndex<_, u64, u64> =
                fork.get_map((RESULTS_BY_REQUEST, &result.request_id));
            if by_node.contains(&result.node_id) {
                return Err(ErrorKind::DuplicatedResult.into());
            }
            let mut list: ListIndex<_, JobResult> = fork.get_list(RESULTS);
            let id = list.len() + 1;
            result.id = id;
            by_node.put(&result.node_id, id);
            list.push(result);
            id
        };
        self.merge(fork)?;
        Ok(id)
    }

    fn expire_requests(&mut self, before: u64) -> Result<Vec<u64>> {
        let expired: Vec<u64> = {
            let open: MapIndex<_, u64, u64> = self.snap.get_map(OPEN_REQUESTS);
            open.iter()
                .filter(|(_, deadline)| *deadline < before)
                .map(|(id, _)| id)
                .collect()
        };
        if expired.is_empty() {
            return Ok(expired);
        }
        let fork = self.backend.fork();
        {
            let mut open: MapIndex<_, u64, u64> = fork.get_map(OPEN_REQUESTS);
            expired.iter().for_each(|id| open.remove(id));
        }
        self.merge(fork)?;
        Ok(expired)
    }

    fn set_tx(&mut self, request_id: u64, tx: &str) -> Result<()> {
        let mut request = self
            .load_request(request_id)
            .ok_or_else(|| Error::new_ext(ErrorKind::ResourceNotFound, "request"))?;
        if request.is_committed() {
            return Err(ErrorKind::AlreadyResolved.into());
        }
        request.tx = Some(tx.to_owned());
        let fork = self.backend.fork();
        {
            let mut list: ListIndex<_, Request> = fork.get_list(REQUESTS);
            list.set(request_id - 1, request);
            let mut open: MapIndex<_, u64, u64> = fork.get_map(OPEN_REQUESTS);
            open.remove(&request_id);
        }
        self.merge(fork)
    }
}
