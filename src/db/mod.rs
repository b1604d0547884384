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

//! Request store.
//!
//! Holds the three logical collections: requests, registered nodes and
//! submitted results. Loops coordinate only through this store.

use crate::{
    base::schema::{JobResult, Node, Request, ResultEntry},
    crypto::PublicKey,
    error::*,
};
#[cfg(test)]
use mockall::automock;

#[cfg(feature = "with-rocksdb")]
pub mod rocks;
#[cfg(feature = "with-rocksdb")]
pub use rocks::RocksStore;

/// Typed access to the persistent store.
///
/// Identifiers are assigned by the store, start from 1 and are never reused.
#[cfg_attr(test, automock)]
pub trait Store: Send + Sync + 'static {
    /// Load request by id.
    fn load_request(&self, id: u64) -> Option<Request>;

    /// Load registered node by id.
    fn load_node(&self, id: u64) -> Option<Node>;

    /// Requests that the given node may still run: not committed, with
    /// `deadline > now` and without a result from `node_id`.
    fn requests_to_run(&self, node_id: u64, now: u64) -> Vec<Request>;

    /// Identifiers of the uncommitted requests with results from at least
    /// `quorum` distinct nodes and whose latest result timestamp does not
    /// exceed the deadline.
    fn requests_to_publish(&self, quorum: usize) -> Vec<u64>;

    /// Results of a request, joined with the node public key and the
    /// request seed and deadline. One entry per node.
    fn results_by_request(&self, request_id: u64) -> Vec<ResultEntry>;

    /// Number of results stored for a request.
    fn count_results(&self, request_id: u64) -> usize;

    /// Insert a new request. The `id` and `tx` fields are overwritten.
    fn save_request(&mut self, request: Request) -> Result<u64>;

    /// Register a node public key.
    fn save_node(&mut self, public_key: PublicKey) -> Result<u64>;

    /// Insert a result. A second result for the same `(request, node)`
    /// pair is rejected with `DuplicatedResult`.
    fn save_result(&mut self, result: JobResult) -> Result<u64>;

    /// Drop from the candidate queries the uncommitted requests whose
    /// deadline is strictly lower than `before`. Returns their ids. The
    /// requests and their results stay readable.
    fn expire_requests(&mut self, before: u64) -> Result<Vec<u64>>;

    /// Set the request commit marker. Fails with `AlreadyResolved` if the
    /// marker was already set.
    fn set_tx(&mut self, request_id: u64, tx: &str) -> Result<()>;
}
