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

//! Downstream publishing of committed requests.

use crate::{base::JobResult, crypto::Hashable, Result};
#[cfg(test)]
use mockall::automock;

/// Publishes the outcome of a request that reached the quorum and returns
/// the commit marker stored in the request `tx` field.
#[cfg_attr(test, automock)]
pub trait Publisher: Send + Sync + 'static {
    fn publish(&self, request_id: u64, results: &[JobResult]) -> Result<String>;
}

/// Local publisher: the marker is the hex encoded multihash (SHA-256) of the
/// request id and of the verified results, ordered by node id.
#[derive(Default)]
pub struct CommitMarker;

impl Publisher for CommitMarker {
    fn publish(&self, request_id: u64, results: &[JobResult]) -> Result<String> {
        let mut results = results.to_vec();
        results.sort_by_key(|result| result.node_id);
        let hash = (request_id, results).primary_hash()?;
        Ok(hash.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::tests::create_test_result,
        crypto::{sign::tests::create_test_keypair, Hash},
    };

    #[test]
    fn marker_is_order_independent() {
        let keypair = create_test_keypair();
        let r1 = create_test_result(&keypair, 1);
        let r2 = create_test_result(&keypair, 2);

        let m1 = CommitMarker.publish(1, &[r1.clone(), r2.clone()]).unwrap();
        let m2 = CommitMarker.publish(1, &[r2, r1]).unwrap();

        assert_eq!(m1, m2);
        assert!(Hash::from_hex(&m1).is_ok());
        assert!(m1.starts_with("1220"));
    }

    #[test]
    fn marker_depends_on_request() {
        let keypair = create_test_keypair();
        let results = vec![create_test_result(&keypair, 1)];

        let m1 = CommitMarker.publish(1, &results).unwrap();
        let m2 = CommitMarker.publish(2, &results).unwrap();

        assert_ne!(m1, m2);
    }
}
