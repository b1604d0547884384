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

//! Worker node loop.
//!
//! Every tick the node samples its eligibility for each open request it has
//! not answered yet, runs the program of the requests it is eligible for and
//! stores a signed result.

use crate::{
    base::{JobResult, Request, RwLock},
    crypto::KeyPair,
    db::Store,
    external::{EpochService, VrfService},
    oracle::{
        eligibility::{self, Difficulty, Eligibility, Ticket},
        scheduler::Task,
        Clock,
    },
    sandbox::Sandbox,
    ErrorKind, Result,
};
use std::sync::Arc;

/// Worker node.
pub struct NodeWorker<S: Store, E: EpochService, V: VrfService, X: Sandbox> {
    /// Identifier assigned at registration.
    node_id: u64,
    /// Key used to sign results. Its public part is the VRF key.
    keypair: Arc<KeyPair>,
    difficulty: Difficulty,
    store: Arc<RwLock<S>>,
    epoch: Arc<E>,
    vrf: Arc<V>,
    sandbox: Arc<X>,
    clock: Arc<dyn Clock>,
    name: String,
}

impl<S: Store, E: EpochService, V: VrfService, X: Sandbox> NodeWorker<S, E, V, X> {
    /// Register the node public key and build the worker.
    pub fn register(
        keypair: Arc<KeyPair>,
        difficulty: Difficulty,
        store: Arc<RwLock<S>>,
        epoch: Arc<E>,
        vrf: Arc<V>,
        sandbox: Arc<X>,
    ) -> Result<Self> {
        let public_key = keypair.public_key();
        let node_id = store.write().save_node(public_key.clone())?;
        info!(
            "node {} registered (key {})",
            node_id,
            public_key.fingerprint()
        );
        Ok(NodeWorker {
            node_id,
            keypair,
            difficulty,
            store,
            epoch,
            vrf,
            sandbox,
            clock: Arc::new(crate::base::timestamp_ms),
            name: format!("node-{}", node_id),
        })
    }

    /// Replace the time source.
    pub fn with_clock(mut self, clock: impl Clock) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn node_id(&self) -> u64 {
        self.node_id
    }

    /// Run one pass over the open requests.
    /// Returns the number of results stored.
    pub fn run_once(&self) -> Result<usize> {
        let now = (self.clock)();
        let requests = self.store.read().requests_to_run(self.node_id, now);
        let mut stored = 0;
        for request in requests {
            if self.process(&request)? {
                stored += 1;
            }
        }
        Ok(stored)
    }

    /// Sample, execute and store. Only store failures are propagated.
    fn process(&self, request: &Request) -> Result<bool> {
        let now = (self.clock)();
        if !request.accepts(now) {
            debug!("{} EXPIRED", request.id);
            return Ok(false);
        }
        let sampled = eligibility::sample(
            self.epoch.as_ref(),
            self.vrf.as_ref(),
            &self.difficulty,
            request,
            now,
        );
        let ticket = match sampled {
            Ok(Eligibility::Eligible(ticket)) => ticket,
            Ok(Eligibility::Ineligible) => {
                debug!("{} PASS", request.id);
                return Ok(false);
            }
            Err(err) => {
                warn!("{} sampling failed: {}", request.id, err.to_string_full());
                return Ok(false);
            }
        };

        let payload = match self.sandbox.run(&request.uri, request.params.as_bytes()) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("{} execution failed: {}", request.id, err.to_string_full());
                return Ok(false);
            }
        };
        info!("{} RUN: {}", request.id, String::from_utf8_lossy(&payload));

        let result = self.build_result(request.id, ticket, payload)?;
        match self.store.write().save_result(result) {
            Ok(_) => Ok(true),
            Err(err) if err.kind == ErrorKind::DuplicatedResult => {
                debug!("{} already answered", request.id);
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    fn build_result(
        &self,
        request_id: u64,
        ticket: Ticket,
        payload: Vec<u8>,
    ) -> Result<JobResult> {
        let mut result = JobResult {
            id: 0,
            request_id,
            node_id: self.node_id,
            timestamp: ticket.timestamp,
            hash: ticket.output.hash,
            proof: ticket.output.proof,
            payload,
            signature: vec![],
        };
        result.sign(&self.keypair)?;
        Ok(result)
    }
}

impl<S: Store, E: EpochService, V: VrfService, X: Sandbox> Task for NodeWorker<S, E, V, X> {
    fn name(&self) -> &str {
        &self.name
    }

    fn tick(&self) -> Result<()> {
        let stored = self.run_once()?;
        if stored > 0 {
            debug!("[{}] {} results stored", self.name, stored);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::tests::{create_test_request, TEST_NOW},
        crypto::sign::tests::create_test_keypair,
        db::MockStore,
        external::{epoch::MockEpochService, vrf::MockVrfService, VrfOutput},
        sandbox::MockSandbox,
        Error,
    };

    type TestNode = NodeWorker<MockStore, MockEpochService, MockVrfService, MockSandbox>;

    fn eligible_output() -> VrfOutput {
        VrfOutput {
            hash: vec![0x10; 32],
            proof: vec![0xab; 80],
        }
    }

    fn create_store_mock() -> MockStore {
        let mut store = MockStore::new();
        store.expect_save_node().times(1).returning(|_| Ok(7));
        store
            .expect_requests_to_run()
            .returning(|_, _| vec![create_test_request()]);
        store
    }

    fn create_epoch_mock() -> MockEpochService {
        let mut epoch = MockEpochService::new();
        epoch.expect_epoch_length().returning(|| Ok(10_000));
        epoch
    }

    fn create_vrf_mock(output: VrfOutput) -> MockVrfService {
        let mut vrf = MockVrfService::new();
        vrf.expect_evaluate()
            .returning(move |_| Ok(output.clone()));
        vrf
    }

    fn create_sandbox_mock() -> MockSandbox {
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_run()
            .withf(|uri: &str, params: &[u8]| {
                uri == "https://example.org/program.wasm" && params == br#"{"symbol":"BTC"}"#
            })
            .returning(|_, _| Ok(b"42".to_vec()));
        sandbox
    }

    fn create_node(store: MockStore, vrf: MockVrfService, sandbox: MockSandbox) -> TestNode {
        NodeWorker::register(
            Arc::new(create_test_keypair()),
            Difficulty::default(),
            Arc::new(RwLock::new(store)),
            Arc::new(create_epoch_mock()),
            Arc::new(vrf),
            Arc::new(sandbox),
        )
        .unwrap()
        .with_clock(|| TEST_NOW)
    }

    #[test]
    fn eligible_node_stores_signed_result() {
        let mut store = create_store_mock();
        store
            .expect_save_result()
            .withf(|result: &JobResult| {
                result.node_id == 7
                    && result.request_id == 1
                    && result.timestamp == TEST_NOW
                    && result.payload == b"42"
                    && result.verify(&create_test_keypair().public_key()).is_ok()
            })
            .times(1)
            .returning(|_| Ok(1));
        let node = create_node(store, create_vrf_mock(eligible_output()), create_sandbox_mock());

        assert_eq!(node.node_id(), 7);
        assert_eq!(node.run_once().unwrap(), 1);
    }

    #[test]
    fn ineligible_node_skips() {
        let mut store = create_store_mock();
        store.expect_save_result().never();
        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().never();
        let output = VrfOutput {
            hash: vec![0xf0; 32],
            proof: vec![],
        };
        let node = create_node(store, create_vrf_mock(output), sandbox);

        assert_eq!(node.run_once().unwrap(), 0);
    }

    #[test]
    fn vrf_failure_skips_request() {
        let mut store = create_store_mock();
        store.expect_save_result().never();
        let mut vrf = MockVrfService::new();
        vrf.expect_evaluate()
            .returning(|_| Err(ErrorKind::Timeout.into()));
        let mut sandbox = MockSandbox::new();
        sandbox.expect_run().never();
        let node = create_node(store, vrf, sandbox);

        assert_eq!(node.run_once().unwrap(), 0);
    }

    #[test]
    fn sandbox_failure_skips_request() {
        let mut store = create_store_mock();
        store.expect_save_result().never();
        let mut sandbox = MockSandbox::new();
        sandbox
            .expect_run()
            .returning(|_, _| Err(Error::new_ext(ErrorKind::ProgramFault, "boom")));
        let node = create_node(store, create_vrf_mock(eligible_output()), sandbox);

        assert_eq!(node.run_once().unwrap(), 0);
    }

    #[test]
    fn store_failure_aborts_tick() {
        let mut store = create_store_mock();
        store
            .expect_save_result()
            .returning(|_| Err(ErrorKind::DatabaseFault.into()));
        let node = create_node(store, create_vrf_mock(eligible_output()), create_sandbox_mock());

        let err = node.tick().unwrap_err();

        assert_eq!(err.kind, ErrorKind::DatabaseFault);
    }

    #[test]
    fn duplicate_result_is_not_an_error() {
        let mut store = create_store_mock();
        store
            .expect_save_result()
            .returning(|_| Err(ErrorKind::DuplicatedResult.into()));
        let node = create_node(store, create_vrf_mock(eligible_output()), create_sandbox_mock());

        assert_eq!(node.run_once().unwrap(), 0);
    }

    #[test]
    fn expired_while_processing() {
        let mut store = create_store_mock();
        store.expect_save_result().never();
        let mut vrf = MockVrfService::new();
        vrf.expect_evaluate().never();
        let deadline = create_test_request().deadline;
        let node = create_node(store, vrf, MockSandbox::new()).with_clock(move || deadline + 1);

        assert_eq!(node.run_once().unwrap(), 0);
    }

    #[test]
    fn registration_failure() {
        let mut store = MockStore::new();
        store
            .expect_save_node()
            .returning(|_| Err(ErrorKind::DatabaseFault.into()));

        let res: Result<TestNode> = NodeWorker::register(
            Arc::new(create_test_keypair()),
            Difficulty::default(),
            Arc::new(RwLock::new(store)),
            Arc::new(MockEpochService::new()),
            Arc::new(MockVrfService::new()),
            Arc::new(MockSandbox::new()),
        );

        assert!(res.is_err());
    }
}
