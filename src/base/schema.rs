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

use crate::{
    base::serialize::rmp_serialize,
    crypto::{KeyPair, PublicKey},
    ErrorKind, Result,
};

/// Off-chain computation request.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct Request {
    /// Identifier assigned by the store.
    pub id: u64,
    /// Location of the program to run.
    pub uri: String,
    /// Program input parameters (JSON text).
    pub params: String,
    /// Submission time (ms since unix epoch).
    pub submitted_at: u64,
    /// Results with a timestamp past this instant are not aggregated.
    pub deadline: u64,
    /// Unpredictable seed from the epoch service, assigned at intake.
    pub seed: String,
    /// Commit marker, set exactly once when the quorum has been reached.
    pub tx: Option<String>,
}

/// Request lifecycle state.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    /// Created, no results yet.
    Pending,
    /// At least one result, quorum not reached yet.
    Resolving,
    /// Quorum reached, commit marker set.
    Committed,
    /// Deadline passed without quorum. Terminal.
    Expired,
}

impl Request {
    pub fn is_committed(&self) -> bool {
        self.tx.is_some()
    }

    /// A result produced at `timestamp` may still count for this request.
    pub fn accepts(&self, timestamp: u64) -> bool {
        timestamp <= self.deadline
    }

    /// Workers still have time to run the request.
    pub fn is_runnable(&self, now: u64) -> bool {
        self.tx.is_none() && self.deadline > now
    }

    /// Lifecycle state given the current time and the number of results
    /// written for this request.
    pub fn state(&self, now: u64, results: usize) -> RequestState {
        if self.is_committed() {
            RequestState::Committed
        } else if !self.accepts(now) {
            RequestState::Expired
        } else if results > 0 {
            RequestState::Resolving
        } else {
            RequestState::Pending
        }
    }
}

/// Worker node registration.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone)]
pub struct Node {
    /// Identifier assigned by the store.
    pub id: u64,
    /// Key used to sign results and to verify the node VRF proofs.
    pub public_key: PublicKey,
}

/// Execution result submitted by a worker node.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct JobResult {
    /// Identifier assigned by the store.
    pub id: u64,
    /// Executed request.
    pub request_id: u64,
    /// Executing node.
    pub node_id: u64,
    /// Eligibility evaluation time, determines the VRF nonce.
    pub timestamp: u64,
    /// VRF output for the eligibility message.
    #[serde(with = "serde_bytes")]
    pub hash: Vec<u8>,
    /// VRF proof for the eligibility message.
    #[serde(with = "serde_bytes")]
    pub proof: Vec<u8>,
    /// Program output.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
    /// Node signature over the result data.
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

/// Portion of a result covered by the node signature.
/// WARNING: ANY MODIFICATION INVALIDATES THE STORED SIGNATURES
#[derive(Serialize)]
struct SignedData<'a> {
    request_id: u64,
    node_id: u64,
    timestamp: u64,
    #[serde(with = "serde_bytes")]
    hash: &'a [u8],
    #[serde(with = "serde_bytes")]
    proof: &'a [u8],
    #[serde(with = "serde_bytes")]
    payload: &'a [u8],
}

impl JobResult {
    fn signed_data(&self) -> Result<Vec<u8>> {
        let data = SignedData {
            request_id: self.request_id,
            node_id: self.node_id,
            timestamp: self.timestamp,
            hash: &self.hash,
            proof: &self.proof,
            payload: &self.payload,
        };
        rmp_serialize(&data)
    }

    /// Sign the result data, replacing any previous signature.
    pub fn sign(&mut self, keypair: &KeyPair) -> Result<()> {
        let data = self.signed_data()?;
        self.signature = keypair.sign(&data)?;
        Ok(())
    }

    /// Result signature verification.
    pub fn verify(&self, public_key: &PublicKey) -> Result<()> {
        let data = self.signed_data()?;
        match public_key.verify(&data, &self.signature) {
            true => Ok(()),
            false => Err(ErrorKind::InvalidSignature.into()),
        }
    }
}

/// Result joined with the data required to verify it.
#[derive(Debug, PartialEq, Clone)]
pub struct ResultEntry {
    pub result: JobResult,
    /// Public key of the submitting node.
    pub public_key: PublicKey,
    /// Seed of the target request.
    pub seed: String,
    /// Deadline of the target request.
    pub deadline: u64,
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::crypto::sign::tests::create_test_keypair;

    pub const TEST_NOW: u64 = 1_700_000_000_000;
    pub const TEST_SEED: &str = "abc";

    pub fn create_test_request() -> Request {
        Request {
            id: 1,
            uri: "https://example.org/program.wasm".to_owned(),
            params: r#"{"symbol":"BTC"}"#.to_owned(),
            submitted_at: TEST_NOW,
            deadline: TEST_NOW + 60_000,
            seed: TEST_SEED.to_owned(),
            tx: None,
        }
    }

    pub fn create_test_result(keypair: &KeyPair, node_id: u64) -> JobResult {
        let mut result = JobResult {
            id: 0,
            request_id: 1,
            node_id,
            timestamp: TEST_NOW + 1_000,
            hash: vec![0x10; 32],
            proof: vec![0xab; 80],
            payload: b"42".to_vec(),
            signature: vec![],
        };
        result.sign(keypair).unwrap();
        result
    }

    #[test]
    fn request_states() {
        let mut request = create_test_request();

        assert_eq!(request.state(TEST_NOW, 0), RequestState::Pending);
        assert_eq!(request.state(TEST_NOW, 2), RequestState::Resolving);
        assert_eq!(
            request.state(request.deadline, 2),
            RequestState::Resolving
        );
        assert_eq!(
            request.state(request.deadline + 1, 2),
            RequestState::Expired
        );

        request.tx = Some("marker".to_owned());
        assert_eq!(
            request.state(request.deadline + 1, 2),
            RequestState::Committed
        );
    }

    #[test]
    fn deadline_boundary() {
        let request = create_test_request();

        assert!(request.accepts(request.deadline));
        assert!(!request.accepts(request.deadline + 1));
        assert!(request.is_runnable(request.deadline - 1));
        assert!(!request.is_runnable(request.deadline));
    }

    #[test]
    fn result_sign_verify() {
        let keypair = create_test_keypair();

        let result = create_test_result(&keypair, 7);

        assert!(result.verify(&keypair.public_key()).is_ok());
    }

    #[test]
    fn result_tampered_payload() {
        let keypair = create_test_keypair();
        let mut result = create_test_result(&keypair, 7);

        result.payload = b"43".to_vec();

        let err = result.verify(&keypair.public_key()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidSignature);
    }

    #[test]
    fn result_signed_by_another_node() {
        let keypair = create_test_keypair();
        let mut result = create_test_result(&keypair, 7);

        result.node_id = 8;

        assert!(result.verify(&keypair.public_key()).is_err());
    }

    #[test]
    fn request_state_json() {
        let json = serde_json::to_string(&RequestState::Committed).unwrap();

        assert_eq!(json, "\"committed\"");
    }
}
