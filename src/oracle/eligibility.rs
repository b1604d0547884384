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

//! Epoch based VRF eligibility sampling.
//!
//! A node is eligible to run a request in the current epoch when the VRF
//! output for `request_id | seed | nonce` is below the difficulty target,
//! where `nonce = floor(timestamp / epoch_length)`.

use crate::{
    base::Request,
    external::{EpochService, VrfOutput, VrfService},
    Error, ErrorKind, Result,
};
use std::fmt::{Display, Formatter};

/// Length in bytes of the difficulty target and of the compared VRF output.
pub const DIFFICULTY_LEN: usize = 32;

/// Eligibility target, a big-endian unsigned 256 bit integer.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Difficulty([u8; DIFFICULTY_LEN]);

impl Default for Difficulty {
    /// Half of the output space: `0x80` followed by zeros.
    fn default() -> Self {
        let mut target = [0; DIFFICULTY_LEN];
        target[0] = 0x80;
        Difficulty(target)
    }
}

impl Difficulty {
    pub fn new(target: [u8; DIFFICULTY_LEN]) -> Self {
        Difficulty(target)
    }

    /// Parse a hex target, shorter values are left-padded with zeros.
    pub fn from_hex(hex: &str) -> Result<Self> {
        let hex = hex.trim_start_matches("0x");
        let hex = match hex.len() % 2 {
            0 => hex.to_owned(),
            _ => format!("0{}", hex),
        };
        let bytes =
            hex::decode(&hex).map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        if bytes.len() > DIFFICULTY_LEN {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                "difficulty exceeds 256 bits",
            ));
        }
        Ok(Difficulty(normalize(&bytes)))
    }

    /// True if `hash`, read as a big-endian integer, is strictly below the
    /// target.
    pub fn is_met_by(&self, hash: &[u8]) -> bool {
        normalize(hash) < self.0
    }
}

impl Display for Difficulty {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Fixed width view of a VRF output: the most significant 32 bytes, or the
/// value left-padded with zeros when shorter.
fn normalize(hash: &[u8]) -> [u8; DIFFICULTY_LEN] {
    let mut out = [0; DIFFICULTY_LEN];
    if hash.len() >= DIFFICULTY_LEN {
        out.copy_from_slice(&hash[..DIFFICULTY_LEN]);
    } else {
        out[DIFFICULTY_LEN - hash.len()..].copy_from_slice(hash);
    }
    out
}

/// Epoch number of a timestamp.
pub fn nonce(timestamp: u64, epoch_length: u64) -> Result<u64> {
    match epoch_length {
        0 => Err(Error::new_ext(ErrorKind::MalformedData, "zero epoch length")),
        len => Ok(timestamp / len),
    }
}

/// VRF input message.
pub fn message(request_id: u64, seed: &str, nonce: u64) -> String {
    format!("{}{}{}", request_id, seed, nonce)
}

/// Evidence of a successful sampling.
#[derive(Debug, PartialEq, Clone)]
pub struct Ticket {
    /// Sampling time, recorded as the result timestamp.
    pub timestamp: u64,
    pub nonce: u64,
    pub output: VrfOutput,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Eligibility {
    Eligible(Ticket),
    Ineligible,
}

/// Sample the node eligibility for `request` at time `now`.
/// Epoch or VRF failures are returned as errors, the caller retries on a
/// later tick.
pub fn sample<E, V>(
    epoch: &E,
    vrf: &V,
    difficulty: &Difficulty,
    request: &Request,
    now: u64,
) -> Result<Eligibility>
where
    E: EpochService + ?Sized,
    V: VrfService + ?Sized,
{
    let epoch_length = epoch.epoch_length()?;
    let nonce = nonce(now, epoch_length)?;
    let msg = message(request.id, &request.seed, nonce);
    let output = vrf.evaluate(&msg)?;
    match difficulty.is_met_by(&output.hash) {
        true => Ok(Eligibility::Eligible(Ticket {
            timestamp: now,
            nonce,
            output,
        })),
        false => Ok(Eligibility::Ineligible),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        base::schema::tests::{create_test_request, TEST_NOW},
        external::{epoch::MockEpochService, vrf::MockVrfService},
    };

    fn vrf_output(first: u8) -> VrfOutput {
        let mut hash = vec![0; 32];
        hash[0] = first;
        VrfOutput {
            hash,
            proof: vec![1, 2, 3],
        }
    }

    fn create_epoch_mock(epoch_length: u64) -> MockEpochService {
        let mut epoch = MockEpochService::new();
        epoch
            .expect_epoch_length()
            .returning(move || Ok(epoch_length));
        epoch
    }

    #[test]
    fn default_difficulty() {
        let difficulty = Difficulty::default();

        assert_eq!(
            difficulty.to_string(),
            "8000000000000000000000000000000000000000000000000000000000000000"
        );
        assert_eq!(
            Difficulty::from_hex(&difficulty.to_string()).unwrap(),
            difficulty
        );
    }

    #[test]
    fn difficulty_comparison() {
        let difficulty = Difficulty::default();

        assert!(difficulty.is_met_by(&vrf_output(0x7f).hash));
        assert!(!difficulty.is_met_by(&vrf_output(0x80).hash));
        assert!(!difficulty.is_met_by(&[0xff; 32]));
    }

    #[test]
    fn short_hash_left_padded() {
        let difficulty = Difficulty::from_hex("0x100").unwrap();

        assert!(difficulty.is_met_by(&[0xff]));
        assert!(!difficulty.is_met_by(&[0x01, 0x00]));
    }

    #[test]
    fn long_hash_truncated() {
        let difficulty = Difficulty::default();
        let mut hash = vec![0x7f; 64];
        hash[40] = 0xff;

        assert!(difficulty.is_met_by(&hash));
    }

    #[test]
    fn difficulty_too_long() {
        let err = Difficulty::from_hex(&"ff".repeat(33)).unwrap_err();

        assert_eq!(err.kind, ErrorKind::MalformedData);
    }

    #[test]
    fn nonce_and_message() {
        let nonce = nonce(1_700_000_009_999, 10_000).unwrap();

        assert_eq!(nonce, 170_000_000);
        assert_eq!(message(1, "abc", nonce), "1abc170000000");
    }

    #[test]
    fn zero_epoch_length() {
        assert!(nonce(TEST_NOW, 0).is_err());
    }

    #[test]
    fn sample_eligible() {
        let epoch = create_epoch_mock(10_000);
        let mut vrf = MockVrfService::new();
        vrf.expect_evaluate()
            .withf(|data: &str| data == "1abc170000000")
            .times(1)
            .returning(|_| Ok(vrf_output(0x10)));
        let request = create_test_request();

        let res = sample(&epoch, &vrf, &Difficulty::default(), &request, TEST_NOW).unwrap();

        match res {
            Eligibility::Eligible(ticket) => {
                assert_eq!(ticket.timestamp, TEST_NOW);
                assert_eq!(ticket.nonce, 170_000_000);
                assert_eq!(ticket.output.proof, vec![1, 2, 3]);
            }
            Eligibility::Ineligible => panic!("expected eligible"),
        }
    }

    #[test]
    fn sample_ineligible() {
        let epoch = create_epoch_mock(10_000);
        let mut vrf = MockVrfService::new();
        vrf.expect_evaluate().returning(|_| Ok(vrf_output(0xf0)));
        let request = create_test_request();

        let res = sample(&epoch, &vrf, &Difficulty::default(), &request, TEST_NOW).unwrap();

        assert_eq!(res, Eligibility::Ineligible);
    }

    #[test]
    fn sample_epoch_failure() {
        let mut epoch = MockEpochService::new();
        epoch
            .expect_epoch_length()
            .returning(|| Err(ErrorKind::BadNetwork.into()));
        let mut vrf = MockVrfService::new();
        vrf.expect_evaluate().never();
        let request = create_test_request();

        let err = sample(&epoch, &vrf, &Difficulty::default(), &request, TEST_NOW).unwrap_err();

        assert_eq!(err.kind, ErrorKind::BadNetwork);
    }
}
