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

//! Oracle settings and node key loading.

use crate::{
    crypto::{
        ecdsa::{self, CurveId},
        ed25519, KeyPair,
    },
    oracle::Difficulty,
    Error, ErrorKind, Result,
};
use std::{path::Path, time::Duration};

/// Default VRF service endpoint.
pub const DEFAULT_VRF_URL: &str = "http://localhost:30327";
/// Default epoch service endpoint.
pub const DEFAULT_EPOCH_URL: &str = "http://localhost:30328";
/// Default intake port.
pub const DEFAULT_REST_PORT: u16 = 30329;
/// Default store location.
pub const DEFAULT_DB_PATH: &str = "db";

/// Runtime settings shared by the oracle roles.
#[derive(Clone, Debug)]
pub struct OracleConfig {
    /// Distinct verified results required to commit a request.
    pub quorum: usize,
    /// Node and aggregator loops period.
    pub period: Duration,
    /// Eligibility threshold.
    pub difficulty: Difficulty,
    pub vrf_url: String,
    pub epoch_url: String,
    /// Bound of every call to the VRF and epoch services.
    pub call_timeout: Duration,
    /// Bound of a single program run.
    pub exec_timeout: Duration,
    /// Fuel granted to a single program run.
    pub max_fuel: u64,
    /// Compiled programs kept in memory.
    pub cache_max: usize,
    pub rest_addr: String,
    pub rest_port: u16,
    pub db_path: String,
}

impl Default for OracleConfig {
    fn default() -> Self {
        OracleConfig {
            quorum: 3,
            period: Duration::from_millis(10_000),
            difficulty: Difficulty::default(),
            vrf_url: DEFAULT_VRF_URL.to_owned(),
            epoch_url: DEFAULT_EPOCH_URL.to_owned(),
            call_timeout: Duration::from_millis(5_000),
            exec_timeout: Duration::from_millis(30_000),
            max_fuel: 10_000_000_000,
            cache_max: 16,
            rest_addr: "127.0.0.1".to_owned(),
            rest_port: DEFAULT_REST_PORT,
            db_path: DEFAULT_DB_PATH.to_owned(),
        }
    }
}

impl OracleConfig {
    /// Settings consistency check.
    pub fn validate(&self) -> Result<()> {
        if self.quorum == 0 {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                "quorum shall be greater than 0",
            ));
        }
        if self.period.is_zero() {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                "period shall be greater than 0",
            ));
        }
        if self.cache_max == 0 {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                "cache size shall be greater than 0",
            ));
        }
        Ok(())
    }
}

/// Load the node keypair.
///
/// The file may hold a PKCS#8 ECDSA key (P-256 or P-384) or a raw 64 bytes
/// Ed25519 keypair. Without a file a fresh Ed25519 keypair is generated.
pub fn load_keypair(path: Option<&Path>) -> Result<KeyPair> {
    let path = match path {
        Some(path) => path,
        None => {
            debug!("generating a new ed25519 keypair");
            return Ok(KeyPair::Ed25519(ed25519::KeyPair::from_random()));
        }
    };
    let bytes = std::fs::read(path).map_err(|err| {
        Error::new_ext(
            ErrorKind::ResourceNotFound,
            format!("{}: {}", path.display(), err),
        )
    })?;
    keypair_from_bytes(&bytes)
}

fn keypair_from_bytes(bytes: &[u8]) -> Result<KeyPair> {
    if let Ok(keypair) = ecdsa::KeyPair::from_pkcs8_bytes(CurveId::Secp256R1, bytes) {
        return Ok(KeyPair::Ecdsa(keypair));
    }
    if let Ok(keypair) = ecdsa::KeyPair::from_pkcs8_bytes(CurveId::Secp384R1, bytes) {
        return Ok(KeyPair::Ecdsa(keypair));
    }
    ed25519::KeyPair::from_bytes(bytes)
        .map(KeyPair::Ed25519)
        .map_err(|_| Error::new_ext(ErrorKind::MalformedData, "unsupported key format"))
}
