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

//! VRF service client.
//!
//! The VRF primitive lives out of process. A node asks its own VRF service
//! to evaluate a message with the node secret key; anybody can then verify
//! the output against the node public key.

use crate::{crypto::PublicKey, Result};
#[cfg(test)]
use mockall::automock;

/// VRF evaluation output.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone)]
pub struct VrfOutput {
    /// Pseudo random output, read as a big-endian unsigned integer.
    #[serde(deserialize_with = "bytes_or_hex")]
    pub hash: Vec<u8>,
    /// Proof that `hash` was produced by the key owner for the message.
    #[serde(deserialize_with = "bytes_or_hex")]
    pub proof: Vec<u8>,
}

/// Byte strings arrive either as JSON arrays of octets or as hex strings.
fn bytes_or_hex<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    use serde::Deserialize;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Array(Vec<u8>),
        Hex(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Array(bytes) => Ok(bytes),
        Repr::Hex(s) => {
            let s = s.trim_start_matches("0x");
            hex::decode(s).map_err(serde::de::Error::custom)
        }
    }
}

#[cfg_attr(test, automock)]
pub trait VrfService: Send + Sync + 'static {
    /// Evaluate the VRF over `data` with the node secret key.
    fn evaluate(&self, data: &str) -> Result<VrfOutput>;

    /// Check `(hash, proof)` for `data` against the node public key.
    /// `Ok(false)` is a verification failure, `Err` a transport failure.
    fn verify(
        &self,
        public_key: &PublicKey,
        data: &str,
        hash: &[u8],
        proof: &[u8],
    ) -> Result<bool>;
}

#[cfg(feature = "http")]
pub use self::client::HttpVrfService;

#[cfg(feature = "http")]
mod client {
    use super::{VrfOutput, VrfService};
    use crate::{
        base::serialize::json_deserialize, crypto::PublicKey, external::http, Error, ErrorKind,
        Result,
    };
    use isahc::HttpClient;
    use std::time::Duration;

    #[derive(Serialize)]
    struct EvaluateArgs<'a> {
        data: &'a str,
    }

    #[derive(Serialize)]
    #[serde(rename_all = "camelCase")]
    struct VerifyArgs<'a> {
        public_key: String,
        data: &'a str,
        hash: &'a [u8],
        proof: &'a [u8],
    }

    /// VRF service reached over HTTP (`POST /evaluate`, `POST /verify`).
    pub struct HttpVrfService {
        base: String,
        client: HttpClient,
    }

    impl HttpVrfService {
        pub fn new(base: &str, timeout: Duration) -> Result<Self> {
            Ok(HttpVrfService {
                base: base.to_owned(),
                client: http::client(timeout)?,
            })
        }
    }

    impl VrfService for HttpVrfService {
        fn evaluate(&self, data: &str) -> Result<VrfOutput> {
            let url = http::url(&self.base, "evaluate");
            let (status, body) = http::post_json(&self.client, &url, &EvaluateArgs { data })?;
            if !status.is_success() {
                return Err(Error::new_ext(
                    ErrorKind::BadNetwork,
                    format!("vrf evaluate: {}", status),
                ));
            }
            json_deserialize(body.as_bytes())
        }

        fn verify(
            &self,
            public_key: &PublicKey,
            data: &str,
            hash: &[u8],
            proof: &[u8],
        ) -> Result<bool> {
            let url = http::url(&self.base, "verify");
            let args = VerifyArgs {
                public_key: public_key.to_hex(),
                data,
                hash,
                proof,
            };
            let (status, _) = http::post_json(&self.client, &url, &args)?;
            Ok(status.is_success())
        }
    }
}
