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

//! Epoch service: epoch length and per request seeds.

use crate::Result;
#[cfg(test)]
use mockall::automock;

/// Source of the epoch length and of unpredictable request seeds.
#[cfg_attr(test, automock)]
pub trait EpochService: Send + Sync + 'static {
    /// Current epoch length in milliseconds.
    fn epoch_length(&self) -> Result<u64>;

    /// Fresh seed, requested once per submitted request.
    fn seed(&self) -> Result<String>;
}

#[cfg(feature = "http")]
pub use self::client::HttpEpochService;

#[cfg(feature = "http")]
mod client {
    use super::EpochService;
    use crate::{external::http, Result};
    use isahc::HttpClient;
    use serde_json::Value;
    use std::time::Duration;

    #[derive(Deserialize)]
    struct EpochResponse {
        epoch: u64,
    }

    #[derive(Deserialize)]
    struct SeedResponse {
        seed: Value,
    }

    /// Epoch service reached over HTTP (`GET /epoch`, `GET /seed`).
    pub struct HttpEpochService {
        base: String,
        client: HttpClient,
    }

    impl HttpEpochService {
        pub fn new(base: &str, timeout: Duration) -> Result<Self> {
            Ok(HttpEpochService {
                base: base.to_owned(),
                client: http::client(timeout)?,
            })
        }
    }

    impl EpochService for HttpEpochService {
        fn epoch_length(&self) -> Result<u64> {
            let res: EpochResponse = http::get_json(&self.client, &http::url(&self.base, "epoch"))?;
            Ok(res.epoch)
        }

        fn seed(&self) -> Result<String> {
            let res: SeedResponse = http::get_json(&self.client, &http::url(&self.base, "seed"))?;
            Ok(seed_to_string(res.seed))
        }
    }

    /// Seeds are concatenated verbatim into the eligibility message, numbers
    /// keep their decimal form.
    pub(super) fn seed_to_string(seed: Value) -> String {
        match seed {
            Value::String(s) => s,
            other => other.to_string(),
        }
    }
}

#[cfg(all(test, feature = "http"))]
mod tests {
    use super::{client::seed_to_string, *};
    use crate::ErrorKind;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn seed_string_or_number() {
        assert_eq!(seed_to_string(json!("abc")), "abc");
        assert_eq!(seed_to_string(json!(123456)), "123456");
    }

    #[test]
    fn unreachable_service() {
        // Nothing listens on the discard port.
        let service = HttpEpochService::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();

        let err = service.epoch_length().unwrap_err();

        assert!(matches!(err.kind, ErrorKind::BadNetwork | ErrorKind::Timeout));
        assert!(err.is_transient());
    }
}
