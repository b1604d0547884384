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

//! Clients of the external collaborators: the Epoch service and the VRF
//! service. Both are consumed through traits so the loops can be exercised
//! with mocks.

pub mod epoch;
pub mod vrf;

pub use epoch::EpochService;
pub use vrf::{VrfOutput, VrfService};

#[cfg(feature = "http")]
pub use epoch::HttpEpochService;
#[cfg(feature = "http")]
pub use vrf::HttpVrfService;

#[cfg(feature = "http")]
pub(crate) mod http {
    use crate::{
        base::serialize::{json_deserialize, json_serialize},
        Error, ErrorKind, Result,
    };
    use isahc::{
        config::Configurable, http::StatusCode, HttpClient, ReadResponseExt, Request,
    };
    use serde::{de::DeserializeOwned, Serialize};
    use std::time::Duration;

    /// Client with the given per call timeout, used for every outbound call.
    pub fn client(timeout: Duration) -> Result<HttpClient> {
        HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| Error::new_ext(ErrorKind::Other, err))
    }

    pub fn map_err(err: isahc::Error) -> Error {
        match err.is_timeout() {
            true => Error::new_ext(ErrorKind::Timeout, err),
            false => Error::new_ext(ErrorKind::BadNetwork, err),
        }
    }

    /// Joins a base url and a path without doubling the slash.
    pub fn url(base: &str, path: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    pub fn get_json<T: DeserializeOwned>(client: &HttpClient, url: &str) -> Result<T> {
        let mut response = client.get(url).map_err(map_err)?;
        if !response.status().is_success() {
            return Err(Error::new_ext(
                ErrorKind::BadNetwork,
                format!("GET {}: {}", url, response.status()),
            ));
        }
        let text = response
            .text()
            .map_err(|err| Error::new_ext(ErrorKind::BadNetwork, err))?;
        json_deserialize(text.as_bytes())
    }

    /// Posts a JSON body, returns the response status and body text.
    pub fn post_json<B: Serialize>(
        client: &HttpClient,
        url: &str,
        body: &B,
    ) -> Result<(StatusCode, String)> {
        let body = json_serialize(body)?;
        let request = Request::post(url)
            .header("content-type", "application/json")
            .body(body)
            .map_err(|err| Error::new_ext(ErrorKind::MalformedData, err))?;
        let mut response = client.send(request).map_err(map_err)?;
        let text = response
            .text()
            .map_err(|err| Error::new_ext(ErrorKind::BadNetwork, err))?;
        Ok((response.status(), text))
    }

}
