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

//! Program sandbox.
//!
//! The oracle core only sees a call-with-timeout abstraction: fetch the
//! program found at an URI and run its entry point with the request
//! parameters. The local implementation executes WebAssembly modules with
//! no host imports.

use crate::Result;
#[cfg(test)]
use mockall::automock;

#[cfg(feature = "with-wasmtime")]
pub mod local;

#[cfg(feature = "with-wasmtime")]
pub use local::{SandboxConfig, WasmSandbox};

/// Program execution boundary.
#[cfg_attr(test, automock)]
pub trait Sandbox: Send + Sync + 'static {
    /// Fetch the program at `uri` and run it with the given (JSON) `params`.
    /// Returns the program output.
    fn run(&self, uri: &str, params: &[u8]) -> Result<Vec<u8>>;
}

/// Program fetching callback.
pub trait Loader: Fn(&str) -> Result<Vec<u8>> + Send + Sync + 'static {}

impl<T: Fn(&str) -> Result<Vec<u8>> + Send + Sync + 'static> Loader for T {}

/// Structure returned by the programs to the host.
/// WARNING: ANY MODIFICATION CAN BREAK COMPATIBILITY WITH THE DEPLOYED PROGRAMS
#[derive(Serialize, Deserialize)]
#[cfg_attr(test, derive(Debug, PartialEq))]
pub struct AppOutput<'a> {
    /// If the program terminated successfully.
    pub success: bool,
    /// Result data on success. Error string on failure.
    #[serde(with = "serde_bytes")]
    pub data: &'a [u8],
}
