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

use crate::{db::Store, external::EpochService, oracle::Intake, rest::worker};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
};

/// REST service configuration.
#[derive(Clone)]
pub struct RestConfig {
    /// IP address (e.g. 127.0.0.1 for localhost)
    pub addr: String,
    /// TCP port.
    pub port: u16,
}

/// REST service data.
pub struct RestService<S: Store, E: EpochService> {
    /// Server configuration.
    config: RestConfig,
    /// Worker thread handler.
    handle: Option<JoinHandle<()>>,
    /// Request intake shared with the handlers.
    intake: Arc<Intake<S, E>>,
    /// To check if the worker thread is alive.
    canary: Arc<()>,
}

impl<S: Store, E: EpochService> RestService<S, E> {
    pub fn new(config: RestConfig, intake: Intake<S, E>) -> Self {
        RestService {
            config,
            handle: None,
            intake: Arc::new(intake),
            canary: Arc::new(()),
        }
    }

    /// Start the service.
    pub fn start(&mut self) {
        debug!("Starting REST service");
        if self.is_running() {
            warn!("service was already running");
            return;
        }
        let intake = Arc::clone(&self.intake);
        let addr = self.config.addr.clone();
        let port = self.config.port;
        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker::run(addr, port, intake);
        });
        self.handle = Some(handle);
    }

    /// Stop the service.
    pub fn stop(&mut self) {
        // TODO: tide 0.16 offers no graceful shutdown, the listener thread is detached.
        debug!("Stopping REST service");
        match self.handle.take() {
            Some(_handle) => (),
            None => debug!("service was not running"),
        };
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2
    }
}
