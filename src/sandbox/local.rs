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

//! WebAssembly sandbox using wasmtime.
//!
//! Program ABI:
//! - exported `memory`;
//! - exported `alloc(size: i32) -> i32`, used by the host to reserve the
//!   input buffer;
//! - exported `run(offset: i32, length: i32) -> i64`, receiving the JSON
//!   encoded params and returning a wasm slice (offset in the high 32 bits,
//!   length in the low 32 bits) pointing to a MessagePack `AppOutput`.
//!
//! Programs can't import anything from the host. Each run gets a fresh
//! instance, a fuel budget and a wall-clock deadline enforced via epoch
//! interruption. A single ticker thread advances the engine epoch every
//! `EPOCH_SLICE`, each store sets its own deadline in ticks so concurrent
//! runs don't interrupt each other.

use crate::{
    base::{serialize::rmp_deserialize, Mutex},
    channel::{simple_channel, ChannelError, Sender},
    crypto::{Hash, HashAlgorithm},
    sandbox::{AppOutput, Loader, Sandbox},
    Error, ErrorKind, Result,
};
use std::{
    collections::HashMap,
    thread::{self, JoinHandle},
    time::Duration,
};
use wasmtime::{Config, Engine, Instance, Memory, Module, Store, Trap, TypedFunc};

pub type WasmSlice = u64;

/// Engine epoch period.
const EPOCH_SLICE: Duration = Duration::from_millis(10);

/// Split one u64 into (offset, length).
#[inline]
fn wslice_split(wslice: WasmSlice) -> (usize, usize) {
    (
        ((wslice & 0xffffffff00000000) >> 32) as usize,
        (wslice & 0x00000000ffffffff) as usize,
    )
}

/// Sandbox limits.
#[derive(Clone, Debug)]
pub struct SandboxConfig {
    /// Wall-clock bound of a single program run.
    pub timeout: Duration,
    /// Fuel (roughly wasm instructions) granted to a single run.
    pub max_fuel: u64,
    /// Maximum number of compiled programs kept in cache.
    pub cache_max: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        SandboxConfig {
            timeout: Duration::from_millis(30_000),
            max_fuel: 10_000_000_000,
            cache_max: 16,
        }
    }
}

/// Cached module.
/// When the cache is full the entry with the smaller `last_used` tick is
/// evicted.
struct CachedModule {
    module: Module,
    last_used: u64,
}

#[derive(Default)]
struct ModuleCache {
    modules: HashMap<Hash, CachedModule>,
    /// Monotonic usage counter.
    tick: u64,
}

/// Background thread advancing the engine epoch.
/// Dropping it stops and joins the thread.
struct EpochTicker {
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl EpochTicker {
    fn start(engine: Engine) -> Self {
        let (stop_tx, stop_rx) = simple_channel::<()>();
        let handle = thread::spawn(move || {
            while let Err(ChannelError::RecvTimeout) = stop_rx.recv_timeout_sync(EPOCH_SLICE) {
                engine.increment_epoch();
            }
        });
        EpochTicker {
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for EpochTicker {
    fn drop(&mut self) {
        drop(self.stop.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("sandbox epoch ticker panicked");
            }
        }
    }
}

/// Number of epoch ticks covering the given timeout.
fn deadline_ticks(timeout: Duration) -> u64 {
    let slice = EPOCH_SLICE.as_millis();
    let ticks = (timeout.as_millis() + slice - 1) / slice;
    ticks.max(1) as u64
}

/// Sandbox running WebAssembly programs.
pub struct WasmSandbox<L: Loader> {
    config: SandboxConfig,
    /// Global wasmtime context for compilation and management of wasm modules.
    engine: Engine,
    /// Program fetcher.
    loader: L,
    /// Compiled programs. The lock is held only while looking up or
    /// compiling a module, never during a run.
    cache: Mutex<ModuleCache>,
    _ticker: EpochTicker,
}

impl<L: Loader> WasmSandbox<L> {
    pub fn new(config: SandboxConfig, loader: L) -> Result<Self> {
        if config.cache_max == 0 {
            return Err(Error::new_ext(
                ErrorKind::MalformedData,
                "sandbox cache size shall be greater than 0",
            ));
        }
        let mut wasm_config = Config::default();
        wasm_config.consume_fuel(true);
        wasm_config.epoch_interruption(true);
        let engine =
            Engine::new(&wasm_config).map_err(|err| Error::new_ext(ErrorKind::SandboxFault, err))?;
        let ticker = EpochTicker::start(engine.clone());
        Ok(WasmSandbox {
            config,
            engine,
            loader,
            cache: Mutex::new(ModuleCache::default()),
            _ticker: ticker,
        })
    }

    /// Get the compiled module for the given program, compiling and caching it
    /// if required.
    fn get_module(&self, cache: &mut ModuleCache, bin: &[u8]) -> Result<Module> {
        let target = Hash::from_data(HashAlgorithm::Sha256, bin);
        cache.tick += 1;
        let tick = cache.tick;
        if let Some(entry) = cache.modules.get_mut(&target) {
            entry.last_used = tick;
            return Ok(entry.module.clone());
        }

        let module = Module::new(&self.engine, bin)
            .map_err(|err| Error::new_ext(ErrorKind::ProgramFault, err.to_string()))?;

        if cache.modules.len() >= self.config.cache_max {
            let older = cache
                .modules
                .iter()
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(hash, _)| *hash);
            if let Some(hash) = older {
                debug!("evicting program {}", hex::encode(hash));
                cache.modules.remove(&hash);
            }
        }
        cache.modules.insert(
            target,
            CachedModule {
                module: module.clone(),
                last_used: tick,
            },
        );
        Ok(module)
    }

    /// Runs the program entry point within the configured fuel and
    /// wall-clock bounds.
    fn exec(&self, module: &Module, params: &[u8]) -> Result<Vec<u8>> {
        let mut store = Store::new(&self.engine, ());
        store
            .add_fuel(self.config.max_fuel)
            .map_err(|err| Error::new_ext(ErrorKind::SandboxFault, err))?;
        store.set_epoch_deadline(deadline_ticks(self.config.timeout));

        let instance = Instance::new(&mut store, module, &[])
            .map_err(|err| Error::new_ext(ErrorKind::ProgramFault, err.to_string()))?;
        let mem = instance
            .get_memory(&mut store, "memory")
            .ok_or_else(|| Error::new_ext(ErrorKind::ProgramFault, "wasm `memory` not found"))?;
        let alloc: TypedFunc<i32, i32> = instance
            .get_typed_func(&mut store, "alloc")
            .map_err(|_| Error::new_ext(ErrorKind::ProgramFault, "wasm `alloc` not found"))?;
        let run: TypedFunc<(i32, i32), u64> = instance
            .get_typed_func(&mut store, "run")
            .map_err(|_| Error::new_ext(ErrorKind::ProgramFault, "wasm `run` not found"))?;

        let offset = write_mem(&mut store, &alloc, &mem, params)?;
        let wslice = run
            .call(&mut store, (offset, params.len() as i32))
            .map_err(map_trap)?;

        let (offset, length) = wslice_split(wslice);
        let buf = mem
            .data(&store)
            .get(offset..offset + length)
            .ok_or_else(|| Error::new_ext(ErrorKind::ProgramFault, "out of bounds memory access"))?;

        match rmp_deserialize::<AppOutput>(buf) {
            Ok(out) if out.success => Ok(out.data.to_owned()),
            Ok(out) => Err(Error::new_ext(
                ErrorKind::ProgramFault,
                String::from_utf8_lossy(out.data).to_string(),
            )),
            Err(err) => Err(Error::new_ext(ErrorKind::ProgramFault, err)),
        }
    }
}

/// Allocate and write the data in the wasm memory.
fn write_mem(
    store: &mut Store<()>,
    alloc: &TypedFunc<i32, i32>,
    mem: &Memory,
    data: &[u8],
) -> Result<i32> {
    let offset = alloc.call(&mut *store, data.len() as i32).map_err(map_trap)?;
    mem.write(store, offset as usize, data).map_err(|err| {
        error!("writing data in wasm memory at address {} ({})", offset, err);
        Error::new_ext(ErrorKind::ProgramFault, err)
    })?;
    Ok(offset)
}

fn map_trap(err: wasmtime::Error) -> Error {
    match err.downcast_ref::<Trap>() {
        Some(Trap::Interrupt) => Error::new_ext(ErrorKind::Timeout, "program deadline exceeded"),
        Some(Trap::OutOfFuel) => Error::new_ext(ErrorKind::ProgramFault, "out of fuel"),
        Some(trap) => Error::new_ext(ErrorKind::ProgramFault, trap.to_string()),
        None => Error::new_ext(ErrorKind::SandboxFault, err.to_string()),
    }
}

impl<L: Loader> Sandbox for WasmSandbox<L> {
    fn run(&self, uri: &str, params: &[u8]) -> Result<Vec<u8>> {
        let bin = (self.loader)(uri)?;
        let module = {
            let mut cache = self.cache.lock();
            self.get_module(&mut cache, &bin)?
        };
        self.exec(&module, params)
    }
}

/// Default program loader: `file://` URIs are read from disk, anything else
/// is fetched over HTTP.
#[cfg(feature = "http")]
pub fn default_loader(timeout: Duration) -> Result<impl Loader> {
    use isahc::ReadResponseExt;

    let client = crate::external::http::client(timeout)?;
    Ok(move |uri: &str| -> Result<Vec<u8>> {
        if let Some(path) = uri.strip_prefix("file://") {
            return std::fs::read(path)
                .map_err(|err| Error::new_ext(ErrorKind::ResourceNotFound, err));
        }
        let mut response = client.get(uri).map_err(crate::external::http::map_err)?;
        if !response.status().is_success() {
            return Err(Error::new_ext(
                ErrorKind::ResourceNotFound,
                format!("GET {}: {}", uri, response.status()),
            ));
        }
        let mut buf = vec![];
        response
            .copy_to(&mut buf)
            .map_err(|err| Error::new_ext(ErrorKind::BadNetwork, err))?;
        Ok(buf)
    })
}
