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

//! Oracle node executable.
//!
//! Hosts the request intake, the aggregator and one or more worker nodes in
//! a single process sharing the same store.

use clap::Parser;
use log::{error, info, LevelFilter};
use std::{path::PathBuf, sync::Arc, thread, time::Duration};
use trinci_oracle::{
    base::RwLock,
    config::{self, OracleConfig},
    db::RocksStore,
    external::{HttpEpochService, HttpVrfService},
    oracle::{Aggregator, CommitMarker, Difficulty, Intake, NodeWorker, TaskService},
    rest::{RestConfig, RestService},
    sandbox::{local::default_loader, SandboxConfig, WasmSandbox},
    Result,
};

#[derive(Parser, Debug)]
#[command(name = "trinci-oracle")]
#[command(about = "TRINCI Off-chain Computation Oracle", version)]
struct Cli {
    /// Node key files (PKCS#8 ECDSA or raw Ed25519), one worker per key.
    #[arg(short, long = "key", value_name = "FILE")]
    keys: Vec<PathBuf>,

    /// Workers with a freshly generated Ed25519 key.
    #[arg(long, default_value_t = 0)]
    nodes: usize,

    /// VRF service endpoints. Worker `i` uses endpoint `i % len`.
    #[arg(long = "vrf-url", env = "ORACLE_VRF_URL", default_value = config::DEFAULT_VRF_URL)]
    vrf_urls: Vec<String>,

    /// Epoch service endpoint.
    #[arg(long, env = "ORACLE_EPOCH_URL", default_value = config::DEFAULT_EPOCH_URL)]
    epoch_url: String,

    /// Distinct verified results required to commit a request.
    #[arg(long, default_value_t = 3)]
    quorum: usize,

    /// Loops period in milliseconds.
    #[arg(long, default_value_t = 10_000)]
    period: u64,

    /// Eligibility threshold, big-endian hex.
    #[arg(long)]
    difficulty: Option<String>,

    /// Program execution timeout in milliseconds.
    #[arg(long, default_value_t = 30_000)]
    exec_timeout: u64,

    /// Store directory.
    #[arg(long, env = "ORACLE_DB_PATH", default_value = config::DEFAULT_DB_PATH)]
    db_path: String,

    /// Intake listening address.
    #[arg(long, default_value = "127.0.0.1")]
    rest_addr: String,

    /// Intake listening port.
    #[arg(short, long, default_value_t = config::DEFAULT_REST_PORT)]
    port: u16,

    /// Do not serve the request intake.
    #[arg(long)]
    no_intake: bool,

    /// Do not run the aggregator loop.
    #[arg(long)]
    no_aggregator: bool,
}

impl Cli {
    fn oracle_config(&self) -> Result<OracleConfig> {
        let mut config = OracleConfig {
            quorum: self.quorum,
            period: Duration::from_millis(self.period),
            exec_timeout: Duration::from_millis(self.exec_timeout),
            epoch_url: self.epoch_url.clone(),
            rest_addr: self.rest_addr.clone(),
            rest_port: self.port,
            db_path: self.db_path.clone(),
            ..Default::default()
        };
        if let Some(vrf_url) = self.vrf_urls.first() {
            config.vrf_url = vrf_url.clone();
        }
        if let Some(difficulty) = &self.difficulty {
            config.difficulty = Difficulty::from_hex(difficulty)?;
        }
        config.validate()?;
        Ok(config)
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = cli.oracle_config()?;
    info!("TRINCI Oracle v{}", trinci_oracle::VERSION);
    info!("quorum: {}, difficulty: {}", config.quorum, config.difficulty);

    let store = Arc::new(RwLock::new(RocksStore::new(&config.db_path)?));
    let epoch = Arc::new(HttpEpochService::new(
        &config.epoch_url,
        config.call_timeout,
    )?);
    let sandbox_config = SandboxConfig {
        timeout: config.exec_timeout,
        max_fuel: config.max_fuel,
        cache_max: config.cache_max,
    };
    let sandbox = Arc::new(WasmSandbox::new(
        sandbox_config,
        default_loader(config.call_timeout)?,
    )?);

    let mut keypairs = vec![];
    for path in &cli.keys {
        keypairs.push(config::load_keypair(Some(path))?);
    }
    for _ in 0..cli.nodes {
        keypairs.push(config::load_keypair(None)?);
    }

    let mut nodes = vec![];
    for (i, keypair) in keypairs.into_iter().enumerate() {
        let vrf_url = match cli.vrf_urls.is_empty() {
            true => &config.vrf_url,
            false => &cli.vrf_urls[i % cli.vrf_urls.len()],
        };
        let vrf = Arc::new(HttpVrfService::new(vrf_url, config.call_timeout)?);
        let worker = NodeWorker::register(
            Arc::new(keypair),
            config.difficulty,
            store.clone(),
            epoch.clone(),
            vrf,
            sandbox.clone(),
        )?;
        let mut svc = TaskService::new(worker, config.period);
        svc.start();
        nodes.push(svc);
    }

    let mut aggregator = match cli.no_aggregator {
        true => None,
        false => {
            let vrf = Arc::new(HttpVrfService::new(&config.vrf_url, config.call_timeout)?);
            let aggregator = Aggregator::new(
                config.quorum,
                config.difficulty,
                store.clone(),
                epoch.clone(),
                vrf,
                Arc::new(CommitMarker::default()),
            )
            .with_grace(config.exec_timeout);
            let mut svc = TaskService::new(aggregator, config.period);
            svc.start();
            Some(svc)
        }
    };

    let mut rest = match cli.no_intake {
        true => None,
        false => {
            let rest_config = RestConfig {
                addr: config.rest_addr.clone(),
                port: config.rest_port,
            };
            let mut svc = RestService::new(rest_config, Intake::new(store, epoch));
            svc.start();
            info!("intake listening on {}:{}", config.rest_addr, config.rest_port);
            Some(svc)
        }
    };

    loop {
        thread::sleep(Duration::from_secs(1));
        if nodes.iter().any(|svc| !svc.is_running()) {
            error!("worker node service is not running");
            break;
        }
        if matches!(&aggregator, Some(svc) if !svc.is_running()) {
            error!("aggregator service is not running");
            break;
        }
        if matches!(&rest, Some(svc) if !svc.is_running()) {
            error!("intake service is not running");
            break;
        }
    }

    nodes.iter_mut().for_each(|svc| svc.stop());
    if let Some(svc) = aggregator.as_mut() {
        svc.stop();
    }
    if let Some(svc) = rest.as_mut() {
        svc.stop();
    }
    Ok(())
}

fn main() {
    env_logger::Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        error!("{}", err.to_string_full());
        std::process::exit(1);
    }
}
