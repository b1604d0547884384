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

//! Oracle core: eligibility sampling, worker node loop, aggregator loop and
//! request intake.

pub mod aggregator;
pub mod eligibility;
pub mod intake;
pub mod ledger;
pub mod node;
pub mod scheduler;
pub mod service;

pub use aggregator::Aggregator;
pub use eligibility::Difficulty;
pub use intake::{Intake, RequestStatus, Submission};
pub use ledger::{CommitMarker, Publisher};
pub use node::NodeWorker;
pub use scheduler::{Control, Task, TickOutcome};
pub use service::TaskService;

/// Time source, milliseconds since the unix epoch.
pub trait Clock: Fn() -> u64 + Send + Sync + 'static {}

impl<T: Fn() -> u64 + Send + Sync + 'static> Clock for T {}
