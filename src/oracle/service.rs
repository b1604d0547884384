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

//! Thread hosting a periodic loop.

use crate::{
    channel::{confirmed_channel, RequestSender},
    oracle::scheduler::{Control, Task, TaskWorker, TickOutcome},
    Error, ErrorKind, Result,
};
use std::{
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

/// Periodic loop service data.
pub struct TaskService<T: Task> {
    /// Worker object, present while the service is stopped.
    worker: Option<TaskWorker<T>>,
    /// Worker thread handler.
    handler: Option<JoinHandle<TaskWorker<T>>>,
    /// To send control messages to the worker.
    tx_chan: RequestSender<Control, TickOutcome>,
    /// Shared reference to the task.
    task: Arc<T>,
    /// To check if the worker thread is still alive.
    canary: Arc<()>,
}

impl<T: Task> TaskService<T> {
    pub fn new(task: T, period: Duration) -> Self {
        let (tx_chan, rx_chan) = confirmed_channel();
        let worker = TaskWorker::new(task, period, rx_chan);
        let task = worker.task_arc();
        TaskService {
            worker: Some(worker),
            handler: None,
            tx_chan,
            task,
            canary: Arc::new(()),
        }
    }

    /// Start the loop thread.
    pub fn start(&mut self) {
        debug!("Starting {} service", self.task.name());
        let mut worker = match self.worker.take() {
            Some(worker) => worker,
            None => {
                warn!("service was already running");
                return;
            }
        };

        let mut canary = Arc::clone(&self.canary);
        let handle = thread::spawn(move || {
            let _ = Arc::get_mut(&mut canary);
            worker.run_sync();
            worker
        });
        self.handler = Some(handle);
    }

    /// Stop the loop thread.
    pub fn stop(&mut self) {
        debug!("Stopping {} service", self.task.name());
        match self.handler.take() {
            Some(handle) => {
                if let Err(err) = self.tx_chan.send_sync(Control::Stop) {
                    error!("Error stopping {} service thread: {}", self.task.name(), err);
                }
                match handle.join() {
                    Ok(worker) => self.worker = Some(worker),
                    Err(_) => error!("{} service thread panicked", self.task.name()),
                }
            }
            None => {
                debug!("service was not running");
            }
        };
    }

    /// Check if service is running.
    pub fn is_running(&self) -> bool {
        // Hack to intercept crashed subthreads.
        Arc::strong_count(&self.canary) == 2 && self.worker.is_none()
    }

    /// Request an immediate tick and wait for its outcome.
    pub fn tick_sync(&self) -> Result<TickOutcome> {
        if !self.is_running() {
            return Err(Error::new_ext(ErrorKind::Other, "service not running"));
        }
        self.tx_chan
            .send_sync(Control::Tick)
            .and_then(|res_chan| res_chan.recv_sync())
            .map_err(|err| Error::new_ext(ErrorKind::Other, err))
    }

    /// Shared reference to the task.
    pub fn task(&self) -> Arc<T> {
        self.task.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::scheduler::tests::CountingTask;
    use std::sync::atomic::Ordering;

    fn create_service() -> TaskService<CountingTask> {
        TaskService::new(CountingTask::new(), Duration::from_secs(3600))
    }

    #[test]
    fn start_stop() {
        let mut svc = create_service();

        svc.start();
        assert!(svc.is_running());

        svc.stop();
        assert!(!svc.is_running());
    }

    #[test]
    fn stopped_subthread() {
        let mut svc = create_service();

        svc.start();
        assert!(svc.is_running());

        svc.tx_chan.send_sync(Control::Stop).unwrap();
        std::thread::sleep(Duration::from_secs(1));

        assert!(!svc.is_running());
    }

    #[test]
    fn tick_running_service() {
        let mut svc = create_service();
        svc.start();

        let outcome = svc.tick_sync().unwrap();

        assert_eq!(outcome, TickOutcome::Done);
        assert_eq!(svc.task().ticks.load(Ordering::SeqCst), 1);
        svc.stop();
    }

    #[test]
    fn tick_stopped_service() {
        let svc = create_service();

        assert!(svc.tick_sync().is_err());
    }

    #[test]
    fn restart() {
        let mut svc = create_service();
        svc.start();
        svc.stop();

        svc.start();

        assert!(svc.is_running());
        assert_eq!(svc.tick_sync().unwrap(), TickOutcome::Done);
        svc.stop();
    }
}
