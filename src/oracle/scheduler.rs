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

//! Periodic, non-reentrant task runner.
//!
//! Each loop owns its in-flight flag: a tick requested while the previous
//! one is still running is skipped.

use crate::{
    channel::{RequestReceiver, Sender},
    Error,
};
use async_std::task;
use futures::{future, prelude::*};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Duration,
};

/// Unit of periodic work.
pub trait Task: Send + Sync + 'static {
    /// Name used in the logs.
    fn name(&self) -> &str;

    /// Run one tick. Errors abort the tick only, the loop keeps going.
    fn tick(&self) -> crate::Result<()>;
}

/// Loop control messages.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum Control {
    /// Terminate the loop. A tick in progress completes in background.
    Stop,
    /// Tick now, without waiting for the period to elapse.
    Tick,
}

/// Reply to a forced tick.
#[derive(Debug, PartialEq, Clone)]
pub enum TickOutcome {
    Done,
    Failed(Error),
    /// Previous tick still running.
    Skipped,
}

pub type ControlReceiver = RequestReceiver<Control, TickOutcome>;

pub struct TaskWorker<T: Task> {
    task: Arc<T>,
    period: Duration,
    /// In-flight flag.
    running: Arc<AtomicBool>,
    rx_chan: ControlReceiver,
}

impl<T: Task> TaskWorker<T> {
    pub fn new(task: T, period: Duration, rx_chan: ControlReceiver) -> Self {
        TaskWorker {
            task: Arc::new(task),
            period,
            running: Arc::new(AtomicBool::new(false)),
            rx_chan,
        }
    }

    /// Shared reference to the wrapped task.
    pub fn task_arc(&self) -> Arc<T> {
        self.task.clone()
    }

    fn try_tick(&self, res_chan: Option<Sender<TickOutcome>>) {
        if self.running.swap(true, Ordering::Relaxed) {
            debug!("[{}] previous tick still running", self.task.name());
            if let Some(chan) = res_chan {
                task::spawn(async move { chan.send(TickOutcome::Skipped).await });
            }
            return;
        }

        let job = self.task.clone();
        let running = self.running.clone();
        task::spawn(async move {
            let name = job.name().to_owned();
            let res = task::spawn_blocking(move || job.tick()).await;
            running.store(false, Ordering::Relaxed);
            let outcome = match res {
                Ok(()) => TickOutcome::Done,
                Err(err) => {
                    match err.is_transient() {
                        true => warn!("[{}] tick abandoned: {}", name, err.to_string_full()),
                        false => error!("[{}] tick failed: {}", name, err.to_string_full()),
                    }
                    TickOutcome::Failed(err)
                }
            };
            if let Some(chan) = res_chan {
                if chan.send(outcome).await.is_err() {
                    debug!("[{}] tick outcome not collected", name);
                }
            }
        });
    }

    /// Loop asynchronous task.
    /// This can be stopped by submitting a `Stop` message to its input channel.
    pub async fn run(&mut self) {
        let period = self.period;
        let mut sleep = Box::pin(task::sleep(period));

        let future = future::poll_fn(move |cx: &mut Context<'_>| -> Poll<()> {
            while sleep.poll_unpin(cx).is_ready() {
                self.try_tick(None);
                sleep = Box::pin(task::sleep(period));
            }

            loop {
                match self.rx_chan.poll_next_unpin(cx) {
                    Poll::Ready(Some((Control::Stop, _))) => return Poll::Ready(()),
                    Poll::Ready(Some((Control::Tick, res_chan))) => self.try_tick(Some(res_chan)),
                    Poll::Ready(None) => return Poll::Ready(()),
                    Poll::Pending => break,
                }
            }
            Poll::Pending
        });

        future.await
    }

    /// Loop synchronous task.
    pub fn run_sync(&mut self) {
        task::block_on(self.run());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        channel::{confirmed_channel, RequestSender},
        ErrorKind,
    };
    use std::sync::atomic::AtomicUsize;

    /// Task counting its ticks, optionally blocking until released.
    pub struct CountingTask {
        pub ticks: Arc<AtomicUsize>,
        pub hold: Option<Duration>,
        pub fail: bool,
    }

    impl CountingTask {
        pub fn new() -> Self {
            CountingTask {
                ticks: Arc::new(AtomicUsize::new(0)),
                hold: None,
                fail: false,
            }
        }
    }

    impl Task for CountingTask {
        fn name(&self) -> &str {
            "counter"
        }

        fn tick(&self) -> crate::Result<()> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            if let Some(hold) = self.hold {
                std::thread::sleep(hold);
            }
            match self.fail {
                true => Err(ErrorKind::DatabaseFault.into()),
                false => Ok(()),
            }
        }
    }

    fn spawn_worker(task: CountingTask, period: Duration) -> RequestSender<Control, TickOutcome> {
        let (tx_chan, rx_chan) = confirmed_channel();
        let mut worker = TaskWorker::new(task, period, rx_chan);
        std::thread::spawn(move || worker.run_sync());
        tx_chan
    }

    #[test]
    fn forced_tick() {
        let task = CountingTask::new();
        let ticks = task.ticks.clone();
        let tx_chan = spawn_worker(task, Duration::from_secs(3600));

        let outcome = tx_chan
            .send_sync(Control::Tick)
            .unwrap()
            .recv_sync()
            .unwrap();

        assert_eq!(outcome, TickOutcome::Done);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_tick_keeps_loop_alive() {
        let mut task = CountingTask::new();
        task.fail = true;
        let tx_chan = spawn_worker(task, Duration::from_secs(3600));

        let first = tx_chan.send_sync(Control::Tick).unwrap().recv_sync().unwrap();
        let second = tx_chan.send_sync(Control::Tick).unwrap().recv_sync().unwrap();

        assert_eq!(first, TickOutcome::Failed(ErrorKind::DatabaseFault.into()));
        assert_eq!(second, first);
    }

    #[test]
    fn overlapping_tick_skipped() {
        let mut task = CountingTask::new();
        task.hold = Some(Duration::from_millis(500));
        let ticks = task.ticks.clone();
        let tx_chan = spawn_worker(task, Duration::from_secs(3600));

        let first = tx_chan.send_sync(Control::Tick).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        let second = tx_chan.send_sync(Control::Tick).unwrap();

        assert_eq!(second.recv_sync().unwrap(), TickOutcome::Skipped);
        assert_eq!(first.recv_sync().unwrap(), TickOutcome::Done);
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn periodic_ticks() {
        let task = CountingTask::new();
        let ticks = task.ticks.clone();
        let tx_chan = spawn_worker(task, Duration::from_millis(50));

        std::thread::sleep(Duration::from_millis(500));
        tx_chan.send_sync(Control::Stop).unwrap();

        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }
}
