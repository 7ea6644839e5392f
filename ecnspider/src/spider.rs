// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Wires the crawl together and sees it through to shutdown.

use crate::{
    controller::{self, Phases},
    ecn::{EcnCtl, Mode},
    input::{self, Job},
    output::RowWriter,
    probe::{self, Options},
    report,
    stats::{Counter, Percentiles},
    Result,
};
use crossbeam_queue::ArrayQueue;
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::sync::Notify;
use tracing::info;

pub const DEFAULT_WORKERS: usize = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Job queue capacity; a full queue is what throttles the filler.
pub const QUEUE_CAPACITY: usize = 100;

/// Runtime options for one crawl.
#[derive(Clone, Debug)]
pub struct Config {
    pub input: PathBuf,
    pub retry_output: PathBuf,
    pub output: PathBuf,
    pub workers: usize,
    pub timeout: Duration,
    /// Target port. Fixed at 80 for real crawls; configurable so tests can
    /// point workers at an unprivileged listener.
    pub port: u16,
    pub save_headers: bool,
    pub no_ipv6: bool,
    /// Probe at most this many input records; 0 means all of them.
    pub debug_count: u64,
    pub fast_fail: bool,
}

impl Config {
    pub fn new(
        input: impl Into<PathBuf>,
        retry_output: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input: input.into(),
            retry_output: retry_output.into(),
            output: output.into(),
            workers: DEFAULT_WORKERS,
            timeout: DEFAULT_TIMEOUT,
            port: 80,
            save_headers: false,
            no_ipv6: false,
            debug_count: 0,
            fast_fail: false,
        }
    }
}

/// State shared by every task of a crawl.
pub(crate) struct Shared {
    pub(crate) queue: ArrayQueue<Job>,
    pub(crate) phases: Arc<Phases>,
    pub(crate) run: Arc<AtomicBool>,
    pub(crate) enqueued: Counter,
    pub(crate) completed: Counter,
    pub(crate) retries: Counter,
    pub(crate) intervals: Percentiles,
    pub(crate) output: RowWriter,
    pub(crate) retry_output: RowWriter,
    pub(crate) shutdown: Notify,
}

/// One crawl over one input file.
pub struct Spider {
    config: Config,
    ecn: Arc<dyn EcnCtl>,
}

impl Spider {
    pub fn new(config: Config, ecn: Arc<dyn EcnCtl>) -> Self {
        Self { config, ecn }
    }

    /// Runs the crawl to completion: feeds every job through the probe
    /// pipeline, drains the queue, winds every task down, and leaves the
    /// kernel ECN setting on "on_demand".
    pub async fn run(self) -> Result<()> {
        if self.config.workers == 0 {
            return Err("worker count must be positive".into());
        }
        if self.config.timeout.is_zero() {
            return Err("timeout must be positive".into());
        }

        let shared = Arc::new(Shared {
            queue: ArrayQueue::new(QUEUE_CAPACITY),
            phases: Arc::new(Phases::new(self.config.workers)),
            run: Arc::new(AtomicBool::new(true)),
            enqueued: Counter::default(),
            completed: Counter::default(),
            retries: Counter::default(),
            intervals: Percentiles::default(),
            output: RowWriter::create(&self.config.output)?,
            retry_output: RowWriter::create(&self.config.retry_output)?,
            shutdown: Notify::new(),
        });
        let started = Instant::now();

        info!(
            workers = self.config.workers,
            timeout = ?self.config.timeout,
            "starting crawl of {}",
            self.config.input.display()
        );

        let reporter = tokio::spawn(report::run(shared.clone(), started));

        let filler = {
            let shared = shared.clone();
            let path = self.config.input.clone();
            let no_ipv6 = self.config.no_ipv6;
            let debug_count = self.config.debug_count;
            tokio::spawn(async move {
                input::fill(&path, &shared.queue, &shared.enqueued, no_ipv6, debug_count).await
            })
        };

        let controller = tokio::spawn(controller::run(
            self.ecn.clone(),
            shared.phases.clone(),
            self.config.workers,
            shared.run.clone(),
        ));

        let options = Options {
            timeout: self.config.timeout,
            port: self.config.port,
            fast_fail: self.config.fast_fail,
            save_headers: self.config.save_headers,
        };
        let mut workers = Vec::new();
        for index in 0..self.config.workers {
            workers.push(tokio::spawn(probe::worker(index, shared.clone(), options)));
        }

        // the input running out is the shutdown signal; a filler error just
        // ends the feed early, everything already enqueued still gets probed
        let fill_result = filler.await?;

        // wait for the queue to drain and every dequeued job to be
        // acknowledged; bail out early if the controller or a worker died,
        // since the pipeline cannot finish without them
        while shared.completed.value() < shared.enqueued.value() {
            if controller.is_finished() || workers.iter().any(|w| w.is_finished()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        shared.run.store(false, Ordering::Relaxed);
        shared.shutdown.notify_waiters();
        shared.phases.close();

        let controller_result = controller.await?;
        for worker in workers {
            worker.await??;
        }
        reporter.await?;

        // put the kernel back on the default even when the run is failing
        let restored = self.ecn.set(Mode::OnDemand);

        controller_result?;
        fill_result?;
        restored?;

        info!(
            completed = shared.completed.value(),
            retries = shared.retries.value(),
            "crawl finished in {:?}",
            started.elapsed()
        );

        Ok(())
    }
}
