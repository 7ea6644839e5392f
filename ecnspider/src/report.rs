// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Periodic progress line for long crawls.

use crate::spider::Shared;
use std::{
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};
use tracing::{debug, info};

/// The report interval starts here and doubles every tick.
const INITIAL_PERIOD: Duration = Duration::from_secs(1);
/// Cap on the report interval.
const MAX_PERIOD: Duration = Duration::from_secs(120);

/// Logs queue depth, throughput, and retry totals on an exponentially
/// stretching schedule. The wait is cancellable so a parked reporter never
/// delays shutdown.
pub(crate) async fn run(shared: Arc<Shared>, started: Instant) {
    let mut period = INITIAL_PERIOD;
    let mut last_tick = started;
    let mut last_completed = 0u64;

    while shared.run.load(Ordering::Relaxed) {
        tokio::select! {
            _ = tokio::time::sleep(period) => {}
            _ = shared.shutdown.notified() => break,
        }
        period = (period * 2).min(MAX_PERIOD);

        let queue_length = shared.queue.len();
        let utilization = queue_length as f64 / shared.queue.capacity() as f64 * 100.0;
        let completed = shared.completed.value();
        let retries = shared.retries.value();
        let median = shared
            .intervals
            .percentile(50)
            .map(|m| m.as_secs_f64())
            .unwrap_or(-1.0);

        let now = Instant::now();
        let current_rate = (completed - last_completed) as f64 / (now - last_tick).as_secs_f64();
        let average_rate = completed as f64 / (now - started).as_secs_f64();
        last_tick = now;
        last_completed = completed;

        info!(
            "queue: {:4} ({:5.1}%), done: {:6}, med. job interval: {:5.2}s, \
             rate: {:6.2} Hz now, {:6.2} Hz avg, runtime: {:?}, scheduled retries: {}",
            queue_length,
            utilization,
            completed,
            median,
            current_rate,
            average_rate,
            now - started,
            retries
        );
    }

    debug!("reporter task ending");
}
