// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
    time::{Duration, SystemTime},
};

/// A counter shared between tasks.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn incr(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// Exact percentiles over a continually growing set of samples.
///
/// Samples are kept sorted on insert, so reads are just an index into the
/// slice. Fine for the sample counts a crawl produces; not meant for
/// unbounded streams.
#[derive(Debug, Default)]
pub struct Percentiles {
    samples: Mutex<Vec<Duration>>,
}

impl Percentiles {
    pub fn record(&self, sample: Duration) {
        let mut samples = self.samples.lock().unwrap();
        let at = samples.partition_point(|s| *s < sample);
        samples.insert(at, sample);
    }

    /// The floor-indexed `p`th percentile, always one of the recorded
    /// samples. `None` until the first sample arrives.
    pub fn percentile(&self, p: u8) -> Option<Duration> {
        debug_assert!(p <= 100, "p is not a valid percentage");
        let samples = self.samples.lock().unwrap();
        if samples.is_empty() {
            return None;
        }
        let index = (samples.len() - 1) * p as usize / 100;
        Some(samples[index])
    }

    pub fn len(&self) -> usize {
        self.samples.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fractional seconds since the UNIX epoch, the timestamp format of every
/// output-row time field.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}
