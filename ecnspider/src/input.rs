// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The target list and the task that feeds it into the job queue.

use crate::{stats::Counter, Result};
use crossbeam_queue::ArrayQueue;
use serde::Deserialize;
use std::{path::Path, time::Duration};
use tracing::debug;

/// How long the filler backs off when the job queue is full. The queue
/// being full is the crawl's only backpressure mechanism.
const FULL_QUEUE_BACKOFF: Duration = Duration::from_millis(50);

/// One row of the input file: a ranked domain with its resolved addresses.
/// Either address may be empty.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Record {
    pub rank: u64,
    pub domain: String,
    pub ipv4: String,
    pub ipv6: String,
}

/// One probe target: a single literal address for a domain.
///
/// IPv6 addresses are bracket-wrapped so every later stage can tell the
/// address families apart without re-parsing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job {
    pub rank: u64,
    pub domain: String,
    pub ip: String,
}

impl Record {
    /// Expands the record into zero, one, or two jobs: one per populated
    /// address, minus IPv6 when `no_ipv6` is set.
    pub fn jobs(&self, no_ipv6: bool) -> Vec<Job> {
        let mut jobs = Vec::new();
        if !self.ipv4.is_empty() {
            jobs.push(Job {
                rank: self.rank,
                domain: self.domain.clone(),
                ip: self.ipv4.clone(),
            });
        }
        if !self.ipv6.is_empty() && !no_ipv6 {
            jobs.push(Job {
                rank: self.rank,
                domain: self.domain.clone(),
                ip: format!("[{}]", self.ipv6),
            });
        }
        jobs
    }
}

/// Streams the input file into the job queue.
///
/// Reads at most `debug_count` records when it is non-zero. Returning is
/// the signal that the crawl has no further work coming.
pub(crate) async fn fill(
    input: &Path,
    queue: &ArrayQueue<Job>,
    enqueued: &Counter,
    no_ipv6: bool,
    debug_count: u64,
) -> Result<()> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .from_path(input)?;

    let mut records = 0u64;
    for record in reader.deserialize() {
        let record: Record = record?;
        debug!(rank = record.rank, domain = %record.domain, "parsed record");

        let jobs = record.jobs(no_ipv6);
        if jobs.is_empty() {
            debug!(domain = %record.domain, "no address to probe, skipping");
        }
        for job in jobs {
            enqueue(queue, job).await;
            enqueued.incr();
        }

        records += 1;
        if debug_count != 0 && records >= debug_count {
            break;
        }
    }

    debug!("filler task ending");
    Ok(())
}

async fn enqueue(queue: &ArrayQueue<Job>, job: Job) {
    let mut job = job;
    loop {
        match queue.push(job) {
            Ok(()) => return,
            Err(bounced) => {
                job = bounced;
                tokio::time::sleep(FULL_QUEUE_BACKOFF).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn record(rank: u64, domain: &str, ipv4: &str, ipv6: &str) -> Record {
        Record {
            rank,
            domain: domain.to_string(),
            ipv4: ipv4.to_string(),
            ipv6: ipv6.to_string(),
        }
    }

    #[test]
    fn expands_both_families() {
        let jobs = record(5, "x.test", "10.0.0.1", "::1").jobs(false);
        assert_eq!(
            jobs,
            vec![
                Job {
                    rank: 5,
                    domain: "x.test".to_string(),
                    ip: "10.0.0.1".to_string(),
                },
                Job {
                    rank: 5,
                    domain: "x.test".to_string(),
                    ip: "[::1]".to_string(),
                },
            ]
        );
    }

    #[test]
    fn no_ipv6_drops_the_v6_job() {
        let jobs = record(5, "x.test", "10.0.0.1", "::1").jobs(true);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].ip, "10.0.0.1");

        let jobs = record(3, "c.test", "", "2001:db8::1").jobs(true);
        assert!(jobs.is_empty());
    }

    #[test]
    fn empty_addresses_produce_nothing() {
        assert!(record(1, "a.test", "", "").jobs(false).is_empty());
    }

    #[tokio::test]
    async fn fill_reads_and_caps() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, "1,a.test,192.0.2.1,").unwrap();
        writeln!(input, "2,b.test,,2001:db8::1").unwrap();
        writeln!(input, "3,c.test,,").unwrap();
        writeln!(input, "4,d.test,192.0.2.4,2001:db8::4").unwrap();
        input.flush().unwrap();

        let queue = ArrayQueue::new(16);
        let enqueued = Counter::default();
        fill(input.path(), &queue, &enqueued, false, 0)
            .await
            .unwrap();

        assert_eq!(enqueued.value(), 4);
        assert_eq!(queue.pop().unwrap().ip, "192.0.2.1");
        assert_eq!(queue.pop().unwrap().ip, "[2001:db8::1]");
        assert_eq!(queue.pop().unwrap().ip, "192.0.2.4");
        assert_eq!(queue.pop().unwrap().ip, "[2001:db8::4]");
        assert!(queue.pop().is_none());

        // a debug cap stops after the first record
        let queue = ArrayQueue::new(16);
        let enqueued = Counter::default();
        fill(input.path(), &queue, &enqueued, false, 1)
            .await
            .unwrap();
        assert_eq!(enqueued.value(), 1);
    }

    #[tokio::test]
    async fn fill_rejects_malformed_rows() {
        let mut input = tempfile::NamedTempFile::new().unwrap();
        writeln!(input, "not-a-rank,a.test,192.0.2.1,").unwrap();
        input.flush().unwrap();

        let queue = ArrayQueue::new(16);
        let enqueued = Counter::default();
        assert!(fill(input.path(), &queue, &enqueued, false, 0).await.is_err());
    }
}
