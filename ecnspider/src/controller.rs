// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The task that flips the kernel ECN mode in lockstep with the workers.

use crate::{
    ecn::{EcnCtl, Mode},
    sync::{Acquire, SemaphoreN},
    Result,
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::debug;

/// The four semaphores sequencing the connect phases.
///
/// Per cycle the controller releases `workers` tokens on each of `ecn_off`
/// and `ecn_on` and collects `workers` tokens from each of `ecn_on_rdy` and
/// `ecn_off_rdy`; every worker acquires and releases exactly one token on
/// each, whether or not it had a job that round. All four are bounded to
/// the worker count and start drained.
#[derive(Debug)]
pub struct Phases {
    /// Controller → workers: the mode is now "never", connect away.
    pub ecn_off: SemaphoreN,
    /// Controller → workers: the mode is now "always", connect away.
    pub ecn_on: SemaphoreN,
    /// Workers → controller: my ECN-off connect is done, flipping is safe.
    pub ecn_on_rdy: SemaphoreN,
    /// Workers → controller: my ECN-on connect is done, flipping is safe.
    pub ecn_off_rdy: SemaphoreN,
}

impl Phases {
    pub fn new(workers: usize) -> Self {
        Self {
            ecn_off: SemaphoreN::new(workers),
            ecn_on: SemaphoreN::new(workers),
            ecn_on_rdy: SemaphoreN::new(workers),
            ecn_off_rdy: SemaphoreN::new(workers),
        }
    }

    /// Wakes every party still parked on a phase. Called once the run flag
    /// is down; any acquire from here on observes [`Acquire::Closed`].
    pub fn close(&self) {
        self.ecn_off.close();
        self.ecn_on.close();
        self.ecn_on_rdy.close();
        self.ecn_off_rdy.close();
    }
}

/// Drives the kernel setting between "never" and "always" so that every
/// worker's ECN-off connect happens in the former state and every ECN-on
/// connect in the latter. The controller is the only writer of the setting
/// for the whole run.
pub(crate) async fn run(
    ecn: Arc<dyn EcnCtl>,
    phases: Arc<Phases>,
    workers: usize,
    running: Arc<AtomicBool>,
) -> Result<()> {
    while running.load(Ordering::Relaxed) {
        ecn.set(Mode::Never)?;
        debug!("ECN off connects from here onwards");
        phases.ecn_off.release_n(workers)?;
        if phases.ecn_on_rdy.acquire_n(workers).await == Acquire::Closed {
            debug!("controller task ending");
            return Ok(());
        }

        ecn.set(Mode::Always)?;
        debug!("ECN on connects from here onwards");
        phases.ecn_on.release_n(workers)?;
        if phases.ecn_off_rdy.acquire_n(workers).await == Acquire::Closed {
            debug!("controller task ending");
            return Ok(());
        }
    }

    // Top up both connect phases so workers still parked in one can run
    // through to their own flag check and exit.
    let _ = phases.ecn_off.release_n(workers);
    let _ = phases.ecn_on.release_n(workers);

    debug!("controller task ending");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ecn, testing::FakeEcn};

    /// Stands in for one worker's phase participation without any sockets.
    async fn handshake(phases: &Phases) {
        assert_eq!(phases.ecn_off.acquire_n(1).await, Acquire::Acquired);
        phases.ecn_on_rdy.release_n(1).unwrap();
        assert_eq!(phases.ecn_on.acquire_n(1).await, Acquire::Acquired);
        phases.ecn_off_rdy.release_n(1).unwrap();
    }

    #[tokio::test]
    async fn flips_alternate_and_bracket_the_phases() {
        let workers = 3;
        let fake = Arc::new(FakeEcn::new(ecn::Mode::OnDemand));
        let phases = Arc::new(Phases::new(workers));
        let running = Arc::new(AtomicBool::new(true));

        let controller = tokio::spawn(run(
            fake.clone() as Arc<dyn EcnCtl>,
            phases.clone(),
            workers,
            running.clone(),
        ));

        for _ in 0..5 {
            let mut round = Vec::new();
            for _ in 0..workers {
                let phases = phases.clone();
                round.push(tokio::spawn(async move { handshake(&phases).await }));
            }
            for task in round {
                task.await.unwrap();
            }
        }

        running.store(false, Ordering::Relaxed);
        phases.close();
        controller.await.unwrap().unwrap();

        let modes: Vec<_> = fake.flips().into_iter().map(|(mode, _)| mode).collect();
        assert!(modes.len() >= 10);
        for pair in modes.chunks(2) {
            assert_eq!(pair[0], Mode::Never);
            if pair.len() == 2 {
                assert_eq!(pair[1], Mode::Always);
            }
        }
        let never = modes.iter().filter(|m| **m == Mode::Never).count() as i64;
        let always = modes.iter().filter(|m| **m == Mode::Always).count() as i64;
        assert!((never - always).abs() <= 1);
    }

    #[tokio::test]
    async fn close_unblocks_a_waiting_controller() {
        let workers = 2;
        let fake = Arc::new(FakeEcn::new(ecn::Mode::OnDemand));
        let phases = Arc::new(Phases::new(workers));
        let running = Arc::new(AtomicBool::new(true));

        let controller = tokio::spawn(run(
            fake.clone() as Arc<dyn EcnCtl>,
            phases.clone(),
            workers,
            running.clone(),
        ));

        // the controller is now parked waiting for ecn_on_rdy tokens that
        // will never arrive
        tokio::task::yield_now().await;
        running.store(false, Ordering::Relaxed);
        phases.close();

        controller.await.unwrap().unwrap();
    }
}
