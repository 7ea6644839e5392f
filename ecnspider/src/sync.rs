// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::Semaphore;

/// Outcome of an acquire against a [`SemaphoreN`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    Acquired,
    /// The semaphore was closed while waiting; the caller should wind down.
    Closed,
}

/// A counting semaphore bounded to a fixed number of tokens, with batch
/// acquire/release operations.
///
/// The semaphore starts out drained: every token has to be released into it
/// before it can be acquired. Releasing more tokens than the bound allows is
/// an error, which turns token-accounting bugs between the controller and
/// the workers into a loud failure instead of a silent drift.
#[derive(Debug)]
pub struct SemaphoreN {
    sem: Semaphore,
    bound: usize,
}

impl SemaphoreN {
    /// Creates a semaphore bounded to `bound` tokens with none available.
    pub fn new(bound: usize) -> Self {
        let this = Self {
            sem: Semaphore::new(bound),
            bound,
        };
        this.drain();
        this
    }

    /// Acquires `tokens` tokens, one at a time, waiting for each.
    pub async fn acquire_n(&self, tokens: usize) -> Acquire {
        for _ in 0..tokens {
            match self.sem.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Acquire::Closed,
            }
        }
        Acquire::Acquired
    }

    /// Releases `tokens` tokens, one at a time.
    ///
    /// Errors when a release would push the available count past the bound.
    pub fn release_n(&self, tokens: usize) -> crate::Result<()> {
        for _ in 0..tokens {
            if self.sem.available_permits() >= self.bound {
                return Err(format!(
                    "semaphore released past its bound of {} tokens",
                    self.bound
                )
                .into());
            }
            self.sem.add_permits(1);
        }
        Ok(())
    }

    /// Consumes every currently available token without waiting and returns
    /// how many were taken.
    pub fn drain(&self) -> usize {
        let mut drained = 0;
        while let Ok(permit) = self.sem.try_acquire() {
            permit.forget();
            drained += 1;
        }
        drained
    }

    /// Wakes every pending and future [`acquire_n`](Self::acquire_n) with
    /// [`Acquire::Closed`].
    pub fn close(&self) {
        self.sem.close();
    }

    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn starts_drained() {
        let sem = SemaphoreN::new(4);
        assert_eq!(sem.available(), 0);
        assert_eq!(sem.drain(), 0);
    }

    #[tokio::test]
    async fn release_then_acquire() {
        let sem = SemaphoreN::new(4);
        sem.release_n(3).unwrap();
        assert_eq!(sem.available(), 3);
        assert_eq!(sem.acquire_n(3).await, Acquire::Acquired);
        assert_eq!(sem.available(), 0);
    }

    #[tokio::test]
    async fn release_past_bound_errors() {
        let sem = SemaphoreN::new(2);
        sem.release_n(2).unwrap();
        assert!(sem.release_n(1).is_err());
    }

    #[tokio::test]
    async fn drain_takes_everything() {
        let sem = SemaphoreN::new(5);
        sem.release_n(5).unwrap();
        assert_eq!(sem.drain(), 5);
        assert_eq!(sem.available(), 0);
        // the drained tokens can be released again
        sem.release_n(5).unwrap();
    }

    #[tokio::test]
    async fn acquire_waits_for_release() {
        let sem = Arc::new(SemaphoreN::new(2));
        let waiter = sem.clone();
        let task = tokio::spawn(async move { waiter.acquire_n(2).await });

        tokio::task::yield_now().await;
        sem.release_n(2).unwrap();

        assert_eq!(task.await.unwrap(), Acquire::Acquired);
    }

    #[tokio::test]
    async fn close_wakes_pending_acquire() {
        let sem = Arc::new(SemaphoreN::new(1));
        let waiter = sem.clone();
        let task = tokio::spawn(async move { waiter.acquire_n(1).await });

        tokio::task::yield_now().await;
        sem.close();

        assert_eq!(task.await.unwrap(), Acquire::Closed);
    }
}
