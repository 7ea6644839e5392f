// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Test doubles: a kernel ECN capability that only keeps notes, and a
//! canned HTTP peer.

use crate::{
    ecn::{EcnCtl, Mode},
    stats::unix_time,
    Result,
};
use std::{net::SocketAddr, sync::Mutex};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};

/// In-memory stand-in for the sysctl capability. Records every mode write
/// with a timestamp so tests can check what the "kernel" state was at any
/// point of a run.
#[derive(Debug)]
pub struct FakeEcn {
    initial: Mode,
    mode: Mutex<Mode>,
    flips: Mutex<Vec<(Mode, f64)>>,
}

impl FakeEcn {
    pub fn new(initial: Mode) -> Self {
        Self {
            initial,
            mode: Mutex::new(initial),
            flips: Mutex::new(Vec::new()),
        }
    }

    /// Every mode write in order, with fractional-epoch timestamps.
    pub fn flips(&self) -> Vec<(Mode, f64)> {
        self.flips.lock().unwrap().clone()
    }

    /// The mode that was in effect at `time`.
    pub fn mode_at(&self, time: f64) -> Mode {
        let flips = self.flips.lock().unwrap();
        flips
            .iter()
            .rev()
            .find(|(_, at)| *at <= time)
            .map(|(mode, _)| *mode)
            .unwrap_or(self.initial)
    }
}

impl EcnCtl for FakeEcn {
    fn get(&self) -> Result<Mode> {
        Ok(*self.mode.lock().unwrap())
    }

    fn set(&self, mode: Mode) -> Result<()> {
        *self.mode.lock().unwrap() = mode;
        self.flips.lock().unwrap().push((mode, unix_time()));
        Ok(())
    }
}

/// Binds a loopback listener that answers every connection's first request
/// with a small `200 OK`. Returns the address to point workers at.
pub async fn stub_server() -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(_) => break,
            };
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(read) => {
                            request.extend_from_slice(&chunk[..read]);
                            if request.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let _ = stream
                    .write_all(
                        b"HTTP/1.1 200 OK\r\nServer: stub\r\nContent-Length: 2\r\n\r\nok",
                    )
                    .await;
                let _ = stream.shutdown().await;
            });
        }
    });

    Ok((addr, handle))
}
