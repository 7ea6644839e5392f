// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! The probe worker: one paired (ECN-off, ECN-on) measurement per job.

use crate::{
    http,
    input::Job,
    output,
    retry::is_retryable,
    spider::Shared,
    stats::unix_time,
    sync::Acquire,
    Result,
};
use std::{
    io,
    net::SocketAddr,
    sync::{atomic::Ordering, Arc},
    time::{Duration, Instant},
};
use tokio::{net::TcpStream, time::timeout};
use tracing::{debug, error};

/// Canonical error string for a connect or request that hit the timeout.
pub const TIMEOUT_ERR: &str = "socket.timeout";
/// Canonical error string for a probe half that was never attempted.
pub const NO_ATTEMPT: &str = "no_attempt";

/// How long a worker pauses when the queue comes up empty. It still takes
/// its place in the phase handshake afterwards.
const EMPTY_QUEUE_PAUSE: Duration = Duration::from_millis(500);

/// Per-worker copy of the options a probe needs.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Options {
    pub timeout: Duration,
    pub port: u16,
    pub fast_fail: bool,
    pub save_headers: bool,
}

/// Everything measured for one job. One instance renders to one output row.
#[derive(Clone, Debug, Default)]
pub struct ProbeResult {
    pub record_time: f64,
    pub rank: u64,
    pub domain: String,
    pub ip: String,
    pub eoff_err: Option<String>,
    pub port_eoff: u16,
    pub eon_err: Option<String>,
    pub port_eon: u16,
    pub pre_conn_eoff_time: f64,
    pub post_conn_eoff_time: f64,
    pub pre_conn_eon_time: f64,
    pub post_conn_eon_time: f64,
    pub pre_req_time: f64,
    pub inter_req_time: f64,
    pub post_req_time: f64,
    pub http_err_eoff: Option<String>,
    pub status_eoff: Option<u16>,
    pub headers_eoff: Option<String>,
    pub http_err_eon: Option<String>,
    pub status_eon: Option<u16>,
    pub headers_eon: Option<String>,
}

impl ProbeResult {
    /// The row in its fixed 21-column order. Absent values render as the
    /// empty field, never as a placeholder.
    pub fn to_row(&self) -> [String; 21] {
        [
            ts(self.record_time),
            self.rank.to_string(),
            self.domain.clone(),
            self.ip.clone(),
            opt_str(&self.eoff_err),
            self.port_eoff.to_string(),
            opt_str(&self.eon_err),
            self.port_eon.to_string(),
            ts(self.pre_conn_eoff_time),
            ts(self.post_conn_eoff_time),
            ts(self.pre_conn_eon_time),
            ts(self.post_conn_eon_time),
            ts(self.pre_req_time),
            ts(self.inter_req_time),
            ts(self.post_req_time),
            opt_str(&self.http_err_eoff),
            opt_num(self.status_eoff),
            opt_str(&self.headers_eoff),
            opt_str(&self.http_err_eon),
            opt_num(self.status_eon),
            opt_str(&self.headers_eon),
        ]
    }
}

fn ts(time: f64) -> String {
    format!("{:.6}", time)
}

fn opt_str(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn opt_num(value: Option<u16>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

/// A probe in flight: the accumulating result row plus the two connections
/// that stay open across the phase handshake. The kernel setting only
/// matters at SYN time, so holding an established socket through a flip is
/// safe.
struct Probe {
    result: ProbeResult,
    conn_off: Option<TcpStream>,
    conn_on: Option<TcpStream>,
}

impl Probe {
    /// The ECN-off half: runs while the kernel mode is "never".
    async fn connect_off(job: &Job, options: &Options) -> Self {
        let mut result = ProbeResult {
            rank: job.rank,
            domain: job.domain.clone(),
            ip: job.ip.clone(),
            ..Default::default()
        };

        result.pre_conn_eoff_time = unix_time();
        let (err, conn, port) = connect(&job.ip, options.port, options.timeout).await;
        result.post_conn_eoff_time = unix_time();
        result.eoff_err = err;
        result.port_eoff = port;

        Self {
            result,
            conn_off: conn,
            conn_on: None,
        }
    }

    /// The ECN-on half: runs while the kernel mode is "always".
    async fn connect_on(&mut self, options: &Options) {
        self.result.pre_conn_eon_time = unix_time();
        if skip_eon_connect(options.fast_fail, self.result.eoff_err.as_deref()) {
            self.result.eon_err = Some(NO_ATTEMPT.to_string());
        } else {
            let (err, conn, port) = connect(&self.result.ip, options.port, options.timeout).await;
            self.result.eon_err = err;
            self.result.port_eon = port;
            self.conn_on = conn;
        }
        self.result.post_conn_eon_time = unix_time();
    }

    /// The deferred GET pair, ECN-on connection first. Runs outside the
    /// phase handshake so a slow response never stalls the next flip.
    async fn request(&mut self, options: &Options) {
        self.result.pre_req_time = unix_time();

        let eon = Self::exchange(
            self.conn_on.take(),
            &self.result.domain,
            options,
        )
        .await;
        self.result.http_err_eon = eon.0;
        self.result.status_eon = eon.1;
        self.result.headers_eon = eon.2;

        self.result.inter_req_time = unix_time();

        let eoff = Self::exchange(
            self.conn_off.take(),
            &self.result.domain,
            options,
        )
        .await;
        self.result.http_err_eoff = eoff.0;
        self.result.status_eoff = eoff.1;
        self.result.headers_eoff = eoff.2;

        self.result.post_req_time = unix_time();
        self.result.record_time = unix_time();
    }

    async fn exchange(
        conn: Option<TcpStream>,
        domain: &str,
        options: &Options,
    ) -> (Option<String>, Option<u16>, Option<String>) {
        let mut conn = match conn {
            Some(conn) => conn,
            None => return (Some(NO_ATTEMPT.to_string()), None, None),
        };

        match http::get(&mut conn, domain, options.timeout).await {
            Ok(response) => {
                debug!(domain, status = response.status, "request returned");
                let headers = if options.save_headers {
                    serde_json::to_string(&response.headers).ok()
                } else {
                    None
                };
                (None, Some(response.status), headers)
            }
            Err(err) => {
                error!(domain, "request failed: {}", err);
                (Some(canonical(&err)), None, None)
            }
        }
    }
}

/// Fast-fail skips the ECN-on connect when the ECN-off connect already
/// timed out, assuming no host admits ECN traffic while dropping the rest.
fn skip_eon_connect(fast_fail: bool, eoff_err: Option<&str>) -> bool {
    fast_fail && eoff_err == Some(TIMEOUT_ERR)
}

/// Opens a TCP connection to a literal address, reporting the canonical
/// error string, the stream, and the chosen local port (0 when no socket
/// came up).
async fn connect(
    ip: &str,
    port: u16,
    op_timeout: Duration,
) -> (Option<String>, Option<TcpStream>, u16) {
    let addr: SocketAddr = match format!("{}:{}", ip, port).parse() {
        Ok(addr) => addr,
        Err(_) => {
            error!(ip, "not a literal address");
            return (Some("Invalid argument".to_string()), None, 0);
        }
    };

    match timeout(op_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            let local_port = stream.local_addr().map(|a| a.port()).unwrap_or(0);
            (None, Some(stream), local_port)
        }
        Ok(Err(err)) => {
            error!(ip, "connect failed: {}", err);
            (Some(canonical_io(&err)), None, 0)
        }
        Err(_) => {
            error!(ip, "connect timed out");
            (Some(TIMEOUT_ERR.to_string()), None, 0)
        }
    }
}

/// Reduces an error to the short canonical form the output rows carry:
/// `socket.timeout` for elapsed timeouts, the bare strerror text for OS
/// errors, the message otherwise.
fn canonical(err: &crate::Error) -> String {
    if err.is::<tokio::time::error::Elapsed>() {
        return TIMEOUT_ERR.to_string();
    }
    if let Some(err) = err.downcast_ref::<io::Error>() {
        return canonical_io(err);
    }
    err.to_string()
}

fn canonical_io(err: &io::Error) -> String {
    if err.kind() == io::ErrorKind::TimedOut {
        return TIMEOUT_ERR.to_string();
    }
    let text = err.to_string();
    match text.find(" (os error") {
        Some(cut) => text[..cut].to_string(),
        None => text,
    }
}

/// One worker's crawl loop.
///
/// Every iteration takes part in one full phase handshake, job or no job.
/// A worker that sat a round out would leave the controller waiting on a
/// token that never comes, so the handshake is unconditional and only the
/// probing inside it is optional.
pub(crate) async fn worker(index: usize, shared: Arc<Shared>, options: Options) -> Result<()> {
    let mut last_job = Instant::now();

    while shared.run.load(Ordering::Relaxed) {
        let job = shared.queue.pop();
        match &job {
            Some(job) => {
                let now = Instant::now();
                shared.intervals.record(now - last_job);
                last_job = now;
                debug!(worker = index, domain = %job.domain, ip = %job.ip, "picked up job");
            }
            None => {
                tokio::time::sleep(EMPTY_QUEUE_PAUSE).await;
            }
        }

        if shared.phases.ecn_off.acquire_n(1).await == Acquire::Closed {
            break;
        }

        let mut probe = match &job {
            Some(job) => {
                debug!(worker = index, "connecting with ECN off");
                Some(Probe::connect_off(job, &options).await)
            }
            None => None,
        };

        shared.phases.ecn_on_rdy.release_n(1)?;
        if shared.phases.ecn_on.acquire_n(1).await == Acquire::Closed {
            break;
        }

        if let Some(probe) = &mut probe {
            debug!(worker = index, "connecting with ECN on");
            probe.connect_on(&options).await;
        }

        shared.phases.ecn_off_rdy.release_n(1)?;

        if let Some(mut probe) = probe {
            debug!(worker = index, "making GET requests");
            probe.request(&options).await;
            emit(&shared, probe.result);
        }
    }

    debug!(worker = index, "worker task ending");
    Ok(())
}

/// Writes the result row, schedules a retry when the error pair warrants
/// one, and acknowledges the job. The completed counter moves even when a
/// write fails so the queue-drain accounting cannot wedge the run.
fn emit(shared: &Shared, result: ProbeResult) {
    if let Err(err) = shared.output.write(result.to_row()) {
        error!("failed to write result row: {}", err);
    }

    if is_retryable(result.eoff_err.as_deref(), result.eon_err.as_deref()) {
        debug!(
            eoff_err = ?result.eoff_err,
            eon_err = ?result.eon_err,
            "scheduling retry"
        );
        let row = output::retry_row(result.rank, &result.domain, &result.ip);
        if let Err(err) = shared.retry_output.write(row) {
            error!("failed to write retry row: {}", err);
        }
        shared.retries.incr();
    }

    shared.completed.incr();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_has_21_columns_in_order() {
        let result = ProbeResult {
            record_time: 1405624888.446319,
            rank: 7,
            domain: "a.test".to_string(),
            ip: "192.0.2.1".to_string(),
            eoff_err: None,
            port_eoff: 40001,
            eon_err: Some(TIMEOUT_ERR.to_string()),
            port_eon: 0,
            status_eoff: Some(200),
            http_err_eon: Some(NO_ATTEMPT.to_string()),
            ..Default::default()
        };

        let row = result.to_row();
        assert_eq!(row.len(), 21);
        assert_eq!(row[0], "1405624888.446319");
        assert_eq!(row[1], "7");
        assert_eq!(row[2], "a.test");
        assert_eq!(row[3], "192.0.2.1");
        assert_eq!(row[4], "");
        assert_eq!(row[5], "40001");
        assert_eq!(row[6], TIMEOUT_ERR);
        assert_eq!(row[7], "0");
        assert_eq!(row[15], "");
        assert_eq!(row[16], "200");
        assert_eq!(row[17], "");
        assert_eq!(row[18], NO_ATTEMPT);
        assert_eq!(row[19], "");
        assert_eq!(row[20], "");
    }

    #[test]
    fn fast_fail_gate_only_fires_on_timeout() {
        assert!(skip_eon_connect(true, Some(TIMEOUT_ERR)));
        assert!(!skip_eon_connect(false, Some(TIMEOUT_ERR)));
        assert!(!skip_eon_connect(true, Some("Connection refused")));
        assert!(!skip_eon_connect(true, None));
    }

    #[test]
    fn canonical_strips_the_os_error_suffix() {
        let err = io::Error::from_raw_os_error(111);
        assert_eq!(canonical_io(&err), "Connection refused");

        let err = io::Error::from_raw_os_error(13);
        assert_eq!(canonical_io(&err), "Permission denied");

        let err = io::Error::new(io::ErrorKind::Other, "split response");
        assert_eq!(canonical_io(&err), "split response");
    }

    #[test]
    fn canonical_maps_timeouts() {
        let err = io::Error::new(io::ErrorKind::TimedOut, "deadline elapsed");
        assert_eq!(canonical_io(&err), TIMEOUT_ERR);
    }

    #[tokio::test]
    async fn connect_to_a_closed_port_is_refused() {
        // bind to reserve a port, then close it again
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (err, conn, local_port) =
            connect("127.0.0.1", port, Duration::from_secs(5)).await;
        assert_eq!(err.as_deref(), Some("Connection refused"));
        assert!(conn.is_none());
        assert_eq!(local_port, 0);
    }

    #[tokio::test]
    async fn connect_rejects_non_literal_addresses() {
        let (err, conn, port) = connect("a.test", 80, Duration::from_secs(5)).await;
        assert_eq!(err.as_deref(), Some("Invalid argument"));
        assert!(conn.is_none());
        assert_eq!(port, 0);
    }
}
