// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Just enough HTTP/1.1 to issue one GET and read the response head.

use crate::Result;
use std::time::Duration;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};

/// Fixed User-Agent sent with every request.
pub const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:28.0) Gecko/20100101 Firefox/28.0";

/// Upper bound on the response head; anything larger is treated as
/// malformed.
const MAX_HEAD: usize = 64 * 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub headers: Vec<(String, String)>,
}

/// Sends `GET / HTTP/1.1` on an established connection and parses the
/// response head. The body is left unread; `Connection: close` tells the
/// peer not to expect anything further.
///
/// `op_timeout` bounds each socket operation, mirroring a socket-level
/// timeout rather than a whole-exchange deadline.
pub async fn get(stream: &mut TcpStream, host: &str, op_timeout: Duration) -> Result<Response> {
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {}\r\nUser-Agent: {}\r\nConnection: close\r\n\r\n",
        host, USER_AGENT
    );
    timeout(op_timeout, stream.write_all(request.as_bytes())).await??;

    let mut head = Vec::new();
    let mut chunk = [0u8; 4096];
    let head_len = loop {
        let read = timeout(op_timeout, stream.read(&mut chunk)).await??;
        if read == 0 {
            return Err("connection closed before the response head completed".into());
        }
        head.extend_from_slice(&chunk[..read]);
        if let Some(at) = head_end(&head) {
            break at;
        }
        if head.len() > MAX_HEAD {
            return Err("response head too large".into());
        }
    };

    parse_head(&head[..head_len])
}

fn head_end(buffer: &[u8]) -> Option<usize> {
    buffer.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_head(head: &[u8]) -> Result<Response> {
    let head = std::str::from_utf8(head)?;
    let mut lines = head.split("\r\n");

    let status_line = lines.next().unwrap_or("");
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/") {
        return Err(format!("malformed status line: {:?}", status_line).into());
    }
    let status = parts
        .next()
        .ok_or_else(|| format!("malformed status line: {:?}", status_line))?
        .parse::<u16>()?;

    let mut headers = Vec::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("malformed header line: {:?}", line))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    Ok(Response { status, headers })
}
