// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! CSV sinks for result and retry rows.

use crate::Result;
use std::{fs::File, path::Path, sync::Mutex};

/// Append-only CSV sink shared by every worker. One call to
/// [`write`](Self::write) produces one fully formed row; rows from
/// concurrent workers never interleave.
#[derive(Debug)]
pub struct RowWriter {
    writer: Mutex<csv::Writer<File>>,
}

impl RowWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(path)?;
        Ok(Self {
            writer: Mutex::new(writer),
        })
    }

    pub fn write<I, S>(&self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<[u8]>,
    {
        let mut writer = self.writer.lock().unwrap();
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }
}

/// Builds the row scheduling `ip` for another run. The address goes back
/// into the column of its family: bracketed addresses came from the IPv6
/// column and return there, unbracketed ones to the IPv4 column.
pub fn retry_row(rank: u64, domain: &str, ip: &str) -> [String; 4] {
    let stripped = ip.trim_start_matches('[').trim_end_matches(']');
    if stripped == ip {
        [
            rank.to_string(),
            domain.to_string(),
            stripped.to_string(),
            String::new(),
        ]
    } else {
        [
            rank.to_string(),
            domain.to_string(),
            String::new(),
            stripped.to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_row_keeps_v4_in_the_v4_column() {
        insta::assert_debug_snapshot!(retry_row(5, "x.test", "10.0.0.1"), @r###"
        [
            "5",
            "x.test",
            "10.0.0.1",
            "",
        ]
        "###);
    }

    #[test]
    fn retry_row_unwraps_v6_into_the_v6_column() {
        insta::assert_debug_snapshot!(retry_row(5, "x.test", "[::1]"), @r###"
        [
            "5",
            "x.test",
            "",
            "::1",
        ]
        "###);
    }

    #[test]
    fn writes_rows_atomically_per_call() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");

        let writer = RowWriter::create(&path).unwrap();
        writer.write(["1", "a.test", "192.0.2.1", ""]).unwrap();
        writer.write(["2", "b.test", "", "::1"]).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "1,a.test,192.0.2.1,\n2,b.test,,::1\n");
    }

    #[test]
    fn quotes_fields_with_separators() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");

        let writer = RowWriter::create(&path).unwrap();
        writer.write(["1", "a,b", "plain"]).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written, "1,\"a,b\",plain\n");
    }
}
