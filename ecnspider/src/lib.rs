// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

pub type Result<T, E = Error> = core::result::Result<T, E>;
pub type Error = Box<dyn std::error::Error + Send + Sync>;

pub mod controller;
pub mod ecn;
pub mod http;
pub mod input;
pub mod output;
pub mod probe;
pub mod report;
pub mod retry;
pub mod spider;
pub mod stats;
pub mod sync;
pub mod testing;

pub use input::{Job, Record};
pub use spider::{Config, Spider};
