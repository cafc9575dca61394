// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: Apache-2.0

//! Test harness for driving the dispatcher router in-process.
//!
//! Every app is wired with a mock clock, an in-memory store, a queued
//! detach strategy and a recording transport, so tests control time and
//! can inspect outbound deliveries after awaiting them.

#![allow(dead_code)]

pub mod app;
pub mod generators;
pub mod tally;
