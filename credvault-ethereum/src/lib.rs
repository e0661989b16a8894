// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! This crate provides access to the credential vault contract on an
//! EVM-compatible node: read views, event log queries and signed
//! transaction submission.

pub mod abi;
pub mod client;
pub mod common;
pub mod events;
pub mod provider;

/// Helper types for tests.
pub mod test_utils;
