// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Incremental indexing of credential vault events into a local SQLite
//! cache, with an idempotent upsert contract and a single-writer
//! checkpoint.

pub mod indexer;
pub mod runner;
pub mod schema;
pub mod store;
