// Copyright (c) Zefchain Labs, Inc.
// SPDX-License-Identifier: Apache-2.0

//! Issuance orchestration, verification resolution and the HTTP surface of
//! the credential vault service.

pub mod api;
pub mod commitment;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod resolver;
