// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client-side event buffering and delivery.
//!
//! Events are validated, appended to a persisted queue, cut into size-bounded
//! batches and shipped to an ingestion endpoint. All mutable state is owned by
//! a single engine task (see [`service`]); callers interact with it through a
//! cloneable [`service::EngineHandle`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod batch_store;
pub mod batcher;
pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod errors;
pub mod event;
pub mod logger;
pub mod queue;
pub mod service;
pub mod storage;
pub mod throttle;
pub mod transport;
pub mod validator;
