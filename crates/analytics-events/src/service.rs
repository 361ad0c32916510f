// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The engine task and its handle.
//!
//! [`EngineService::run`] owns the [`SubmissionEngine`] and applies commands one
//! at a time. Transport calls run on their own tasks and post their result back
//! as a command, so every state change happens on the engine task. The
//! auto-submit timer is a task that posts [`EngineCommand::AutoSubmit`] once; it
//! is aborted and re-spawned on every submission pass.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::engine::{Dispatch, EngineSnapshot, SubmissionEngine, SubmitOptions, SubmitResult};
use crate::errors::{EngineError, StorageError};
use crate::event::{Attributes, Event, Metrics, Purchase, Session};
use crate::transport::Transport;

type Reply<T> = oneshot::Sender<Result<T, StorageError>>;

pub enum EngineCommand {
    Record {
        event: Event,
        response_tx: Reply<Option<Event>>,
    },
    Submit {
        options: SubmitOptions,
        response_tx: Reply<Vec<String>>,
    },
    AutoSubmit,
    Response {
        batch_id: String,
        dispatch_id: u64,
        result: SubmitResult,
    },
    SetGlobalAttribute {
        name: String,
        value: String,
        response_tx: Reply<bool>,
    },
    RemoveGlobalAttribute {
        name: String,
        response_tx: Reply<bool>,
    },
    SetGlobalMetric {
        name: String,
        value: f64,
        response_tx: Reply<bool>,
    },
    RemoveGlobalMetric {
        name: String,
        response_tx: Reply<bool>,
    },
    Snapshot(oneshot::Sender<EngineSnapshot>),
    Shutdown,
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        operation: &str,
        build: impl FnOnce(oneshot::Sender<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx.send(build(response_tx)).map_err(|e| {
            EngineError::ChannelClosed(format!("Failed to send {operation} command: {e}"))
        })?;
        response_rx.await.map_err(|e| {
            EngineError::ChannelClosed(format!("Failed to receive {operation} response: {e}"))
        })
    }

    async fn record(&self, event: Event) -> Result<Option<Event>, EngineError> {
        self.request("record", |response_tx| EngineCommand::Record { event, response_tx })
            .await?
            .map_err(Into::into)
    }

    /// Records an event. Resolves to the queued event, or `None` when it failed
    /// validation.
    pub async fn record_event(
        &self,
        event_type: impl Into<String>,
        session: Session,
        attributes: Attributes,
        metrics: Metrics,
    ) -> Result<Option<Event>, EngineError> {
        self.record(Event::new(event_type, session, attributes, metrics))
            .await
    }

    pub async fn record_monetization_event(
        &self,
        session: Session,
        purchase: Purchase,
        attributes: Attributes,
        metrics: Metrics,
    ) -> Result<Option<Event>, EngineError> {
        self.record(Event::monetization(session, purchase, attributes, metrics))
            .await
    }

    /// Runs a submission pass and resolves to the ids of the dispatched
    /// batches. Delivery results arrive later through the submit callback.
    pub async fn submit_events(&self, options: SubmitOptions) -> Result<Vec<String>, EngineError> {
        self.request("submit", |response_tx| EngineCommand::Submit {
            options,
            response_tx,
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn set_global_attribute(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Result<bool, EngineError> {
        let (name, value) = (name.into(), value.into());
        self.request("set_global_attribute", |response_tx| {
            EngineCommand::SetGlobalAttribute {
                name,
                value,
                response_tx,
            }
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn remove_global_attribute(
        &self,
        name: impl Into<String>,
    ) -> Result<bool, EngineError> {
        let name = name.into();
        self.request("remove_global_attribute", |response_tx| {
            EngineCommand::RemoveGlobalAttribute { name, response_tx }
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn set_global_metric(
        &self,
        name: impl Into<String>,
        value: f64,
    ) -> Result<bool, EngineError> {
        let name = name.into();
        self.request("set_global_metric", |response_tx| {
            EngineCommand::SetGlobalMetric {
                name,
                value,
                response_tx,
            }
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn remove_global_metric(&self, name: impl Into<String>) -> Result<bool, EngineError> {
        let name = name.into();
        self.request("remove_global_metric", |response_tx| {
            EngineCommand::RemoveGlobalMetric { name, response_tx }
        })
        .await?
        .map_err(Into::into)
    }

    pub async fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        self.request("snapshot", EngineCommand::Snapshot).await
    }

    pub fn shutdown(&self) -> Result<(), EngineError> {
        self.tx
            .send(EngineCommand::Shutdown)
            .map_err(|e| EngineError::ChannelClosed(format!("Failed to send shutdown command: {e}")))
    }
}

pub struct EngineService {
    engine: SubmissionEngine,
    transport: Arc<dyn Transport>,
    rx: mpsc::UnboundedReceiver<EngineCommand>,
    tx: mpsc::UnboundedSender<EngineCommand>,
    timer: Option<JoinHandle<()>>,
    cancel_token: CancellationToken,
}

impl EngineService {
    pub fn new(
        engine: SubmissionEngine,
        transport: Arc<dyn Transport>,
        cancel_token: CancellationToken,
    ) -> (Self, EngineHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = EngineHandle { tx: tx.clone() };
        let service = Self {
            engine,
            transport,
            rx,
            tx,
            timer: None,
            cancel_token,
        };
        (service, handle)
    }

    pub async fn run(mut self) {
        debug!("ANALYTICS | Engine service started");
        if self.engine.config().auto_submit_events {
            self.arm_timer();
        }

        loop {
            let command = tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    debug!("ANALYTICS | Engine service cancelled");
                    break;
                }
                command = self.rx.recv() => command,
            };
            let Some(command) = command else {
                break;
            };

            match command {
                EngineCommand::Record { event, response_tx } => {
                    let result = self.engine.record_event(event);
                    let recorded = matches!(result, Ok(Some(_)));
                    respond(response_tx, result, "record");
                    if recorded && self.engine.queue_reached_batch_size() {
                        debug!("ANALYTICS | Queue reached the batch size limit");
                        if let Err(e) = self.submit_events(SubmitOptions::default()) {
                            error!("ANALYTICS | Submission pass failed: {e}");
                        }
                    }
                }

                EngineCommand::Submit {
                    options,
                    response_tx,
                } => {
                    let result = self.submit_events(options);
                    respond(response_tx, result, "submit");
                }

                EngineCommand::AutoSubmit => {
                    if let Err(e) = self.submit_events(SubmitOptions::default()) {
                        error!("ANALYTICS | Automatic submission pass failed: {e}");
                    }
                }

                EngineCommand::Response {
                    batch_id,
                    dispatch_id,
                    result,
                } => {
                    match self.engine.handle_response(
                        &batch_id,
                        dispatch_id,
                        &result,
                        Instant::now(),
                    ) {
                        Ok(outcome) => {
                            if let Some(callback) = &outcome.callback {
                                callback(&batch_id, &result);
                            }
                            self.dispatch(outcome.flush);
                        }
                        Err(e) => {
                            error!("ANALYTICS | Failed to apply response for batch {batch_id}: {e}");
                        }
                    }
                }

                EngineCommand::SetGlobalAttribute {
                    name,
                    value,
                    response_tx,
                } => {
                    let result = self.engine.set_global_attribute(name, value);
                    respond(response_tx, result, "set_global_attribute");
                }

                EngineCommand::RemoveGlobalAttribute { name, response_tx } => {
                    let result = self.engine.remove_global_attribute(&name);
                    respond(response_tx, result, "remove_global_attribute");
                }

                EngineCommand::SetGlobalMetric {
                    name,
                    value,
                    response_tx,
                } => {
                    let result = self.engine.set_global_metric(name, value);
                    respond(response_tx, result, "set_global_metric");
                }

                EngineCommand::RemoveGlobalMetric { name, response_tx } => {
                    let result = self.engine.remove_global_metric(&name);
                    respond(response_tx, result, "remove_global_metric");
                }

                EngineCommand::Snapshot(response_tx) => {
                    respond(response_tx, self.engine.snapshot(), "snapshot");
                }

                EngineCommand::Shutdown => {
                    debug!("ANALYTICS | Engine service shutting down");
                    break;
                }
            }
        }

        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        debug!("ANALYTICS | Engine service stopped");
    }

    fn submit_events(&mut self, options: SubmitOptions) -> Result<Vec<String>, StorageError> {
        if self.engine.config().auto_submit_events {
            self.arm_timer();
        }
        let dispatches = self.engine.submit_events(Instant::now(), options)?;
        let ids = dispatches
            .iter()
            .map(|dispatch| dispatch.batch_id.clone())
            .collect();
        self.dispatch(dispatches);
        Ok(ids)
    }

    fn arm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        let interval = self.engine.config().auto_submit_interval();
        let tx = self.tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if tx.send(EngineCommand::AutoSubmit).is_err() {
                debug!("ANALYTICS | Engine stopped before the auto-submit timer fired");
            }
        }));
    }

    fn dispatch(&self, dispatches: Vec<Dispatch>) {
        for Dispatch {
            batch_id,
            dispatch_id,
            payload,
        } in dispatches
        {
            let transport = Arc::clone(&self.transport);
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let result = transport.submit(&payload).await;
                if let Err(e) = tx.send(EngineCommand::Response {
                    batch_id,
                    dispatch_id,
                    result,
                }) {
                    if let EngineCommand::Response { batch_id, .. } = e.0 {
                        debug!("ANALYTICS | Engine stopped before the response for batch {batch_id}");
                    }
                }
            });
        }
    }
}

fn respond<T>(response_tx: oneshot::Sender<T>, value: T, operation: &str) {
    if response_tx.send(value).is_err() {
        error!("ANALYTICS | Failed to send {operation} response - receiver dropped");
    }
}
