//! Message dispatcher for ChatRelay
//!
//! Runs the per-message pipeline: validate, join the user's channel,
//! refresh the session, snapshot and extend the context, persist the
//! inbound message, call the agent, persist the response, record any
//! follow-up query, correlate, and deliver.
//!
//! Only validation, the inbound insert, and the response write can abort a
//! message. Every other step is best effort and logs a warning on failure.
//! Anything that aborts the pipeline after the inbound insert, panics
//! included, rolls the unanswered record back and reports a generic error
//! to the user's channel.

pub mod inbound;
pub mod payload;

pub use inbound::{InboundMessage, QuestionType, ValidationError};
pub use payload::{bound_response, correlate, BoundedResponse, ResponseLimits};

use crate::agent::AgentClient;
use crate::config::DispatcherConfig;
use crate::error::Result;
use crate::gateway::Broadcaster;
use crate::metrics;
use crate::storage::MessageLog;
use crate::store::{ContextStore, SessionStore};
use anyhow::Context;
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::Instrument;

/// Event carrying an agent response
pub const REPLY_EVENT: &str = "reply";

/// Event carrying an error report
pub const ERROR_EVENT: &str = "error";

const PROCESSING_FAILED: &str = "Failed to process message";
const DELIVERY_FAILED: &str = "Failed to deliver response";

/// Where an inbound message came from
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Origin {
    /// Originating real-time connection, if any
    pub connection_id: Option<String>,
    /// Remote address of the client, if known
    pub address: Option<String>,
}

impl Origin {
    /// Origin for a message received on a real-time connection
    pub fn connection(connection_id: impl Into<String>, address: Option<String>) -> Self {
        Self {
            connection_id: Some(connection_id.into()),
            address,
        }
    }
}

/// A fully processed message, ready to deliver
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedReply {
    /// Message log identifier, echoed to the client as `q_id`
    pub message_id: i64,
    /// Response document with `q_id` attached
    pub response: Value,
    /// Whether the document describes a failed agent call
    pub agent_failed: bool,
}

/// How a dispatched message ended
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The reply reached the user's channel
    Replied {
        /// Message log identifier
        message_id: i64,
        /// Whether the reply is an agent error document
        agent_failed: bool,
    },
    /// The message was processed and persisted but the reply emission failed
    Undelivered {
        /// Message log identifier
        message_id: i64,
    },
    /// The payload failed validation; nothing was persisted
    Rejected(ValidationError),
    /// Processing aborted; any partial record was rolled back
    Failed,
}

/// Per-message pipeline over the relay's stores, agent, and broadcaster
pub struct MessageDispatcher {
    sessions: Arc<SessionStore>,
    contexts: Arc<ContextStore>,
    log: Arc<dyn MessageLog>,
    agent: Arc<dyn AgentClient>,
    broadcaster: Arc<dyn Broadcaster>,
    limits: ResponseLimits,
}

impl MessageDispatcher {
    /// Create a dispatcher
    pub fn new(
        sessions: Arc<SessionStore>,
        contexts: Arc<ContextStore>,
        log: Arc<dyn MessageLog>,
        agent: Arc<dyn AgentClient>,
        broadcaster: Arc<dyn Broadcaster>,
        config: &DispatcherConfig,
    ) -> Self {
        Self {
            sessions,
            contexts,
            log,
            agent,
            broadcaster,
            limits: ResponseLimits {
                max_chars: config.max_response_chars,
                prefix_chars: config.truncated_prefix_chars,
            },
        }
    }

    /// Handle one raw inbound payload from a real-time connection
    ///
    /// Never fails and never panics: every outcome is reported to the
    /// client and returned as a `DispatchOutcome`.
    pub async fn dispatch(&self, origin: &Origin, raw: Value) -> DispatchOutcome {
        let inbound = match InboundMessage::parse(&raw) {
            Ok(inbound) => inbound,
            Err(e) => {
                self.reject(origin, &e).await;
                return DispatchOutcome::Rejected(e);
            }
        };
        let user_id = inbound.user_id.as_str();

        tracing::info!(
            user_id,
            connection_id = origin.connection_id.as_deref().unwrap_or("-"),
            q_type = ?inbound.q_type,
            "Dispatching message"
        );

        if let Some(connection_id) = origin.connection_id.as_deref() {
            if let Err(e) = self.broadcaster.join(connection_id, user_id).await {
                tracing::warn!(user_id, connection_id, error = %e, "Failed to join user channel");
            }
        }

        match self.process(&inbound, origin).await {
            Ok(reply) => self.deliver(user_id, reply).await,
            Err(e) => {
                tracing::error!(user_id, error = %e, "Message processing failed");
                self.emit_best_effort(user_id, ERROR_EVENT, json!({ "error": PROCESSING_FAILED }))
                    .await;
                DispatchOutcome::Failed
            }
        }
    }

    /// Run the pipeline for a validated message without delivering the reply
    ///
    /// # Errors
    ///
    /// Returns an error if the inbound message or its response could not be
    /// persisted, or the pipeline panicked. The unanswered record, if one
    /// was written, has been rolled back by the time this returns.
    ///
    /// `emoji_type`, `q_type`, and the client's own `q_id` are carried on
    /// the message span only. They are neither forwarded to the agent nor
    /// echoed in the reply, whose `q_id` is always the log identifier.
    pub async fn process(&self, inbound: &InboundMessage, origin: &Origin) -> Result<ProcessedReply> {
        let span = tracing::info_span!(
            "message",
            user_id = %inbound.user_id,
            q_type = ?inbound.q_type,
            emoji_type = ?inbound.emoji_type,
            prior_q_id = ?inbound.q_id,
        );
        let mut in_flight = None;
        let outcome = AssertUnwindSafe(self.run_pipeline(inbound, origin, &mut in_flight))
            .catch_unwind()
            .instrument(span.clone())
            .await;

        let error = match outcome {
            Ok(Ok(reply)) => return Ok(reply),
            Ok(Err(e)) => e,
            Err(panic) => anyhow::anyhow!("Message pipeline panicked: {}", panic_message(&*panic)),
        };

        metrics::record_message("failed");
        if let Some(message_id) = in_flight {
            self.rollback(message_id).instrument(span).await;
        }
        Err(error)
    }

    async fn run_pipeline(
        &self,
        inbound: &InboundMessage,
        origin: &Origin,
        in_flight: &mut Option<i64>,
    ) -> Result<ProcessedReply> {
        let user_id = inbound.user_id.as_str();

        if let Err(e) = self
            .sessions
            .refresh(
                user_id,
                origin.connection_id.as_deref(),
                origin.address.as_deref(),
            )
            .await
        {
            tracing::warn!(user_id, error = %e, "Session refresh failed");
        }

        // The agent sees the turns before this one
        let context = self.contexts.get_context(user_id).await;
        if let Err(e) = self
            .contexts
            .append_to_context(user_id, &inbound.message)
            .await
        {
            tracing::warn!(user_id, error = %e, "Failed to append message to context");
        }

        let message_id = self
            .log
            .insert_inbound(user_id, &inbound.message)
            .await
            .context("Failed to persist inbound message")?;
        *in_flight = Some(message_id);
        tracing::debug!(user_id, message_id, context_len = context.len(), "Inbound message persisted");

        let result = self
            .agent
            .invoke(
                user_id,
                &inbound.message,
                &context,
                inbound.session_id.as_deref(),
            )
            .await;
        let agent_failed = result.is_error();
        let follow_up = result.follow_up_query().map(str::to_string);
        if agent_failed {
            tracing::warn!(user_id, message_id, "Agent call failed, relaying error document");
        }

        let bounded = bound_response(result.into_document(), &self.limits);
        self.log
            .record_response(message_id, bounded.serialized)
            .await
            .context("Failed to persist agent response")?;
        *in_flight = None;

        if let Some(query) = follow_up {
            if let Err(e) = self.contexts.append_to_context(user_id, &query).await {
                tracing::warn!(user_id, error = %e, "Failed to append follow-up query to context");
            }
        }

        Ok(ProcessedReply {
            message_id,
            response: correlate(bounded.document, message_id),
            agent_failed,
        })
    }

    async fn deliver(&self, user_id: &str, reply: ProcessedReply) -> DispatchOutcome {
        let message_id = reply.message_id;
        let payload = json!({ "response": reply.response });

        match self.broadcaster.emit(user_id, REPLY_EVENT, payload).await {
            Ok(()) => {
                metrics::record_message("replied");
                tracing::info!(user_id, message_id, "Reply delivered");
                DispatchOutcome::Replied {
                    message_id,
                    agent_failed: reply.agent_failed,
                }
            }
            Err(e) => {
                metrics::record_message("undelivered");
                metrics::record_delivery_failure(REPLY_EVENT);
                tracing::warn!(user_id, message_id, error = %e, "Reply delivery failed");
                self.emit_best_effort(
                    user_id,
                    ERROR_EVENT,
                    json!({ "error": DELIVERY_FAILED, "q_id": message_id }),
                )
                .await;
                DispatchOutcome::Undelivered { message_id }
            }
        }
    }

    async fn reject(&self, origin: &Origin, error: &ValidationError) {
        metrics::record_validation_error();
        metrics::record_message("rejected");
        tracing::warn!(
            connection_id = origin.connection_id.as_deref().unwrap_or("-"),
            error = %error,
            "Rejected inbound message"
        );

        let Some(connection_id) = origin.connection_id.as_deref() else {
            return;
        };
        if let Err(e) = self
            .broadcaster
            .emit_to_connection(connection_id, ERROR_EVENT, json!({ "error": error.to_string() }))
            .await
        {
            metrics::record_delivery_failure(ERROR_EVENT);
            tracing::error!(connection_id, error = %e, "Failed to report validation error");
        }
    }

    async fn rollback(&self, message_id: i64) {
        match self.log.rollback_inbound(message_id).await {
            Ok(true) => tracing::info!(message_id, "Rolled back unanswered message"),
            Ok(false) => tracing::debug!(message_id, "No unanswered message to roll back"),
            Err(e) => tracing::error!(message_id, error = %e, "Rollback failed"),
        }
    }

    async fn emit_best_effort(&self, channel: &str, event: &'static str, payload: Value) {
        if let Err(e) = self.broadcaster.emit(channel, event, payload).await {
            metrics::record_delivery_failure(event);
            tracing::error!(channel, event, error = %e, "Failed to emit event");
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
