use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;

use webfarm_core::cluster::{FarmEventType, FarmMessage};
use webfarm_core::Result;

use super::state::FarmState;

type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Handler invoked for one inbound message.
pub(crate) type Handler = Arc<dyn Fn(Arc<FarmState>, FarmMessage) -> BoxFuture + Send + Sync>;

/// Routes inbound messages to the handler registered for their event type.
pub(crate) struct MessageRouter {
    handlers: HashMap<FarmEventType, Handler>,
}

impl MessageRouter {
    pub(crate) fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Router with the handlers every farm node runs.
    pub(crate) fn with_farm_handlers() -> Self {
        let mut router = Self::new();
        router.register(FarmEventType::Ping, |state, msg| Box::pin(on_ping(state, msg)));
        router.register(FarmEventType::Pong, |state, msg| Box::pin(on_pong(state, msg)));
        router.register(FarmEventType::Startup, |state, msg| {
            Box::pin(on_observed(state, msg))
        });
        router.register(FarmEventType::Shutdown, |state, msg| {
            Box::pin(on_observed(state, msg))
        });
        router.register(FarmEventType::Warning, |state, msg| {
            Box::pin(on_observed(state, msg))
        });
        router
    }

    /// Register a handler, replacing any previous one for the same event type.
    pub(crate) fn register<F>(&mut self, event_type: FarmEventType, handler: F)
    where
        F: Fn(Arc<FarmState>, FarmMessage) -> BoxFuture + Send + Sync + 'static,
    {
        self.handlers.insert(event_type, Arc::new(handler));
    }

    /// Dispatch a message. Returns `false` if no handler is registered for it.
    pub(crate) async fn dispatch(&self, state: Arc<FarmState>, message: FarmMessage) -> Result<bool> {
        let Some(handler) = self.handlers.get(&message.event_type).cloned() else {
            tracing::trace!(event_type = %message.event_type, "No handler registered");
            return Ok(false);
        };

        handler(state, message).await?;
        Ok(true)
    }
}

/// Another node is leading this round: remember it and answer with a pong.
async fn on_ping(state: Arc<FarmState>, message: FarmMessage) -> Result<()> {
    let Some(local) = state.local_node().await else {
        return Ok(());
    };

    if message.sender == local.name {
        return Ok(());
    }

    tracing::debug!(sender = %message.sender, "Received ping");
    state.mark_pinged();

    state
        .publish(&local.name, FarmEventType::Pong, Some(&message.sender), "")
        .await
}

/// A node answered this node's ping: record it as alive.
async fn on_pong(state: Arc<FarmState>, message: FarmMessage) -> Result<()> {
    let Some(local) = state.local_node().await else {
        return Ok(());
    };

    if message.sender == local.name || !message.is_addressed_to(&local.name) {
        return Ok(());
    }

    let _guard = state.liveness.lock().await;

    let Some(mut sender) = state.registry.find_by_name(&message.sender).await? else {
        tracing::warn!(sender = %message.sender, "Pong from a node that is not registered");
        return Ok(());
    };

    if !sender.is_active {
        state
            .add_log(
                local.id,
                sender.id,
                FarmEventType::Warning,
                &format!("{} was marked inactive but responded to a ping", sender.name),
            )
            .await?;
        tracing::info!(node = %sender.name, "Inactive node responded to a ping, marked active");
    }

    sender.is_active = true;
    sender.last_seen_at = Utc::now();
    state.registry.update(&sender).await
}

async fn on_observed(_state: Arc<FarmState>, message: FarmMessage) -> Result<()> {
    tracing::info!(
        sender = %message.sender,
        event_type = %message.event_type,
        payload = %message.payload,
        "Farm event received"
    );
    Ok(())
}
