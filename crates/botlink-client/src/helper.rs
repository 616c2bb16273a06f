//! Helpers that claim additional inbound message types.
//!
//! A helper declares the message types it understands. Inbound messages whose
//! type the engine does not handle itself are routed to the helper that
//! claimed them.

use std::collections::HashMap;
use std::sync::Arc;

use botlink_core::SessionError;
use botlink_core::protocol::InboundEnvelope;

/// Extension that handles message types outside the core protocol.
pub trait ClientHelper: Send + Sync {
    /// Unique registration name.
    fn name(&self) -> &str;

    /// Message types routed to this helper.
    fn message_types(&self) -> Vec<String>;

    /// Handle one message. Runs on the execution context.
    fn handle_message(&self, msg: &InboundEnvelope);
}

#[derive(Default)]
pub(crate) struct HelperRegistry {
    helpers: HashMap<String, Arc<dyn ClientHelper>>,
    by_type: HashMap<String, String>,
}

impl HelperRegistry {
    pub(crate) fn register(&mut self, helper: Arc<dyn ClientHelper>) -> Result<(), SessionError> {
        let name = helper.name().to_string();
        if self.helpers.contains_key(&name) {
            return Err(SessionError::other(format!("helper already registered: {name}")));
        }
        let types = helper.message_types();
        if let Some(taken) = types.iter().find(|t| self.by_type.contains_key(*t)) {
            return Err(SessionError::other(format!(
                "message type '{taken}' already claimed by helper '{}'",
                self.by_type[taken]
            )));
        }
        for msg_type in types {
            let _ = self.by_type.insert(msg_type, name.clone());
        }
        let _ = self.helpers.insert(name, helper);
        Ok(())
    }

    pub(crate) fn unregister(&mut self, name: &str) -> Result<(), SessionError> {
        if self.helpers.remove(name).is_none() {
            return Err(SessionError::HelperNotRegistered);
        }
        self.by_type.retain(|_, owner| owner != name);
        Ok(())
    }

    pub(crate) fn find(&self, msg_type: &str) -> Option<Arc<dyn ClientHelper>> {
        let name = self.by_type.get(msg_type)?;
        self.helpers.get(name).cloned()
    }
}
