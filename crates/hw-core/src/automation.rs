//! Seam between lifecycle events and stored automations.

use async_trait::async_trait;

use crate::models::{Trigger, User};
use crate::query::Query;

/// Receives lifecycle triggers over the hits they concern.
///
/// Implementations run stored automations and must not fail the caller:
/// errors are logged and dropped.
#[async_trait]
pub trait AutomationHook: Send + Sync {
    async fn on_trigger(&self, query: &Query, trigger: Trigger, user: &User);
}
