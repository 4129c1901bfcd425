use crate::agent::persona::{DEFAULT_ROLE, Persona};
use crate::core::NodeValue;
use crate::core::context::SharedContext;
use crate::core::node::NodeLogic;

/// Normalizes the incoming message into `query` and settles the role.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestQuery;

impl IngestQuery {
    pub fn new() -> Self {
        Self
    }
}

impl NodeLogic for IngestQuery {
    fn post(&self, ctx: &mut SharedContext, _prep: NodeValue, _exec: NodeValue) -> Option<String> {
        let query = ctx.input.trim().to_string();
        ctx.query = Some(query);

        if ctx.role.trim().is_empty() {
            ctx.role = DEFAULT_ROLE.to_string();
        } else if !Persona::is_known(&ctx.role) {
            log::warn!("[{}] unknown role '{}', default persona applies", ctx.run_id, ctx.role);
        }
        log::info!("[{}] ingested query for role {}", ctx.run_id, ctx.role);
        None
    }
}
