use refundgate_core::Actor;

/// Actor context for a request.
///
/// Every transition is recorded against this identity; the middleware
/// guarantees it is present on all protected routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    actor: Actor,
}

impl ActorContext {
    pub fn new(actor: Actor) -> Self {
        Self { actor }
    }

    pub fn actor(&self) -> &Actor {
        &self.actor
    }
}
