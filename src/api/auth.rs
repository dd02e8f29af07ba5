//! The `AuthContext` seam the `SubscriberGateway` checks before handing a
//! caller an execution's event stream. Real authentication/authorization is
//! an external collaborator; this crate only defines the interface and
//! ships an always-allow stub, the way a workspace/tenant layer would be
//! wired in by the deployment that needs one.

pub trait AuthContext: Send + Sync {
    /// Whether the current caller may subscribe to events for a workflow
    /// owned by `owner`.
    fn authorize(&self, owner: &str) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl AuthContext for AllowAll {
    fn authorize(&self, _owner: &str) -> bool {
        true
    }
}
