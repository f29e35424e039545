/// Errors surfaced by [`crate::HubHandle`].
///
/// Delivery never fails from the caller's point of view; only operations that
/// need an answer from the event loop can observe that it has stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    /// The event loop has shut down.
    #[error("notification hub is closed")]
    Closed,
}
