//! Metrics emitted by the stages.
//!
//! Counters go through the `metrics` facade. No exporter is installed here;
//! an embedding process may install its own recorder, otherwise the calls
//! are no-ops.

pub mod events;

/// Emit an [`events::InternalEvent`].
///
/// # Example
///
/// ```ignore
/// use datum_core::metrics::events::LinksCreated;
///
/// emit!(LinksCreated { count: 1, stage: "pad" });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
