//! Handle passed to population factories.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::options::{PendingOptions, Priority};

/// Per-population handle given to a `get_or_populate` factory.
///
/// Lets the factory adjust how its result is stored once it knows more about
/// the value (e.g. a short duration for an empty result). Adjustments are
/// collected as [`PendingOptions`] and only applied when the result is
/// committed; they take precedence over caller and default options.
///
/// ```ignore
/// cache
///     .get_or_populate("user:42", |scope, ctx| async move {
///         let user = scope.load_user(42).await?;
///         if user.is_guest() {
///             ctx.set_duration(Duration::from_secs(30));
///         }
///         Ok::<_, MyError>(user)
///     }, None, &cancel)
///     .await?;
/// ```
#[derive(Debug, Clone)]
pub struct PopulationContext {
    key: Arc<str>,
    cancellation: CancellationToken,
    pending: Arc<Mutex<PendingOptions>>,
}

impl PopulationContext {
    pub(crate) fn new(key: &str, cancellation: CancellationToken) -> Self {
        Self {
            key: Arc::from(key),
            cancellation,
            pending: Arc::new(Mutex::new(PendingOptions::default())),
        }
    }

    /// The normalized key being populated.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cancellation signal of this population.
    ///
    /// Fires when the cache shuts down; an individual caller abandoning its
    /// wait does not cancel a population other callers may still need.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Override the duration the result is stored for.
    pub fn set_duration(&self, duration: Duration) {
        self.pending.lock().duration = Some(duration);
    }

    /// Override the priority the result is stored with.
    pub fn set_priority(&self, priority: Priority) {
        self.pending.lock().priority = Some(priority);
    }

    /// Options requested so far.
    pub(crate) fn pending(&self) -> PendingOptions {
        *self.pending.lock()
    }
}
