//! # Change Notification Bus
//!
//! Routes attribute and relation change events from the data layer to
//! pattern-matched subscribers.
//!
//! ## Components
//!
//! - **Events**: [`ChangeEvent`] tagged union of [`AttributeChange`] and
//!   [`RelationChange`]; callbacks receive a [`Notification`].
//! - **Patterns**: [`PatternSpec`] declares exact fields, an attribute-name
//!   glob and an optional custom predicate; compiled once per subscription.
//! - **Registry**: [`SubscriptionRegistry`] hands out copy-on-iterate
//!   snapshots so callbacks can mutate subscriptions mid-dispatch.
//! - **Batching**: [`NotificationBatcher`] merges rapid changes per
//!   (subscription, entity, attribute) inside a fixed window.
//! - **Loop guard**: [`LoopGuard`] bounds re-entrant notification chains.
//! - **Bus**: [`AttributeSpace`] ties the pieces together;
//!   [`BatchTimerDriver`] polls its batch timers on a tokio runtime.

mod batcher;
mod callback;
mod dispatcher;
mod driver;
mod event;
mod filter;
mod guard;
mod handle;
mod registry;

pub use batcher::{BatchEntry, BatchKey, BatchOutcome, NotificationBatcher};
pub use callback::{CallbackError, ChangeCallback};
pub use dispatcher::{AttributeSpace, BusMetrics, BusStats};
pub use driver::BatchTimerDriver;
pub use event::{
    AttributeChange, ChangeEvent, ChangeType, EventKind, FieldRef, Notification, RelationChange,
};
pub use filter::{
    glob_to_regex, matches, CompiledPattern, CustomPredicate, PatternError, PatternSpec,
};
pub use guard::{Admission, ChainScope, ChainState, LoopGuard};
pub use handle::SubscriptionHandle;
pub use registry::{SubscriptionEntry, SubscriptionId, SubscriptionInfo, SubscriptionRegistry};
