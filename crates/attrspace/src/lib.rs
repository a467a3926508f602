//! # `AttributeSpace`
//!
//! In-process change-notification bus for a reactive business application.
//!
//! The data layer publishes attribute and relation changes; UI components
//! subscribe with declarative patterns and receive callbacks for the changes
//! they care about.
//!
//! This crate provides:
//! - **Patterns**: exact-field predicates, attribute-name globs, custom
//!   predicates and the legacy `eventType:entityType` form
//! - **Batching**: per-(subscription, entity, attribute) debounce with a
//!   fixed window where the most recent value wins
//! - **Loop guard**: bounded re-entrant notification chains
//! - **Time**: injectable clocks and a deadline timer service
//!
//! ## Design Principles
//!
//! 1. **Explicit ownership** - the application owns its bus; there is no
//!    global instance
//! 2. **No lock held across callbacks** - subscribers may re-enter the bus
//! 3. **Failure isolation** - a failing subscriber never affects the others
//!    or the publisher
//! 4. **Deterministic time** - batch deadlines come from a [`time::Clock`]
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use attrspace::time::ManualClock;
//! use attrspace::{AttributeChange, AttributeSpace, AttributeSpaceConfig, PatternSpec};
//!
//! let clock = Arc::new(ManualClock::new());
//! let space = AttributeSpace::with_clock(AttributeSpaceConfig::default(), clock.clone())?;
//!
//! space.subscribe(
//!     PatternSpec::new().entity_type("Cliente").attribute_name_pattern("indirizzo_*"),
//!     |n| println!("{} changed ({} updates)", n.event.discriminator(), n.batch_count),
//! )?;
//!
//! space.notify_change(AttributeChange::new("indirizzo_via", "Via Roma").with_entity("Cliente", "c1"));
//! space.notify_change(AttributeChange::new("indirizzo_via", "Via Po").with_entity("Cliente", "c1"));
//!
//! clock.advance(Duration::from_millis(50));
//! assert_eq!(space.poll_timers(), 1);
//! # Ok::<(), attrspace::Error>(())
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod subscription;
pub mod time;

// Re-export key types
pub use config::AttributeSpaceConfig;
pub use subscription::{
    AttributeChange, AttributeSpace, BatchTimerDriver, BusStats, CallbackError, ChangeCallback,
    ChangeEvent, ChangeType, EventKind, Notification, PatternError, PatternSpec, RelationChange,
    SubscriptionHandle, SubscriptionId, SubscriptionInfo,
};

/// Result type for attrspace operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for attrspace
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Pattern could not be built or compiled
    #[error("Invalid pattern: {0}")]
    InvalidPattern(#[from] PatternError),

    /// Transport payload is not a valid change event
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration rejected by validation
    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    /// The bus has been shut down
    #[error("Attribute space has been shut down")]
    ShutDown,
}
