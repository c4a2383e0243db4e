//! Testing utilities for Gecko.
//!
//! This module provides configurable components that record what happens to
//! them, making it easy to assert on routing, ordering and lifecycle.
//!
//! # Components
//!
//! - [`Journal`]: shared, ordered log of observations
//! - [`RecordingInterceptor`] / [`RecordingDriver`]: routed components with a
//!   scripted [`Outcome`]
//! - [`RecordingPlugin`]: lifecycle-only component with optional delays
//! - [`ManualTrigger`]: hands its [`Invoker`] to the test through a
//!   [`TriggerSlot`]
//! - [`NullDevice`]: echoes frames back
//!
//! Components read their settings in `on_init`, so the same instances can be
//! created from engine factories and configured from the config tree:
//!
//! | key | used by | meaning |
//! |-----|---------|---------|
//! | `label` | all | name written to the journal |
//! | `topics` | interceptor, driver | topic expressions |
//! | `outcome` | interceptor, driver | `pass`, `drop`, `fail`, `panic` |
//! | `delayMs` | interceptor, driver | sleep before handling |
//! | `startDelayMs` / `stopDelayMs` | plugin, driver | sleep in lifecycle calls |

mod components;

pub use components::{
    Journal, ManualTrigger, NullDevice, Outcome, RecordingDriver, RecordingInterceptor,
    RecordingPlugin, TriggerSlot,
};
