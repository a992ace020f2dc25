//! # Repeater Core
//!
//! Core traits and types for the repeater capture architecture.
//!
//! Every piece of capture and replay logic is expressed as a reducer: a
//! function that takes the current state, one input action and the injected
//! environment, mutates the state in place and describes the side effects the
//! runtime should perform next.
//!
//! ## Core Concepts
//!
//! - **State**: the capture session (history, enabled flag, id counter)
//! - **Action**: every input (host lifecycle events, user commands, replay outcomes)
//! - **Reducer**: `(State, Action, Environment) → (State, Effects)`
//! - **Effect**: a description of asynchronous work (never executed by the reducer)
//! - **Environment**: injected dependencies (clock, transport, settings)
//!
//! ## Example
//!
//! ```ignore
//! use repeater_core::*;
//!
//! impl Reducer for CaptureReducer {
//!     type State = CaptureState;
//!     type Action = CaptureAction;
//!     type Environment = CaptureEnvironment;
//!
//!     fn reduce(
//!         &self,
//!         state: &mut CaptureState,
//!         action: CaptureAction,
//!         env: &CaptureEnvironment,
//!     ) -> SmallVec<[Effect<CaptureAction>; 4]> {
//!         // Capture logic goes here
//!         SmallVec::new()
//!     }
//! }
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{SmallVec, smallvec};

/// Reducer module - The core trait for capture logic
///
/// Reducers are deterministic given their environment:
/// `(State, Action, Environment) → (State, Effects)`
pub mod reducer {
    use super::effect::Effect;
    use smallvec::SmallVec;

    /// The Reducer trait - core abstraction for state transitions
    ///
    /// # Type Parameters
    ///
    /// - `State`: The state this reducer operates on
    /// - `Action`: The action type this reducer processes
    /// - `Environment`: The injected dependencies this reducer needs
    ///
    /// # Example
    ///
    /// ```ignore
    /// impl Reducer for CaptureReducer {
    ///     type State = CaptureState;
    ///     type Action = CaptureAction;
    ///     type Environment = CaptureEnvironment;
    ///
    ///     fn reduce(
    ///         &self,
    ///         state: &mut CaptureState,
    ///         action: CaptureAction,
    ///         env: &CaptureEnvironment,
    ///     ) -> SmallVec<[Effect<CaptureAction>; 4]> {
    ///         match action {
    ///             CaptureAction::ClearHistory => {
    ///                 state.history.clear();
    ///                 SmallVec::new()
    ///             }
    ///             _ => SmallVec::new(),
    ///         }
    ///     }
    /// }
    /// ```
    pub trait Reducer {
        /// The state type this reducer operates on
        type State;

        /// The action type this reducer processes
        type Action;

        /// The environment type with injected dependencies
        type Environment;

        /// Reduce an action into state changes and effects
        ///
        /// 1. Updates state in place
        /// 2. Returns effect descriptions to be executed by the runtime
        ///
        /// # Arguments
        ///
        /// - `state`: Mutable reference to current state
        /// - `action`: The action to process
        /// - `env`: Reference to injected dependencies
        fn reduce(
            &self,
            state: &mut Self::State,
            action: Self::Action,
            env: &Self::Environment,
        ) -> SmallVec<[Effect<Self::Action>; 4]>;
    }
}

/// Effect module - Side effect descriptions
///
/// Effects are values returned from reducers. The runtime executes them and
/// feeds any produced action back into the reducer.
pub mod effect {
    use std::future::Future;
    use std::pin::Pin;

    /// Effect type - describes a side effect to be executed
    ///
    /// # Type Parameters
    ///
    /// - `Action`: The action type that effects can produce (feedback loop)
    pub enum Effect<Action> {
        /// No-op effect
        None,

        /// Arbitrary async computation
        ///
        /// Returns `Option<Action>` - if Some, the action is fed back into the reducer
        Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
    }

    // Manual Debug implementation since Future doesn't implement Debug
    impl<Action> std::fmt::Debug for Effect<Action> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Effect::None => write!(f, "Effect::None"),
                Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
            }
        }
    }

    impl<Action> Effect<Action> {
        /// Wrap a future producing an optional feedback action
        #[must_use]
        pub fn future<F>(fut: F) -> Self
        where
            F: Future<Output = Option<Action>> + Send + 'static,
        {
            Effect::Future(Box::pin(fut))
        }

        /// Returns `true` for [`Effect::None`]
        #[must_use]
        pub const fn is_none(&self) -> bool {
            matches!(self, Effect::None)
        }
    }
}

/// Environment module - Dependency injection traits
///
/// External dependencies are abstracted behind traits and injected via the
/// Environment parameter.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use repeater_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let before = clock.now();
    /// assert!(clock.now() >= before);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`]
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
