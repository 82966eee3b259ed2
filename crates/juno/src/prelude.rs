//! `use juno::prelude::*;`

pub use juno_async::{AsyncError, Deferred, LocalScheduler, Scheduler};
pub use juno_core::{RenderMode, Value, json};
pub use juno_dom::{DomBackend, DomEvent, MemoryDom, NodeId};
pub use juno_runtime::{
    ComponentContext, ComponentError, ComponentOutput, Context, Dynamic, HeadlessOptions, HeadlessOutput, Lifecycle,
    LocalState, Node, Props,
};
pub use juno_state::{Middleware, MiddlewareArgs, MiddlewareError, StateChange, StateManager, Subscription, from_fn};

pub use crate::{App, AppConfig, AppOptions, ConfigError};
