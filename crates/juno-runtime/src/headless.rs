//! Headless components: instances with an api and no DOM node.
//!
//! A headless component is identified by its registered name. Initializing
//! it calls its function once with a [`ComponentContext`] whose id is the
//! name, so its local state lives under `__local.<name>`. Re-initializing
//! destroys the previous instance first.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::component::{ComponentContext, LOCAL_STATE_ROOT};
use crate::context::Context;
use crate::error::{ComponentError, panic_message};

/// A registered headless component.
pub type HeadlessFn = Rc<dyn Fn(&ComponentContext) -> Result<HeadlessOutput, ComponentError>>;

/// What a headless component function returns.
#[derive(Clone, Default)]
pub struct HeadlessOutput {
    api: Option<Rc<dyn Any>>,
    on_destroy: Option<Rc<dyn Fn()>>,
}

impl HeadlessOutput {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Value shared with every other component through
    /// [`Components::headless_api`](crate::Components::headless_api).
    #[must_use]
    pub fn api<T: Any>(mut self, api: T) -> Self {
        self.api = Some(Rc::new(api));
        self
    }

    #[must_use]
    pub fn on_destroy(mut self, hook: impl Fn() + 'static) -> Self {
        self.on_destroy = Some(Rc::new(hook));
        self
    }
}

impl fmt::Debug for HeadlessOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessOutput")
            .field("api", &self.api.is_some())
            .field("on_destroy", &self.on_destroy.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HeadlessOptions {
    /// Initialize as soon as the component is registered.
    pub auto_init: bool,
}

impl HeadlessOptions {
    #[must_use]
    pub const fn auto_init() -> Self {
        Self { auto_init: true }
    }
}

/// Snapshot of one headless component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadlessStatus {
    pub name: String,
    pub id: Option<String>,
    pub initialized: bool,
    pub auto_init: bool,
    pub has_api: bool,
}

struct Definition {
    component: HeadlessFn,
    options: HeadlessOptions,
}

struct Live {
    output: HeadlessOutput,
    local_paths: Rc<RefCell<Vec<String>>>,
}

#[derive(Default)]
pub(crate) struct HeadlessManager {
    definitions: BTreeMap<String, Definition>,
    live: BTreeMap<String, Live>,
}

impl HeadlessManager {
    pub(crate) fn status_of(&self, name: &str) -> Option<HeadlessStatus> {
        let definition = self.definitions.get(name)?;
        let live = self.live.get(name);
        Some(HeadlessStatus {
            name: name.to_owned(),
            id: live.map(|_| name.to_owned()),
            initialized: live.is_some(),
            auto_init: definition.options.auto_init,
            has_api: live.is_some_and(|l| l.output.api.is_some()),
        })
    }

    pub(crate) fn status(&self) -> Vec<HeadlessStatus> {
        self.definitions
            .keys()
            .filter_map(|name| self.status_of(name))
            .collect()
    }

    pub(crate) fn api(&self, name: &str) -> Option<Rc<dyn Any>> {
        self.live.get(name)?.output.api.clone()
    }

    pub(crate) fn all_apis(&self) -> Vec<(String, Rc<dyn Any>)> {
        self.live
            .iter()
            .filter_map(|(name, l)| l.output.api.clone().map(|api| (name.clone(), api)))
            .collect()
    }
}

pub(crate) fn register(ctx: &Context, name: &str, component: HeadlessFn, options: HeadlessOptions) {
    ctx.rt
        .headless
        .borrow_mut()
        .definitions
        .insert(name.to_owned(), Definition { component, options });
    debug!(headless = name, auto_init = options.auto_init, "headless registered");
    if options.auto_init {
        if let Err(err) = init(ctx, name) {
            error!(headless = name, %err, "headless auto-init failed");
        }
    }
}

pub(crate) fn init(ctx: &Context, name: &str) -> Result<(), ComponentError> {
    let component = {
        let manager = ctx.rt.headless.borrow();
        if manager.live.contains_key(name) {
            return Ok(());
        }
        let definition = manager
            .definitions
            .get(name)
            .ok_or_else(|| ComponentError::NotRegistered(name.to_owned()))?;
        Rc::clone(&definition.component)
    };

    let local_paths = Rc::new(RefCell::new(Vec::new()));
    let cctx = ComponentContext::new(ctx, name.to_owned(), Rc::clone(&local_paths));
    let output = ctx
        .state()
        .untracked(|| catch_unwind(AssertUnwindSafe(|| component(&cctx))))
        .unwrap_or_else(|payload| Err(ComponentError::Panicked(panic_message(&*payload))));

    match output {
        Ok(output) => {
            ctx.rt
                .headless
                .borrow_mut()
                .live
                .insert(name.to_owned(), Live { output, local_paths });
            debug!(headless = name, "headless initialized");
            Ok(())
        }
        Err(err) => {
            drop_local_state(ctx, name, &local_paths);
            error!(headless = name, %err, "headless init failed");
            Err(err)
        }
    }
}

pub(crate) fn reinit(ctx: &Context, name: &str) -> Result<(), ComponentError> {
    destroy(ctx, name);
    init(ctx, name)
}

fn destroy(ctx: &Context, name: &str) {
    let Some(live) = ctx.rt.headless.borrow_mut().live.remove(name) else {
        return;
    };
    if let Some(hook) = &live.output.on_destroy {
        if let Err(payload) = catch_unwind(AssertUnwindSafe(|| hook())) {
            error!(headless = name, panic = %panic_message(&*payload), "on_destroy panicked");
        }
    }
    drop_local_state(ctx, name, &live.local_paths);
    debug!(headless = name, "headless destroyed");
}

fn drop_local_state(ctx: &Context, name: &str, local_paths: &RefCell<Vec<String>>) {
    let paths = std::mem::take(&mut *local_paths.borrow_mut());
    for path in &paths {
        ctx.state().remove_state(path);
    }
    ctx.state().remove_state(&format!("{LOCAL_STATE_ROOT}.{name}"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestHarness;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::cell::Cell;

    struct Auth {
        user: String,
    }

    #[test]
    fn auto_init_exposes_api() {
        let h = TestHarness::new(json!({}));
        h.ctx.components().register_headless(
            "auth",
            |_cx| Ok(HeadlessOutput::new().api(Auth { user: "ana".into() })),
            HeadlessOptions::auto_init(),
        );
        let auth = h.ctx.components().headless_api::<Auth>("auth").unwrap();
        assert_eq!(auth.user, "ana");
        assert_eq!(h.ctx.components().all_headless_apis().len(), 1);
        assert!(h.ctx.components().headless_api::<String>("auth").is_none());
    }

    #[test]
    fn init_is_idempotent_and_reinit_replaces() {
        let h = TestHarness::new(json!({}));
        let calls = Rc::new(Cell::new(0));
        let destroyed = Rc::new(Cell::new(0));
        let (c, d) = (Rc::clone(&calls), Rc::clone(&destroyed));
        h.ctx.components().register_headless(
            "clock",
            move |cx| {
                c.set(c.get() + 1);
                cx.new_state("ticks", 0);
                let d = Rc::clone(&d);
                Ok(HeadlessOutput::new().on_destroy(move || d.set(d.get() + 1)))
            },
            HeadlessOptions::default(),
        );
        assert!(!h.ctx.components().get_headless("clock").unwrap().initialized);

        h.ctx.components().init_headless("clock").unwrap();
        h.ctx.components().init_headless("clock").unwrap();
        assert_eq!(calls.get(), 1);
        h.ctx.set_state("__local.clock.ticks", 5);

        h.ctx.components().reinit_headless("clock").unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(destroyed.get(), 1);
        assert_eq!(h.ctx.get_state("__local.clock.ticks"), Some(json!(0)));

        let status = h.ctx.utils().headless_status();
        assert_eq!(
            status,
            vec![HeadlessStatus {
                name: "clock".into(),
                id: Some("clock".into()),
                initialized: true,
                auto_init: false,
                has_api: false,
            }]
        );
    }

    #[test]
    fn unknown_and_failing_components_report_errors() {
        let h = TestHarness::new(json!({}));
        assert_eq!(
            h.ctx.components().init_headless("ghost"),
            Err(ComponentError::NotRegistered("ghost".into()))
        );
        h.ctx.components().register_headless(
            "broken",
            |_cx| Err(ComponentError::failed("offline")),
            HeadlessOptions::default(),
        );
        assert!(h.ctx.components().init_headless("broken").is_err());
        assert!(!h.ctx.components().get_headless("broken").unwrap().initialized);
    }

    #[test]
    fn options_deserialize_camel_case() {
        let options: HeadlessOptions = serde_json::from_value(json!({"autoInit": true})).unwrap();
        assert!(options.auto_init);
        let options: HeadlessOptions = serde_json::from_value(json!({})).unwrap();
        assert!(!options.auto_init);
    }
}
