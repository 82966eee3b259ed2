//! [`Scheduler`] on the browser's microtask queue.

use futures::future::LocalBoxFuture;
use juno_async::Scheduler;

/// Runs tasks with `wasm_bindgen_futures::spawn_local`, so a deferred task
/// starts once the current JS task has returned.
#[derive(Debug, Default, Clone, Copy)]
pub struct WasmScheduler;

impl Scheduler for WasmScheduler {
    fn spawn_local(&self, future: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(future);
    }
}
