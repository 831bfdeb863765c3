//! Runtime Seams
//!
//! Timers and task spawning are injected so services can run under the
//! browser event loop or a test executor.

use std::rc::Rc;
use std::time::Duration;

use futures::future::LocalBoxFuture;
use futures::FutureExt;

/// Asynchronous sleep provider
pub trait Timer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()>;
}

/// Browser timer backed by `setTimeout`
#[derive(Debug, Clone, Copy, Default)]
pub struct GlooTimer;

impl Timer for GlooTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        gloo_timers::future::sleep(duration).boxed_local()
    }
}

/// Fire-and-forget spawning of local (non-Send) tasks
pub type Spawner = Rc<dyn Fn(LocalBoxFuture<'static, ()>)>;

/// Spawner that hands tasks to the Leptos executor
pub fn leptos_spawner() -> Spawner {
    Rc::new(|task: LocalBoxFuture<'static, ()>| leptos::task::spawn_local(task))
}
