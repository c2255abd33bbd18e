use std::future::Future;
use std::time::Duration;

use futures::future::{AbortHandle, Abortable};

/// Platform-independent helper to spawn an async task that runs in the background.
#[cfg(target_arch = "wasm32")]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + 'static,
{
    wasm_bindgen_futures::spawn_local(future);
}

/// Platform-independent helper to spawn an async task that runs in the background.
///
/// Inside a Tokio runtime the task joins that runtime; otherwise it is driven
/// to completion on a dedicated thread with its own current-thread runtime.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_detached<F>(future: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    use tokio::runtime::{Builder, Handle};

    if let Ok(handle) = Handle::try_current() {
        handle.spawn(future);
        return;
    }

    std::thread::spawn(move || {
        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime.block_on(future),
            Err(err) => eprintln!("failed to build background tokio runtime: {err}"),
        }
    });
}

/// Spawns `future` in the background and returns a handle that stops it at
/// its next suspension point.
#[cfg(not(target_arch = "wasm32"))]
pub fn spawn_abortable<F>(future: F) -> AbortHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let (handle, registration) = AbortHandle::new_pair();
    spawn_detached(async move {
        let _ = Abortable::new(future, registration).await;
    });
    handle
}

/// Spawns `future` in the background and returns a handle that stops it at
/// its next suspension point.
#[cfg(target_arch = "wasm32")]
pub fn spawn_abortable<F>(future: F) -> AbortHandle
where
    F: Future<Output = ()> + 'static,
{
    let (handle, registration) = AbortHandle::new_pair();
    spawn_detached(async move {
        let _ = Abortable::new(future, registration).await;
    });
    handle
}

/// Asynchronously waits for the provided duration in a platform-compatible way.
pub async fn sleep(duration: Duration) {
    if duration.is_zero() {
        return;
    }

    sleep_impl(duration).await;
}

#[cfg(target_arch = "wasm32")]
async fn sleep_impl(duration: Duration) {
    use gloo_timers::future::sleep;
    sleep(duration).await;
}

#[cfg(not(target_arch = "wasm32"))]
async fn sleep_impl(duration: Duration) {
    use tokio::time::sleep;
    sleep(duration).await;
}
