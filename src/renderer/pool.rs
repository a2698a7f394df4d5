//! Fixed-size pool of reusable rendering-engine instances.
//!
//! Launching a browser engine is expensive; the pool amortizes that cost by
//! keeping `size` instances alive and handing them out to concurrent render
//! calls. An instance that errors during use is closed and replaced so the
//! pool never shrinks.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("renderer pool not started")]
    NotStarted,
}

/// One reusable rendering-engine instance.
#[async_trait]
pub trait RenderEngine: Send + Sync + 'static {
    /// Close the engine. Called for suspect instances and during shutdown.
    async fn close(&mut self) -> Result<()>;
}

/// Launches fresh engine instances for the pool.
#[async_trait]
pub trait EngineLauncher: Send + Sync + 'static {
    type Engine: RenderEngine;

    async fn launch(&self) -> Result<Self::Engine>;
}

struct PoolState<E> {
    /// Idle instances ready for checkout.
    available: VecDeque<E>,
    /// Permit count mirrors `available.len()`. Closed on stop so blocked
    /// waiters fail fast instead of hanging.
    slots: Arc<Semaphore>,
    /// Instances owed after a replacement launch failed; made up on later
    /// pool operations so the pool returns to its configured size.
    deficit: usize,
}

/// Fixed-size engine pool. `None` state means not started.
pub struct RenderPool<L: EngineLauncher> {
    launcher: L,
    size: usize,
    state: Mutex<Option<PoolState<L::Engine>>>,
}

impl<L: EngineLauncher> RenderPool<L> {
    #[must_use]
    pub fn new(launcher: L, size: usize) -> Self {
        Self {
            launcher,
            size,
            state: Mutex::new(None),
        }
    }

    /// Launch all engine instances and open the pool.
    ///
    /// Idempotent: calling `start` on a started pool is a logged no-op. If
    /// any launch fails, already-launched instances are closed and the pool
    /// stays in the not-started state.
    ///
    /// # Errors
    ///
    /// Returns an error if an engine instance fails to launch.
    pub async fn start(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            warn!("Renderer pool already started, ignoring start() call");
            return Ok(());
        }

        info!(size = self.size, "Starting renderer pool");

        let mut available: VecDeque<L::Engine> = VecDeque::with_capacity(self.size);
        for i in 0..self.size {
            match self.launcher.launch().await {
                Ok(engine) => {
                    debug!(instance = i + 1, total = self.size, "Launched rendering engine");
                    available.push_back(engine);
                }
                Err(e) => {
                    for mut engine in available {
                        if let Err(close_err) = engine.close().await {
                            warn!(
                                error = %format!("{close_err:#}"),
                                "Error closing engine during aborted startup"
                            );
                        }
                    }
                    return Err(e.context(format!(
                        "Failed to launch rendering engine {}/{}",
                        i + 1,
                        self.size
                    )));
                }
            }
        }

        let slots = Arc::new(Semaphore::new(available.len()));
        *guard = Some(PoolState {
            available,
            slots,
            deficit: 0,
        });
        info!("Renderer pool startup complete");
        Ok(())
    }

    /// Close every instance and return to the not-started state.
    ///
    /// Idempotent. Per-instance close failures are logged and do not abort
    /// the shutdown of the remaining instances.
    pub async fn stop(&self) {
        let state = self.state.lock().await.take();
        let Some(mut state) = state else {
            return;
        };

        info!("Shutting down renderer pool");
        // Wake tasks blocked in checkout with a closed-pool error.
        state.slots.close();

        let mut closed = 0_usize;
        while let Some(mut engine) = state.available.pop_front() {
            match engine.close().await {
                Ok(()) => closed += 1,
                Err(e) => warn!(error = %format!("{e:#}"), "Error closing rendering engine"),
            }
        }
        info!(closed, "Renderer pool shutdown complete");
    }

    /// Run `f` with an engine checked out of the pool.
    ///
    /// Blocks until an instance is free. The instance is returned to the
    /// pool on success; if `f` fails the instance is treated as corrupted,
    /// closed, replaced with a fresh launch, and the original error is
    /// returned to the caller.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::NotStarted`] when called before `start` or after
    /// `stop`, otherwise whatever error `f` produced.
    pub async fn with_engine<T, F>(&self, f: F) -> Result<T>
    where
        T: Send,
        F: for<'a> FnOnce(&'a L::Engine) -> BoxFuture<'a, Result<T>> + Send,
    {
        self.replenish().await;
        let engine = self.checkout().await?;

        match f(&engine).await {
            Ok(value) => {
                self.give_back(engine).await;
                Ok(value)
            }
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    "Engine error during use, replacing instance"
                );
                self.replace_engine(engine).await;
                Err(e)
            }
        }
    }

    /// Number of idle instances. Zero when the pool is not started.
    pub async fn available(&self) -> usize {
        let guard = self.state.lock().await;
        guard.as_ref().map_or(0, |s| s.slots.available_permits())
    }

    /// Whether `start` has completed and `stop` has not run since.
    pub async fn is_started(&self) -> bool {
        self.state.lock().await.is_some()
    }

    async fn checkout(&self) -> Result<L::Engine> {
        let slots = {
            let guard = self.state.lock().await;
            let Some(state) = guard.as_ref() else {
                return Err(PoolError::NotStarted.into());
            };
            state.slots.clone()
        };

        // Block here until an instance is free; a closed semaphore means the
        // pool was stopped while we waited.
        let permit = slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolError::NotStarted)?;

        let mut guard = self.state.lock().await;
        let Some(state) = guard.as_mut() else {
            return Err(PoolError::NotStarted.into());
        };
        if !Arc::ptr_eq(&state.slots, &slots) {
            // Pool was stopped and restarted while we held the old permit.
            return Err(PoolError::NotStarted.into());
        }

        let Some(engine) = state.available.pop_front() else {
            return Err(PoolError::NotStarted.into());
        };
        // Queue length and permit count move together.
        permit.forget();
        Ok(engine)
    }

    async fn give_back(&self, engine: L::Engine) {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.as_mut() {
            state.available.push_back(engine);
            state.slots.add_permits(1);
        } else {
            drop(guard);
            // Pool stopped while this instance was out.
            let mut engine = engine;
            if let Err(e) = engine.close().await {
                warn!(error = %format!("{e:#}"), "Error closing engine returned after stop");
            }
        }
    }

    /// Swap out a suspect instance for a freshly launched one.
    async fn replace_engine(&self, mut faulty: L::Engine) {
        if let Err(e) = faulty.close().await {
            debug!(error = %format!("{e:#}"), "Error closing faulty engine");
        }

        match self.launcher.launch().await {
            Ok(replacement) => {
                info!("Relaunched rendering engine after error");
                self.give_back(replacement).await;
            }
            Err(e) => {
                warn!(
                    error = %format!("{e:#}"),
                    "Failed to relaunch rendering engine, will retry on a later checkout"
                );
                let mut guard = self.state.lock().await;
                if let Some(state) = guard.as_mut() {
                    state.deficit += 1;
                }
            }
        }
    }

    /// Launch engines owed from failed replacements. The lock is not held
    /// across launches.
    async fn replenish(&self) {
        loop {
            {
                let mut guard = self.state.lock().await;
                let Some(state) = guard.as_mut() else { return };
                if state.deficit == 0 {
                    return;
                }
                state.deficit -= 1;
            }

            match self.launcher.launch().await {
                Ok(engine) => {
                    info!("Recovered missing rendering engine");
                    self.give_back(engine).await;
                }
                Err(e) => {
                    debug!(error = %format!("{e:#}"), "Engine recovery launch failed");
                    let mut guard = self.state.lock().await;
                    if let Some(state) = guard.as_mut() {
                        state.deficit += 1;
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct TestEngine;

    #[async_trait]
    impl RenderEngine for TestEngine {
        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct TestLauncher {
        launched: AtomicUsize,
        fail_next: AtomicBool,
    }

    #[async_trait]
    impl EngineLauncher for Arc<TestLauncher> {
        type Engine = TestEngine;

        async fn launch(&self) -> Result<TestEngine> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("launch refused");
            }
            self.launched.fetch_add(1, Ordering::SeqCst);
            Ok(TestEngine)
        }
    }

    fn test_pool(size: usize) -> (Arc<TestLauncher>, RenderPool<Arc<TestLauncher>>) {
        let launcher = Arc::new(TestLauncher::default());
        let pool = RenderPool::new(launcher.clone(), size);
        (launcher, pool)
    }

    #[tokio::test]
    async fn test_start_launches_exactly_size_instances() {
        let (launcher, pool) = test_pool(3);
        pool.start().await.expect("start");

        assert_eq!(launcher.launched.load(Ordering::SeqCst), 3);
        assert_eq!(pool.available().await, 3);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (launcher, pool) = test_pool(2);
        pool.start().await.expect("start");
        pool.start().await.expect("second start");

        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_use_launches_no_extra_instances() {
        let (launcher, pool) = test_pool(2);
        pool.start().await.expect("start");

        for _ in 0..4 {
            pool.with_engine(|_e| async { Ok(()) }.boxed())
                .await
                .expect("render");
        }

        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
        assert_eq!(pool.available().await, 2);
    }

    #[tokio::test]
    async fn test_error_replaces_exactly_one_instance() {
        let (launcher, pool) = test_pool(2);
        pool.start().await.expect("start");

        let result: Result<()> = pool
            .with_engine(|_e| async { anyhow::bail!("render exploded") }.boxed())
            .await;

        assert!(result.is_err());
        assert_eq!(result.unwrap_err().to_string(), "render exploded");
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 3);
        assert_eq!(pool.available().await, 2);
    }

    #[tokio::test]
    async fn test_failed_replacement_is_recovered_later() {
        let (launcher, pool) = test_pool(1);
        pool.start().await.expect("start");

        launcher.fail_next.store(true, Ordering::SeqCst);
        let result: Result<()> = pool
            .with_engine(|_e| async { anyhow::bail!("render exploded") }.boxed())
            .await;
        assert!(result.is_err());
        assert_eq!(pool.available().await, 0);

        // The next call makes up the missing instance before rendering.
        pool.with_engine(|_e| async { Ok(()) }.boxed())
            .await
            .expect("render after recovery");
        assert_eq!(pool.available().await, 1);
        assert_eq!(launcher.launched.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_with_engine_before_start_fails_fast() {
        let (_launcher, pool) = test_pool(1);

        let result: Result<()> = pool.with_engine(|_e| async { Ok(()) }.boxed()).await;
        let err = result.expect_err("should fail before start");
        assert!(err.downcast_ref::<PoolError>().is_some());
    }

    #[tokio::test]
    async fn test_with_engine_after_stop_fails_fast() {
        let (_launcher, pool) = test_pool(1);
        pool.start().await.expect("start");
        pool.stop().await;
        pool.stop().await; // idempotent

        assert!(!pool.is_started().await);
        let result: Result<()> = pool.with_engine(|_e| async { Ok(()) }.boxed()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_checkout_blocks_until_instance_free() {
        let (_launcher, pool) = test_pool(1);
        pool.start().await.expect("start");
        let pool = Arc::new(pool);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let holder = {
            let pool = pool.clone();
            tokio::spawn(async move {
                pool.with_engine(move |_e| {
                    async move {
                        let _ = release_rx.await;
                        Ok(())
                    }
                    .boxed()
                })
                .await
            })
        };

        // Give the holder time to check the engine out.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(pool.available().await, 0);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.with_engine(|_e| async { Ok(42) }.boxed()).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        release_tx.send(()).expect("release holder");
        holder.await.expect("join holder").expect("holder result");
        let value = waiter.await.expect("join waiter").expect("waiter result");
        assert_eq!(value, 42);
        assert_eq!(pool.available().await, 1);
    }
}
