//! One-shot, re-armable timer on its own thread.
//!
//! Arming schedules a single tick one period later. The tick callback
//! decides whether to arm again. The timer thread runs a current-thread
//! tokio runtime and sleeps on a [`Notify`] while disarmed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

/// Cloneable arm/disarm switch for a [`RetryTimer`].
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    armed: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl TimerHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a tick one period from now, if one is not already pending.
    pub fn arm(&self) {
        if !self.armed.swap(true, Ordering::SeqCst) {
            trace!("Retry timer armed");
            self.wake.notify_one();
        }
    }

    pub fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::SeqCst)
    }

    /// Consume the pending tick, if any.
    fn take(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }
}

pub struct RetryTimer {
    handle: TimerHandle,
    shutdown: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl RetryTimer {
    /// Spawn the timer thread. `on_tick` runs on that thread, after the
    /// timer has disarmed itself.
    pub fn start<F>(handle: TimerHandle, period: Duration, on_tick: F) -> std::io::Result<Self>
    where
        F: Fn() + Send + 'static,
    {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;

        let shutdown = Arc::new(AtomicBool::new(false));
        let thread_handle = handle.clone();
        let thread_shutdown = shutdown.clone();

        let thread = std::thread::Builder::new()
            .name("ble-write-retry".to_string())
            .spawn(move || {
                runtime.block_on(async move {
                    loop {
                        thread_handle.wake.notified().await;
                        if thread_shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        tokio::time::sleep(period).await;
                        if thread_shutdown.load(Ordering::SeqCst) {
                            break;
                        }
                        if thread_handle.take() {
                            on_tick();
                        }
                    }
                });
                debug!("Retry timer stopped");
            })?;

        Ok(Self {
            handle,
            shutdown,
            thread: Some(thread),
        })
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.handle.wake.notify_one();
        if let Some(thread) = self.thread.take() {
            // The last owner may be dropped from inside a tick.
            if thread.thread().id() != std::thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}
