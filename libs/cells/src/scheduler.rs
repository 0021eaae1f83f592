//! Timeout-Driven Wait-Queue Scheduler
//!
//! [`CellTimer`] is a process wide timer service. All tasks scheduled on it
//! run on one dedicated thread driving a single threaded tokio runtime, so
//! scheduled work must be short. Each cell owns a [`TimeoutTask`] that
//! periodically asks its nucleus to expire overdue requests.

use crate::error::SchedulerError;
use cell_config::TimeoutSettings;
use cell_network::CellNucleus;
use parking_lot::Mutex;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, Span};

/// Render a panic payload for logging
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Shared periodic timer executing all tasks on one thread
pub struct CellTimer {
    name: String,
    handle: Handle,
    running: AtomicBool,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl CellTimer {
    /// Spawn the timer thread and its runtime
    pub fn start(name: impl Into<String>) -> Result<Arc<Self>, SchedulerError> {
        let name = name.into();
        let startup_error = |message: String| SchedulerError::Startup {
            name: name.clone(),
            message,
        };

        let (handle_tx, handle_rx) = std::sync::mpsc::channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = handle_tx.send(Err(e.to_string()));
                        return;
                    }
                };
                if handle_tx.send(Ok(runtime.handle().clone())).is_err() {
                    return;
                }
                runtime.block_on(async {
                    let _ = shutdown_rx.await;
                });
            })
            .map_err(|e| startup_error(e.to_string()))?;

        let handle = handle_rx
            .recv()
            .map_err(|e| startup_error(e.to_string()))?
            .map_err(startup_error)?;

        info!(timer = %name, "Timer started");
        Ok(Arc::new(Self {
            name,
            handle,
            running: AtomicBool::new(true),
            shutdown: Mutex::new(Some(shutdown_tx)),
            thread: Mutex::new(Some(thread)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Run `task` after `initial_delay` and then every `period`.
    ///
    /// Ticks that are missed because a run took too long are delayed rather
    /// than bunched. A panicking run is logged and the schedule continues.
    pub fn schedule_at_fixed_rate<F>(
        &self,
        initial_delay: Duration,
        period: Duration,
        span: Span,
        task: F,
    ) -> Result<TimerTask, SchedulerError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        if period.is_zero() {
            return Err(SchedulerError::InvalidPeriod);
        }
        if !self.is_running() {
            return Err(SchedulerError::TimerStopped {
                name: self.name.clone(),
            });
        }

        let timer = self.name.clone();
        let join = self.handle.spawn(async move {
            let mut ticks = interval_at(Instant::now() + initial_delay, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                let run = span.in_scope(|| catch_unwind(AssertUnwindSafe(|| task())));
                if let Err(panic) = run {
                    span.in_scope(|| {
                        error!(timer = %timer, "Scheduled task panicked: {}", panic_message(panic.as_ref()))
                    });
                }
            }
        });

        Ok(TimerTask {
            abort: join.abort_handle(),
        })
    }

    /// Stop the timer thread. Scheduled tasks are dropped.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(shutdown) = self.shutdown.lock().take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() != std::thread::current().id() && thread.join().is_err() {
                error!(timer = %self.name, "Timer thread panicked");
            }
        }
        info!(timer = %self.name, "Timer stopped");
    }
}

impl Drop for CellTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for CellTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellTimer")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Handle of a scheduled task; cancelling or dropping it stops the task
#[derive(Debug)]
pub struct TimerTask {
    abort: AbortHandle,
}

impl TimerTask {
    pub fn cancel(self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl Drop for TimerTask {
    fn drop(&mut self) {
        self.abort.abort();
    }
}

/// Periodic wait queue sweep of one cell, started at most once
#[derive(Debug, Default)]
pub struct TimeoutTask {
    started: AtomicBool,
    task: Mutex<Option<TimerTask>>,
}

impl TimeoutTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule the sweep on `timer` under the nucleus diagnostic span
    pub fn start(
        &self,
        timer: &CellTimer,
        nucleus: Arc<dyn CellNucleus>,
        settings: &TimeoutSettings,
    ) -> Result<(), SchedulerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SchedulerError::AlreadyStarted {
                cell: nucleus.cell_name().to_string(),
            });
        }

        let cell = nucleus.cell_name().to_string();
        let span = nucleus.diagnostic_span();
        let task = timer
            .schedule_at_fixed_rate(settings.initial_delay(), settings.interval(), span, move || {
                nucleus.update_wait_queue()
            })
            .inspect_err(|_| self.started.store(false, Ordering::Release))?;

        *self.task.lock() = Some(task);
        debug!(
            cell = %cell,
            initial_delay_ms = settings.initial_delay_ms,
            interval_ms = settings.interval_ms,
            "Wait queue timeout task started"
        );
        Ok(())
    }

    /// Stop the sweep; `false` if it was not running
    pub fn cancel(&self) -> bool {
        match self.task.lock().take() {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn wait_until(condition: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if condition() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_fixed_rate_task_runs_and_cancels() {
        let timer = CellTimer::start("test-timer").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let task = timer
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), Span::none(), move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(wait_until(|| runs.load(Ordering::SeqCst) >= 3));
        task.cancel();
        std::thread::sleep(Duration::from_millis(20));
        let after_cancel = runs.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(runs.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_panicking_task_keeps_running() {
        let timer = CellTimer::start("panic-timer").unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();

        let _task = timer
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_millis(5), Span::none(), move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("first sweep fails");
                }
            })
            .unwrap();

        assert!(wait_until(|| runs.load(Ordering::SeqCst) >= 3));
    }

    #[test]
    fn test_rejects_zero_period_and_stopped_timer() {
        let timer = CellTimer::start("stopping-timer").unwrap();
        let err = timer
            .schedule_at_fixed_rate(Duration::ZERO, Duration::ZERO, Span::none(), || {})
            .unwrap_err();
        assert_eq!(err, SchedulerError::InvalidPeriod);

        timer.shutdown();
        assert!(!timer.is_running());
        let err = timer
            .schedule_at_fixed_rate(Duration::ZERO, Duration::from_secs(1), Span::none(), || {})
            .unwrap_err();
        assert!(matches!(err, SchedulerError::TimerStopped { .. }));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
    }
}
