//! cooperative, tick-driven execution: every task is a non-blocking unit
//! re-invoked by a shared worker loop. suspension is "no progress this
//! tick", never a blocking wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::utils::thread;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Progress {
    DidWork,
    Idle,
    /// the task finished and must not be scheduled again
    Done,
}

pub trait TickTask: Send {
    fn name(&self) -> String;

    fn tick(&mut self) -> anyhow::Result<Progress>;
}

pub type FailureHook = Arc<dyn Fn(anyhow::Error) + Send + Sync>;

/// per-job scheduler: worker threads re-invoke registered tasks until the
/// job completes or is torn down. the first task error escalates through the
/// failure hook and stops the whole job's scheduling.
pub struct TaskScheduler {
    name: String,
    pending: Mutex<Vec<Box<dyn TickTask>>>,
    shutdown: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    failure_hook: Mutex<Option<FailureHook>>,
    handles: Mutex<Vec<std::thread::JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(name: &str) -> Self {
        TaskScheduler {
            name: name.to_string(),
            pending: Mutex::new(Vec::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            failed: Arc::new(AtomicBool::new(false)),
            failure_hook: Mutex::new(None),
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn set_failure_hook(&self, hook: FailureHook) {
        *self.failure_hook.lock().unwrap() = Some(hook);
    }

    pub fn register(&self, task: Box<dyn TickTask>) {
        debug!("register task {} with scheduler {}", task.name(), self.name);
        self.pending.lock().unwrap().push(task);
    }

    /// drain the registered tasks, partition them round-robin over worker
    /// threads and start ticking
    pub fn start(&self) {
        static PANIC_HOOK: std::sync::Once = std::sync::Once::new();
        PANIC_HOOK.call_once(crate::utils::panic::panic_notify);

        let tasks: Vec<Box<dyn TickTask>> = self.pending.lock().unwrap().drain(..).collect();
        if tasks.is_empty() {
            return;
        }

        let worker_count = std::cmp::min(num_cpus::get().max(1), tasks.len());
        let mut partitions: Vec<Vec<Box<dyn TickTask>>> = Vec::new();
        for _ in 0..worker_count {
            partitions.push(Vec::new());
        }
        for (index, task) in tasks.into_iter().enumerate() {
            partitions[index % worker_count].push(task);
        }

        info!(
            "scheduler {} starting {} workers",
            self.name, worker_count
        );

        let mut handles = self.handles.lock().unwrap();
        for (worker_index, partition) in partitions.into_iter().enumerate() {
            let shutdown = self.shutdown.clone();
            let failed = self.failed.clone();
            let failure_hook = self.failure_hook.lock().unwrap().clone();
            let worker_name = format!("{}-worker-{}", self.name, worker_index);

            let handle = thread::spawn(worker_name.as_str(), move || {
                worker_loop(partition, shutdown, failed, failure_hook);
            });
            handles.push(handle);
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// job-granular teardown: stop scheduling, drop every task so sockets
    /// and memory blocks are released
    pub fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("scheduler {} shutting down", self.name);

        let handles: Vec<std::thread::JoinHandle<()>> =
            self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }
        self.pending.lock().unwrap().clear();
    }
}

fn worker_loop(
    mut tasks: Vec<Box<dyn TickTask>>,
    shutdown: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    failure_hook: Option<FailureHook>,
) {
    let mut idle_counter = 0u32;

    while !shutdown.load(Ordering::Acquire) {
        let mut progressed = false;

        tasks.retain_mut(|task| match task.tick() {
            Ok(Progress::DidWork) => {
                progressed = true;
                true
            }
            Ok(Progress::Idle) => true,
            Ok(Progress::Done) => {
                debug!("task {} done", task.name());
                progressed = true;
                false
            }
            Err(e) => {
                error!("task {} error. {}", task.name(), e);
                if !failed.swap(true, Ordering::AcqRel) {
                    if let Some(hook) = &failure_hook {
                        hook(e);
                    }
                }
                false
            }
        });

        if tasks.is_empty() {
            break;
        }

        if progressed {
            idle_counter = 0;
        } else {
            idle_counter += 1;
            // empty loop tolerate
            if idle_counter < 30 {
                std::thread::yield_now();
            } else if idle_counter < 1000 {
                std::thread::sleep(Duration::from_millis(1));
            } else {
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::runtime::executor::{Progress, TaskScheduler, TickTask};

    struct CountDownTask {
        remaining: usize,
        ticks: Arc<AtomicUsize>,
    }

    impl TickTask for CountDownTask {
        fn name(&self) -> String {
            "count-down".to_string()
        }

        fn tick(&mut self) -> anyhow::Result<Progress> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            self.remaining -= 1;
            if self.remaining == 0 {
                Ok(Progress::Done)
            } else {
                Ok(Progress::DidWork)
            }
        }
    }

    #[test]
    pub fn tasks_run_to_done_test() {
        let scheduler = TaskScheduler::new("test");
        let ticks = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            scheduler.register(Box::new(CountDownTask {
                remaining: 5,
                ticks: ticks.clone(),
            }));
        }
        scheduler.start();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 20 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(ticks.load(Ordering::SeqCst), 20);
        scheduler.shutdown();
    }

    struct FailingTask;

    impl TickTask for FailingTask {
        fn name(&self) -> String {
            "failing".to_string()
        }

        fn tick(&mut self) -> anyhow::Result<Progress> {
            Err(anyhow!("unit of work exploded"))
        }
    }

    #[test]
    pub fn failure_hook_fires_once_test() {
        let scheduler = TaskScheduler::new("failing");
        let failures = Arc::new(AtomicUsize::new(0));
        let failures_clone = failures.clone();
        scheduler.set_failure_hook(Arc::new(move |_e| {
            failures_clone.fetch_add(1, Ordering::SeqCst);
        }));

        scheduler.register(Box::new(FailingTask));
        scheduler.register(Box::new(FailingTask));
        scheduler.start();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while failures.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        scheduler.shutdown();
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }
}
