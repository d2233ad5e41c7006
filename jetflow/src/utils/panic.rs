use std::sync::atomic::{AtomicBool, Ordering};

static PANIC_CAPTURE: AtomicBool = AtomicBool::new(false);

pub fn is_panic() -> bool {
    PANIC_CAPTURE.load(Ordering::SeqCst)
}

/// install a process-wide hook that records and logs any worker panic
pub fn panic_notify() {
    std::panic::set_hook(Box::new(|panic_info| {
        PANIC_CAPTURE.store(true, Ordering::SeqCst);

        let thread = std::thread::current();
        let thread_name = thread.name().unwrap_or("unnamed");
        if let Some(location) = panic_info.location() {
            error!(
                "panic in thread `{}` at {}:{}: {}",
                thread_name,
                location.file(),
                location.line(),
                panic_info
            );
        } else {
            error!("panic in thread `{}`: {}", thread_name, panic_info);
        }
        error!("{:?}", backtrace::Backtrace::new());
    }));
}
