//! Platform context: who is calling, and is it the UI thread?
//!
//! The controller asks the installed [`PlatformContext`] for the calling
//! thread's id and name and whether it is the UI thread. The answer decides
//! the metric scope of every span (foreground vs. background).

use calltrace_common::DEFAULT_THREAD_NAME;

use crate::domain::ThreadId;

/// Thread and UI-state information supplied by the host platform
///
/// Implementations are called on the instrumented thread itself, so they
/// must be cheap and must never call back into the controller.
pub trait PlatformContext: Send + Sync {
    fn current_thread_id(&self) -> ThreadId;

    fn current_thread_name(&self) -> String;

    fn is_ui_thread(&self) -> bool;
}

/// Identity of the thread a span ran on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub id: ThreadId,
    pub name: String,
}

impl ThreadInfo {
    /// Query `platform` for the calling thread
    ///
    /// Without a platform context the thread is unknown: id `0` and the
    /// default thread name.
    #[must_use]
    pub fn capture(platform: Option<&dyn PlatformContext>) -> Self {
        match platform {
            Some(platform) => Self {
                id: platform.current_thread_id(),
                name: platform.current_thread_name(),
            },
            None => Self::default(),
        }
    }
}

impl Default for ThreadInfo {
    fn default() -> Self {
        Self { id: ThreadId::default(), name: DEFAULT_THREAD_NAME.to_string() }
    }
}

/// Platform context backed by `std::thread`
///
/// The UI thread is whichever thread carries `ui_thread_name` (the process's
/// main thread is named "main" by the Rust runtime). Thread ids are kernel
/// TIDs on Linux and a per-process counter elsewhere.
#[derive(Debug, Clone)]
pub struct StdPlatformContext {
    ui_thread_name: String,
}

impl StdPlatformContext {
    #[must_use]
    pub fn new() -> Self {
        Self { ui_thread_name: DEFAULT_THREAD_NAME.to_string() }
    }

    /// Treat the thread named `name` as the UI thread
    #[must_use]
    pub fn with_ui_thread_name(name: impl Into<String>) -> Self {
        Self { ui_thread_name: name.into() }
    }
}

impl Default for StdPlatformContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PlatformContext for StdPlatformContext {
    fn current_thread_id(&self) -> ThreadId {
        ThreadId(os_thread_id())
    }

    fn current_thread_name(&self) -> String {
        std::thread::current()
            .name()
            .map_or_else(|| format!("{:?}", std::thread::current().id()), str::to_string)
    }

    fn is_ui_thread(&self) -> bool {
        std::thread::current().name() == Some(self.ui_thread_name.as_str())
    }
}

#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
fn os_thread_id() -> u64 {
    // SAFETY: gettid takes no arguments, cannot fail and touches no memory.
    let tid = unsafe { libc::syscall(libc::SYS_gettid) };
    u64::try_from(tid).unwrap_or_default()
}

#[cfg(not(target_os = "linux"))]
fn os_thread_id() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};

    static NEXT_ID: AtomicU64 = AtomicU64::new(1);
    thread_local! {
        static ID: u64 = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    }
    ID.with(|id| *id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_without_context() {
        let info = ThreadInfo::capture(None);
        assert_eq!(info.id, ThreadId(0));
        assert_eq!(info.name, "main");
    }

    #[test]
    fn test_std_context_on_named_thread() {
        let handle = std::thread::Builder::new()
            .name("render".to_string())
            .spawn(|| {
                let ctx = StdPlatformContext::new();
                let ui = StdPlatformContext::with_ui_thread_name("render");
                (ctx.current_thread_name(), ctx.is_ui_thread(), ui.is_ui_thread())
            })
            .unwrap();

        let (name, is_ui, is_render_ui) = handle.join().unwrap();
        assert_eq!(name, "render");
        assert!(!is_ui);
        assert!(is_render_ui);
    }

    #[test]
    fn test_thread_ids_differ_between_threads() {
        let ctx = StdPlatformContext::new();
        let here = ctx.current_thread_id();
        let there = std::thread::spawn(|| StdPlatformContext::new().current_thread_id())
            .join()
            .unwrap();
        assert_ne!(here, there);
        assert_ne!(here, ThreadId(0));
    }
}
