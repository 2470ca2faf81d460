//! Tests for backend selection and the native backends

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use timerex_types::{BackendKind, TimerConfig};

use super::{Backend, TimerBackend, native_kind};
use crate::error::TimerError;
use crate::slots::{Callback, TimerId, UserContext};

fn counting(counter: &Arc<AtomicUsize>) -> Callback {
    let counter = Arc::clone(counter);
    Arc::new(move |_: TimerId, _: &UserContext| {
        counter.fetch_add(1, Ordering::SeqCst);
    })
}

fn no_context() -> UserContext {
    Arc::new(())
}

/// Create, observe and delete one 20ms timer on `backend`
fn exercise(backend: &dyn TimerBackend) {
    backend.initialize().unwrap();
    backend.initialize().expect("initialize is idempotent");

    let hits = Arc::new(AtomicUsize::new(0));
    let id = backend
        .create_timer(20, counting(&hits), no_context())
        .unwrap();
    assert_eq!(id, TimerId::new(0));
    assert_eq!(backend.active_timers().len(), 1);

    thread::sleep(Duration::from_millis(150));
    backend.delete_timer(id).unwrap();
    let fired = hits.load(Ordering::SeqCst);
    assert!(fired >= 3, "expected several expirations, got {fired}");

    thread::sleep(Duration::from_millis(60));
    assert_eq!(hits.load(Ordering::SeqCst), fired, "fired after delete");
    assert!(matches!(
        backend.delete_timer(id),
        Err(TimerError::NotActive { .. })
    ));
    assert!(backend.stats().dispatched >= fired as u64);

    backend.finalize().unwrap();
}

#[test]
fn test_auto_resolves_to_native_backend() {
    let backend = Backend::new(&TimerConfig::default()).unwrap();
    assert_eq!(backend.kind(), native_kind());
    assert_ne!(native_kind(), BackendKind::Auto);
}

#[test]
fn test_ticker_is_always_available() {
    let backend = Backend::new(&TimerConfig::with_backend(BackendKind::Ticker)).unwrap();
    assert_eq!(backend.kind(), BackendKind::Ticker);
}

#[test]
fn test_foreign_backend_is_unsupported() {
    let foreign = if cfg!(target_os = "windows") {
        BackendKind::Signal
    } else {
        BackendKind::Multimedia
    };
    let err = Backend::new(&TimerConfig::with_backend(foreign))
        .err()
        .expect("foreign backend should be rejected");
    assert!(matches!(err, TimerError::UnsupportedBackend { backend } if backend == foreign));
    assert_eq!(err.status(), 102);
}

#[test]
fn test_create_before_initialize_is_rejected() {
    let backend = Backend::new(&TimerConfig::with_backend(BackendKind::Ticker)).unwrap();
    let err = backend
        .create_timer(10, counting(&Arc::new(AtomicUsize::new(0))), no_context())
        .unwrap_err();
    assert!(matches!(err, TimerError::Uninitialized));
}

#[test]
fn test_zero_interval_is_rejected() {
    let backend = Backend::new(&TimerConfig::default()).unwrap();
    backend.initialize().unwrap();
    let err = backend
        .create_timer(0, counting(&Arc::new(AtomicUsize::new(0))), no_context())
        .unwrap_err();
    assert!(matches!(err, TimerError::InvalidInterval));
    assert_eq!(err.status(), 6);
    assert!(backend.active_timers().is_empty());
    backend.finalize().unwrap();
}

#[test]
fn test_ticker_backend_fires_and_stops() {
    exercise(&Backend::new(&TimerConfig::with_backend(BackendKind::Ticker)).unwrap());
}

#[test]
fn test_ticker_callback_can_delete_its_own_timer() {
    let backend = Arc::new(super::ticker::TickerBackend::new(4));
    backend.initialize().unwrap();

    let hits = Arc::new(AtomicUsize::new(0));
    let callback: Callback = {
        let hits = Arc::clone(&hits);
        let weak = Arc::downgrade(&backend);
        Arc::new(move |id: TimerId, _: &UserContext| {
            hits.fetch_add(1, Ordering::SeqCst);
            if let Some(backend) = weak.upgrade() {
                backend.delete_timer(id).expect("self delete");
            }
        })
    };
    backend.create_timer(10, callback, no_context()).unwrap();

    thread::sleep(Duration::from_millis(100));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(backend.active_timers().is_empty());
    backend.finalize().unwrap();
}

#[cfg(target_os = "linux")]
mod signal {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use crate::backend::signal::{SignalBackend, timer_signal};
    use timerex_types::SignalConfig;

    #[test]
    fn test_timer_signal_is_realtime() {
        let signo = timer_signal(0).unwrap();
        assert_eq!(signo, libc::SIGRTMIN());
        assert!(timer_signal(u8::MAX).is_none());
    }

    #[test]
    fn test_signal_backend_fires_and_stops() {
        exercise(&SignalBackend::new(8, &SignalConfig::default()).unwrap());
    }

    #[test]
    fn test_signal_backends_do_not_cross_deliver() {
        let first = SignalBackend::new(4, &SignalConfig::default()).unwrap();
        let second = SignalBackend::new(4, &SignalConfig::default()).unwrap();
        first.initialize().unwrap();
        second.initialize().unwrap();

        // Both timers sit in slot 0 with the same token, so only the rates
        // tell them apart.
        let fast = Arc::new(AtomicUsize::new(0));
        let slow = Arc::new(AtomicUsize::new(0));
        first.create_timer(10, counting(&fast), no_context()).unwrap();
        second.create_timer(100, counting(&slow), no_context()).unwrap();
        thread::sleep(Duration::from_millis(250));

        let fast_hits = fast.load(Ordering::SeqCst);
        let slow_hits = slow.load(Ordering::SeqCst);
        assert!(fast_hits >= 10, "fast timer fired {fast_hits} times");
        assert!((1..=3).contains(&slow_hits), "slow timer fired {slow_hits} times");
        assert_eq!(first.stats().stale, 0);
        assert_eq!(second.stats().stale, 0);
        assert_eq!(second.stats().dispatched, slow_hits as u64);

        first.finalize().unwrap();
        second.finalize().unwrap();
    }

    #[test]
    fn test_slow_callbacks_count_dropped_expirations() {
        let config = SignalConfig {
            inbox_depth: 1,
            ..SignalConfig::default()
        };
        let backend = SignalBackend::new(8, &config).unwrap();
        backend.initialize().unwrap();

        let slow = Arc::new(AtomicBool::new(true));
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let slow = Arc::clone(&slow);
            let hits = Arc::clone(&hits);
            let callback: Callback = Arc::new(move |_: TimerId, _: &UserContext| {
                hits.fetch_add(1, Ordering::SeqCst);
                if slow.load(Ordering::SeqCst) {
                    thread::sleep(Duration::from_millis(20));
                }
            });
            backend.create_timer(1, callback, no_context()).unwrap();
        }

        thread::sleep(Duration::from_millis(150));
        assert!(backend.stats().dropped > 0, "no expiration was dropped");

        slow.store(false, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        let before = hits.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        let after = hits.load(Ordering::SeqCst);
        assert!(after > before + 10, "dispatch stalled: {before} -> {after}");

        backend.finalize().unwrap();
    }

    #[test]
    fn test_finalize_deletes_active_timers() {
        let backend = SignalBackend::new(4, &SignalConfig::default()).unwrap();
        backend.initialize().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            backend
                .create_timer(5, counting(&hits), no_context())
                .unwrap();
        }

        thread::sleep(Duration::from_millis(30));
        backend.finalize().unwrap();
        let after = hits.load(Ordering::SeqCst);
        assert!(backend.active_timers().is_empty());

        thread::sleep(Duration::from_millis(30));
        assert_eq!(hits.load(Ordering::SeqCst), after);
    }
}
