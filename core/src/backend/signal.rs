//! POSIX interval timer backend (Linux)
//!
//! Each timer is a `timer_create` timer on `CLOCK_MONOTONIC` that delivers a
//! real-time signal to one dedicated dispatcher thread. The signal carries
//! the timer's packed [`SlotToken`]. The handler only queues the token; the
//! dispatcher thread drains the queue and runs callbacks outside signal
//! context.

use std::cell::Cell;
use std::ffi::c_void;
use std::io;
use std::mem;
use std::os::unix::thread::JoinHandleExt;
use std::ptr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, bounded};
use crossbeam_queue::ArrayQueue;
use libc::{c_int, pid_t, siginfo_t};
use nix::sys::signal::{SigHandler, Signal};
use parking_lot::Mutex;
use timerex_types::{BackendKind, SignalConfig};
use tracing::{debug, info, warn};

use super::{TimerBackend, check_interval};
use crate::error::{Result, TimerError};
use crate::slots::{
    Callback, Occupant, SlotTable, SlotToken, TimerId, TimerInfo, TimerStats, UserContext,
};

/// `si_code` of a signal raised by a POSIX timer expiration
const SI_TIMER: c_int = -2;

const DISPATCHER_THREAD: &str = "timerex-signal";

/// Signal number for `SIGRTMIN + rt_offset`, if it is a real-time signal
pub fn timer_signal(rt_offset: u8) -> Option<c_int> {
    let signo = libc::SIGRTMIN() + c_int::from(rt_offset);
    (signo <= libc::SIGRTMAX()).then_some(signo)
}

// ─────────────────────────────────────────────────────────────────────────────
// Signal Handler
// ─────────────────────────────────────────────────────────────────────────────

/// Tokens queued by the signal handler for the dispatcher thread
struct Inbox {
    queue: ArrayQueue<usize>,
    /// Expirations lost to a full queue or merged by the kernel (overruns)
    dropped: AtomicU64,
}

thread_local! {
    /// Set only on the dispatcher thread, for the lifetime of its loop
    static INBOX: Cell<*const Inbox> = const { Cell::new(ptr::null()) };
}

/// Leading fields of a `siginfo_t` raised by a POSIX timer (the kernel's
/// `_timer` union member). libc only exposes `si_value` for it.
#[repr(C)]
struct TimerSigInfo {
    _signo: c_int,
    _errno: c_int,
    _code: c_int,
    #[cfg(target_pointer_width = "64")]
    _pad: c_int,
    _tid: c_int,
    overrun: c_int,
    value: libc::sigval,
}

extern "C" fn on_timer_signal(_signo: c_int, info: *mut siginfo_t, _ucontext: *mut c_void) {
    if info.is_null() {
        return;
    }
    // SAFETY: the kernel passes a valid siginfo to SA_SIGINFO handlers.
    let info = unsafe { &*info };
    // Wake-ups sent by finalize carry no token.
    if info.si_code != SI_TIMER {
        return;
    }
    // SAFETY: SI_TIMER means the kernel filled in the `_timer` member.
    let timer = unsafe { &*(info as *const siginfo_t as *const TimerSigInfo) };
    // Timer signals always carry the sigval set in timer_create.
    let bits = timer.value.sival_ptr as usize;
    if bits == 0 {
        return;
    }

    let inbox = INBOX.with(Cell::get);
    if inbox.is_null() {
        return;
    }
    // SAFETY: the dispatcher owns the inbox and clears INBOX before dropping it.
    let inbox = unsafe { &*inbox };
    // Expirations that fired while this signal was still pending.
    if let Ok(overrun) = u64::try_from(timer.overrun) {
        inbox.dropped.fetch_add(overrun, Ordering::Relaxed);
    }
    if inbox.queue.push(bits).is_err() {
        inbox.dropped.fetch_add(1, Ordering::Relaxed);
    }
}

fn install_handler(signo: c_int) -> io::Result<()> {
    // SAFETY: sigaction is zeroed before use and the handler only touches
    // lock-free state.
    unsafe {
        let mut action: libc::sigaction = mem::zeroed();
        action.sa_sigaction = on_timer_signal
            as extern "C" fn(c_int, *mut siginfo_t, *mut c_void)
            as libc::sighandler_t;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        if libc::sigaction(signo, &action, ptr::null_mut()) != 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

fn ignore_sigpipe() {
    // SAFETY: SIG_IGN installs no handler code.
    if let Err(e) = unsafe { nix::sys::signal::signal(Signal::SIGPIPE, SigHandler::SigIgn) } {
        warn!(error = %e, "failed to ignore SIGPIPE");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Native Timers
// ─────────────────────────────────────────────────────────────────────────────

/// A `timer_t` owned by one slot
pub struct PosixTimer(libc::timer_t);

// SAFETY: a timer_t is a kernel timer id that any thread may arm or delete.
unsafe impl Send for PosixTimer {}

impl PosixTimer {
    /// Create a timer that signals `tid` with `token` as its payload
    fn create(signo: c_int, tid: pid_t, token: SlotToken) -> io::Result<Self> {
        // SAFETY: sigevent is fully initialized before timer_create reads it.
        unsafe {
            let mut event: libc::sigevent = mem::zeroed();
            event.sigev_notify = libc::SIGEV_THREAD_ID;
            event.sigev_signo = signo;
            event.sigev_value = libc::sigval {
                sival_ptr: token.to_bits() as *mut c_void,
            };
            event.sigev_notify_thread_id = tid;

            let mut timer: libc::timer_t = ptr::null_mut();
            if libc::timer_create(libc::CLOCK_MONOTONIC, &mut event, &mut timer) != 0 {
                return Err(io::Error::last_os_error());
            }
            Ok(Self(timer))
        }
    }

    /// Start periodic expirations, the first one `interval_ms` from now
    fn arm(&self, interval_ms: u32) -> io::Result<()> {
        let period = timespec_from_ms(interval_ms);
        // SAFETY: plain-old-data, every field assigned below.
        let mut spec: libc::itimerspec = unsafe { mem::zeroed() };
        spec.it_interval = period;
        spec.it_value = period;

        // SAFETY: self.0 is a live timer created by timer_create.
        if unsafe { libc::timer_settime(self.0, 0, &spec, ptr::null_mut()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn delete(self) -> io::Result<()> {
        // SAFETY: self.0 is live and consumed here, so it is deleted once.
        if unsafe { libc::timer_delete(self.0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

fn timespec_from_ms(ms: u32) -> libc::timespec {
    // SAFETY: plain-old-data; zeroing covers platform padding fields.
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    ts.tv_sec = (ms / 1000) as libc::time_t;
    ts.tv_nsec = ((ms % 1000) * 1_000_000) as libc::c_long;
    ts
}

// ─────────────────────────────────────────────────────────────────────────────
// Dispatcher Thread
// ─────────────────────────────────────────────────────────────────────────────

struct Dispatcher {
    handle: JoinHandle<()>,
    tid: pid_t,
    stop: Arc<AtomicBool>,
}

impl Dispatcher {
    /// Wake the thread out of `sigsuspend` and join it. `stop` must be set.
    fn shut_down(self, signo: c_int) {
        // SAFETY: the handle has not been joined, so the pthread_t is live.
        let rc = unsafe { libc::pthread_kill(self.handle.as_pthread_t(), signo) };
        if rc != 0 {
            warn!(error = %io::Error::from_raw_os_error(rc), "failed to wake signal dispatcher");
        }
        if self.handle.join().is_err() {
            warn!("signal dispatcher panicked");
        }
    }
}

fn signal_set(signo: c_int) -> libc::sigset_t {
    // SAFETY: sigemptyset initializes the set before sigaddset touches it.
    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, signo);
        set
    }
}

fn block_on_current_thread(signo: c_int) -> io::Result<()> {
    let block = signal_set(signo);
    // SAFETY: block is an initialized set; the previous mask is not needed.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &block, ptr::null_mut()) };
    if rc != 0 {
        return Err(io::Error::from_raw_os_error(rc));
    }
    Ok(())
}

/// Body of the dispatcher thread.
///
/// The timer signal stays blocked except inside `sigsuspend`, so an
/// expiration arriving between draining the queue and going to sleep stays
/// pending and wakes the next `sigsuspend` instead of being lost.
fn run_dispatcher(
    signo: c_int,
    slots: Arc<SlotTable<PosixTimer>>,
    inbox: Arc<Inbox>,
    stop: Arc<AtomicBool>,
    ready: Sender<io::Result<pid_t>>,
) {
    let block = signal_set(signo);
    // SAFETY: zeroed sigset is overwritten by pthread_sigmask.
    let mut wait_mask: libc::sigset_t = unsafe { mem::zeroed() };
    // SAFETY: both sets are valid for the duration of the call.
    let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &block, &mut wait_mask) };
    if rc != 0 {
        let _ = ready.send(Err(io::Error::from_raw_os_error(rc)));
        return;
    }
    // SAFETY: wait_mask was filled in by pthread_sigmask.
    unsafe { libc::sigdelset(&mut wait_mask, signo) };

    INBOX.with(|cell| cell.set(Arc::as_ptr(&inbox)));
    let tid = nix::unistd::gettid().as_raw();
    if ready.send(Ok(tid)).is_err() {
        INBOX.with(|cell| cell.set(ptr::null()));
        return;
    }
    debug!(tid, signo, "signal dispatcher running");

    loop {
        while let Some(bits) = inbox.queue.pop() {
            if let Err(e) = slots.dispatch(SlotToken::from_bits(bits)) {
                warn!(error = %e, "discarding timer signal");
            }
        }
        if stop.load(Ordering::Acquire) {
            break;
        }
        // SAFETY: wait_mask is a valid signal set. sigsuspend always returns -1/EINTR.
        unsafe { libc::sigsuspend(&wait_mask) };
    }

    INBOX.with(|cell| cell.set(ptr::null()));
    debug!(tid, "signal dispatcher stopped");
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// POSIX interval timers signalling a dedicated dispatcher thread
pub struct SignalBackend {
    config: SignalConfig,
    signo: c_int,
    slots: Arc<SlotTable<PosixTimer>>,
    inbox: Arc<Inbox>,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl SignalBackend {
    pub fn new(capacity: usize, config: &SignalConfig) -> Result<Self> {
        let signo = timer_signal(config.rt_offset).ok_or_else(|| {
            TimerError::HandlerInstall(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("SIGRTMIN+{} is past SIGRTMAX", config.rt_offset),
            ))
        })?;

        Ok(Self {
            config: config.clone(),
            signo,
            slots: Arc::new(SlotTable::new(capacity)),
            inbox: Arc::new(Inbox {
                queue: ArrayQueue::new(config.inbox_depth.max(1)),
                dropped: AtomicU64::new(0),
            }),
            dispatcher: Mutex::new(None),
        })
    }

    fn dispatcher_tid(&self) -> Option<pid_t> {
        self.dispatcher.lock().as_ref().map(|d| d.tid)
    }

    fn spawn_dispatcher(&self) -> Result<Dispatcher> {
        let (ready_tx, ready_rx) = bounded(1);
        let stop = Arc::new(AtomicBool::new(false));

        let handle = {
            let signo = self.signo;
            let slots = Arc::clone(&self.slots);
            let inbox = Arc::clone(&self.inbox);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name(DISPATCHER_THREAD.to_string())
                .spawn(move || run_dispatcher(signo, slots, inbox, stop, ready_tx))
                .map_err(TimerError::DispatcherStart)?
        };

        match ready_rx.recv() {
            Ok(Ok(tid)) => Ok(Dispatcher { handle, tid, stop }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(TimerError::DispatcherStart(e))
            }
            Err(_) => {
                let _ = handle.join();
                Err(TimerError::DispatcherStart(io::Error::other(
                    "dispatcher exited before reporting ready",
                )))
            }
        }
    }

    /// Release `id` and delete its native timer
    fn delete_native(&self, id: TimerId) -> Result<()> {
        let native = self.slots.lock().release(id)?;
        if let Some(timer) = native {
            timer
                .delete()
                .map_err(|source| TimerError::NativeDelete { id, source })?;
        }
        Ok(())
    }
}

impl TimerBackend for SignalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Signal
    }

    fn initialize(&self) -> Result<()> {
        let mut dispatcher = self.dispatcher.lock();
        if dispatcher.is_some() {
            return Ok(());
        }

        if self.config.ignore_sigpipe {
            ignore_sigpipe();
        }
        // Threads spawned by the caller from here on inherit the blocked signal.
        block_on_current_thread(self.signo).map_err(TimerError::HandlerInstall)?;
        install_handler(self.signo).map_err(TimerError::HandlerInstall)?;
        *dispatcher = Some(self.spawn_dispatcher()?);

        info!(signo = self.signo, capacity = self.slots.capacity(), "signal backend initialized");
        Ok(())
    }

    fn finalize(&self) -> Result<()> {
        let result = self.slots.release_all(|id| self.delete_native(id));

        // Taken out first so the join below does not hold the mutex.
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop.store(true, Ordering::Release);
            if dispatcher.handle.thread().id() == thread::current().id() {
                // Called from one of our callbacks: the loop sees `stop` once
                // the callback returns, and dropping the handle detaches it.
                debug!(tid = dispatcher.tid, "signal dispatcher detached");
            } else {
                dispatcher.shut_down(self.signo);
            }
        }

        let dropped = self.inbox.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            warn!(dropped, "timer expirations were dropped while the inbox was full");
        }
        info!("signal backend finalized");
        result
    }

    fn create_timer(
        &self,
        interval_ms: u32,
        callback: Callback,
        context: UserContext,
    ) -> Result<TimerId> {
        check_interval(interval_ms)?;
        let tid = self.dispatcher_tid().ok_or(TimerError::Uninitialized)?;

        install_handler(self.signo).map_err(TimerError::HandlerInstall)?;
        let slots = self.slots.lock();
        let token = slots.claim()?;
        let timer = PosixTimer::create(self.signo, tid, token).map_err(TimerError::NativeCreate)?;

        // Armed under the table lock: an early expiration waits in dispatch
        // until the slot is occupied.
        if let Err(e) = timer.arm(interval_ms) {
            if let Err(delete_err) = timer.delete() {
                warn!(error = %delete_err, "failed to delete unarmed timer");
            }
            return Err(TimerError::NativeArm(e));
        }

        slots.occupy(
            token,
            Occupant {
                native: timer,
                interval_ms,
                callback,
                context,
            },
        );
        debug!(id = %token.id(), interval_ms, "created signal timer");
        Ok(token.id())
    }

    fn delete_timer(&self, id: TimerId) -> Result<()> {
        self.delete_native(id)?;
        debug!(%id, "deleted signal timer");
        Ok(())
    }

    fn active_timers(&self) -> Vec<TimerInfo> {
        self.slots.active()
    }

    fn stats(&self) -> TimerStats {
        TimerStats {
            dropped: self.inbox.dropped.load(Ordering::Relaxed),
            ..self.slots.stats()
        }
    }
}
