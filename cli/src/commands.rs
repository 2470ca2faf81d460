use std::error::Error;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::offset;
use timerex_core::{TimerError, TimerId};

use crate::context::CliContext;

/// Render an error and its sources on one line
pub fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

fn report(err: &TimerError) -> String {
    format!("error[{}]: {}\n", err.status(), error_chain(err))
}

fn timestamp() -> String {
    offset::Local::now().format("%H:%M:%S%.3f").to_string()
}

/// Payload of a timer created with `create`
struct Labelled {
    label: String,
    fires: AtomicU64,
    total: Arc<AtomicU64>,
}

fn print_labelled(id: TimerId, timer: &Labelled) {
    let count = timer.fires.fetch_add(1, Ordering::Relaxed) + 1;
    timer.total.fetch_add(1, Ordering::Relaxed);
    println!("[{}] timer {} ({}) fired #{}", timestamp(), id, timer.label, count);
}

pub fn create_timer(ctx: &CliContext, ms: u32, label: Option<&str>) -> Result<TimerId, String> {
    let payload = Labelled {
        label: label.unwrap_or("unnamed").to_string(),
        fires: AtomicU64::new(0),
        total: Arc::clone(&ctx.fire_count),
    };
    let id = ctx
        .service
        .create_timer(ms, print_labelled, payload)
        .map_err(|e| report(&e))?;
    println!("created timer {id} every {ms}ms");
    Ok(id)
}

pub fn delete_timer(ctx: &CliContext, id: usize) -> Result<(), String> {
    let result = ctx.service.delete_timer(TimerId::new(id));
    match result {
        Ok(()) => {
            println!("deleted timer {id}");
            Ok(())
        }
        Err(e) => Err(report(&e)),
    }
}

pub fn list_timers(ctx: &CliContext) {
    let timers = ctx.service.active_timers();
    if timers.is_empty() {
        println!("No active timers");
        return;
    }

    println!("{:<8} {:>12}", "Id", "Interval");
    println!("{}", "-".repeat(21));
    for timer in &timers {
        println!("{:<8} {:>10}ms", timer.id, timer.interval_ms);
    }
    println!("\nTotal: {} of {} slots", timers.len(), ctx.service.capacity());
}

pub fn show_stats(ctx: &CliContext) {
    let stats = ctx.service.stats();
    println!("backend:     {}", ctx.service.backend_kind());
    println!("active:      {}", ctx.service.active_timers().len());
    println!("fires seen:  {}", ctx.fire_count.load(Ordering::Relaxed));
    println!("dispatched:  {}", stats.dispatched);
    println!("stale:       {}", stats.stale);
    println!("dropped:     {}", stats.dropped);
}

/// Start `count` timers sharing one counter, each tagged with its index
pub fn demo(ctx: &CliContext, count: usize, ms: u32) -> Vec<TimerId> {
    let shared = Arc::new(AtomicU64::new(0));
    let mut ids = Vec::with_capacity(count);

    for index in 0..count {
        let counter = Arc::clone(&shared);
        let total = Arc::clone(&ctx.fire_count);
        let callback = move |id: TimerId, tag: &usize| {
            let n = counter.fetch_add(1, Ordering::Relaxed);
            total.fetch_add(1, Ordering::Relaxed);
            println!("Timer Callback Id[{id}] Count[{n}] ptr[{tag}]");
        };

        match ctx.service.create_timer(ms, callback, index) {
            Ok(id) => ids.push(id),
            Err(e) => {
                print!("{}", report(&e));
                break;
            }
        }
    }

    println!("Create Timer Number [{}]", ids.len());
    ids
}

pub fn show_config(ctx: &CliContext) -> Result<(), String> {
    let rendered = toml::to_string_pretty(ctx.config.as_ref()).map_err(|e| e.to_string())?;
    println!("{rendered}");
    Ok(())
}

/// Delete every timer and finalize the service
pub fn exit(ctx: &CliContext) -> Result<(), String> {
    for timer in ctx.service.active_timers() {
        if let Err(e) = ctx.service.delete_timer(timer.id) {
            print!("{}", report(&e));
        }
    }
    ctx.service.finalize().map_err(|e| report(&e))?;

    let mut stdout = std::io::stdout();
    write!(stdout, "quitting...").map_err(|e| e.to_string())?;
    stdout.flush().map_err(|e| e.to_string())
}
