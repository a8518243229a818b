//! Suspend/resume and wall-clock change monitoring.
//!
//! Two detached threads feed the same callback:
//! - systemd-logind's `PrepareForSleep` signal over the system bus (zbus
//!   blocking API); only the resume edge (`start == false`) is acted on
//! - a far-future `CLOCK_REALTIME` timerfd armed with `TFD_TIMER_CANCEL_ON_SET`,
//!   which fires whenever the system clock is stepped
//!
//! The callback returns false once its engine is gone, which ends the thread at
//! the next event. A lost D-Bus connection is retried a few times before sleep
//! detection is given up.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::sys::timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};
use zbus::blocking::Connection;

use crate::constants::{DBUS_MAX_RESTARTS, DBUS_RESTART_DELAY};

/// Seconds after a resume during which clock jumps are attributed to the
/// suspend itself.
const RESUME_GRACE_SECS: i64 = 5;

#[zbus::proxy(
    interface = "org.freedesktop.login1.Manager",
    default_service = "org.freedesktop.login1",
    default_path = "/org/freedesktop/login1"
)]
trait LogindManager {
    /// `start` is true right before suspend and false right after resume.
    #[zbus(signal)]
    fn prepare_for_sleep(&self, start: bool) -> zbus::Result<()>;
}

type ResumeCallback = Arc<dyn Fn() -> bool + Send + Sync>;

/// Shared between the two monitors so a suspend does not also look like a
/// clock change.
#[derive(Clone, Default)]
struct SleepTracker {
    sleeping: Arc<AtomicBool>,
    resumed_at: Arc<AtomicI64>,
}

impl SleepTracker {
    fn now() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    fn suppresses_clock_change(&self) -> bool {
        if self.sleeping.load(Ordering::SeqCst) {
            return true;
        }
        let resumed_at = self.resumed_at.load(Ordering::SeqCst);
        resumed_at != 0 && Self::now() - resumed_at <= RESUME_GRACE_SECS
    }
}

/// Start both monitors. `on_resume` runs on their threads.
pub fn start_sleep_monitor(on_resume: impl Fn() -> bool + Send + Sync + 'static) -> Result<()> {
    let callback: ResumeCallback = Arc::new(on_resume);
    let tracker = SleepTracker::default();

    spawn_sleep_thread(Arc::clone(&callback), tracker.clone(), 0)?;

    thread::Builder::new()
        .name("nightlight-clock".to_string())
        .spawn(move || {
            if let Err(e) = monitor_clock_changes(&callback, &tracker) {
                log_warning!("Clock change monitor stopped: {e:#}");
            }
        })
        .context("Failed to spawn clock change monitor")?;
    Ok(())
}

fn spawn_sleep_thread(callback: ResumeCallback, tracker: SleepTracker, restarts: u32) -> Result<()> {
    thread::Builder::new()
        .name("nightlight-sleep".to_string())
        .spawn(move || match monitor_sleep_signals(&callback, &tracker) {
            Ok(()) => log_debug!("Sleep monitor exiting"),
            Err(e) => {
                log_warning!("Sleep monitor error: {e:#}");
                if restarts >= DBUS_MAX_RESTARTS {
                    log_indented!("Resume detection is no longer available");
                    return;
                }
                log_indented!(
                    "Restarting D-Bus monitor (attempt {}/{})",
                    restarts + 1,
                    DBUS_MAX_RESTARTS
                );
                thread::sleep(DBUS_RESTART_DELAY);
                if let Err(e) = spawn_sleep_thread(callback, tracker, restarts + 1) {
                    log_warning!("{e:#}");
                }
            }
        })
        .context("Failed to spawn sleep monitor")?;
    Ok(())
}

fn monitor_sleep_signals(callback: &ResumeCallback, tracker: &SleepTracker) -> Result<()> {
    let connection = Connection::system().context("Failed to connect to system D-Bus")?;
    let logind =
        LogindManagerProxyBlocking::new(&connection).context("Failed to create logind proxy")?;
    let signals = logind
        .receive_prepare_for_sleep()
        .context("Failed to subscribe to PrepareForSleep signals")?;
    log_debug!("Listening for systemd-logind PrepareForSleep signals");

    for signal in signals {
        let start = match signal.args() {
            Ok(args) => args.start,
            Err(e) => {
                log_warning!("Malformed PrepareForSleep signal: {e}");
                continue;
            }
        };

        if start {
            tracker.sleeping.store(true, Ordering::SeqCst);
            log_debug!("System is suspending");
            continue;
        }

        tracker.resumed_at.store(SleepTracker::now(), Ordering::SeqCst);
        tracker.sleeping.store(false, Ordering::SeqCst);
        log_info!("System resumed from suspend, recomputing");
        if !callback() {
            return Ok(());
        }
    }

    anyhow::bail!("D-Bus connection lost, PrepareForSleep stream ended")
}

fn monitor_clock_changes(callback: &ResumeCallback, tracker: &SleepTracker) -> Result<()> {
    let timer = TimerFd::new(ClockId::CLOCK_REALTIME, TimerFlags::empty())
        .context("Failed to create realtime timerfd")?;
    arm(&timer)?;

    loop {
        match timer.wait() {
            Ok(()) | Err(Errno::ECANCELED) => arm(&timer)?,
            Err(e) => return Err(e).context("Waiting on realtime timerfd failed"),
        }

        if tracker.suppresses_clock_change() {
            continue;
        }
        log_info!("System clock changed, recomputing");
        if !callback() {
            return Ok(());
        }
    }
}

/// Arm the timer at a point it never reaches; it only fires when the clock is set.
fn arm(timer: &TimerFd) -> Result<()> {
    let flags = TimerSetTimeFlags::TFD_TIMER_ABSTIME | TimerSetTimeFlags::TFD_TIMER_CANCEL_ON_SET;
    timer
        .set(Expiration::OneShot(TimeSpec::new(i64::MAX / 1000, 0)), flags)
        .context("Failed to arm realtime timerfd")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_changes_suppressed_around_suspend() {
        let tracker = SleepTracker::default();
        assert!(!tracker.suppresses_clock_change());

        tracker.sleeping.store(true, Ordering::SeqCst);
        assert!(tracker.suppresses_clock_change());

        tracker.sleeping.store(false, Ordering::SeqCst);
        tracker.resumed_at.store(SleepTracker::now(), Ordering::SeqCst);
        assert!(tracker.suppresses_clock_change());

        tracker
            .resumed_at
            .store(SleepTracker::now() - RESUME_GRACE_SECS - 1, Ordering::SeqCst);
        assert!(!tracker.suppresses_clock_change());
    }
}
