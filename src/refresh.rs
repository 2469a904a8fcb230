//! A background thread that periodically refreshes cached flags before they expire.
use std::{
    sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender},
    thread::JoinHandle,
    time::Duration,
};

use rand::{thread_rng, Rng};

use crate::{Error, Result};

/// Handle to the background refresh thread.
///
/// The thread wakes up every `interval` (minus a random jitter, so that multiple processes don't
/// synchronize) and invokes the refresh callback.
pub(crate) struct RefreshThread {
    join_handle: JoinHandle<()>,

    /// Used to send a stop command to the refresh thread.
    stop_sender: SyncSender<()>,
}

impl RefreshThread {
    /// Start the refresh thread.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the thread failed to start.
    pub(crate) fn start(
        interval: Duration,
        mut refresh: impl FnMut() + Send + 'static,
    ) -> Result<RefreshThread> {
        // Using `sync_channel` here as it makes `stop_sender` `Sync`. Buffer size of 1 is enough:
        // if the buffer is full, another stop command is already pending.
        let (stop_sender, stop_receiver) = sync_channel::<()>(1);
        let max_jitter = interval / 10;

        let join_handle = std::thread::Builder::new()
            .name("flagvault-refresh".to_owned())
            .spawn(move || {
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| loop {
                    let timeout = jitter(interval, max_jitter);
                    match stop_receiver.recv_timeout(timeout) {
                        Err(RecvTimeoutError::Timeout) => {
                            log::debug!(target: "flagvault", "refreshing cached flags");
                            refresh();
                        }
                        Ok(()) => {
                            log::debug!(target: "flagvault", "refresh thread received stop command");
                            return;
                        }
                        Err(RecvTimeoutError::Disconnected) => {
                            // The client was dropped without an explicit stop.
                            log::debug!(target: "flagvault", "refresh thread received disconnected");
                            return;
                        }
                    }
                }));

                if let Err(panic) = result {
                    log::error!(target: "flagvault", "refresh thread panicked");
                    std::panic::resume_unwind(panic);
                }
            })?;

        Ok(RefreshThread {
            join_handle,
            stop_sender,
        })
    }

    /// Stop the refresh thread without waiting for it to exit.
    pub(crate) fn stop(&self) {
        // Error means that the thread has already exited or a stop command is already pending.
        let _ = self.stop_sender.try_send(());
    }

    /// Stop the refresh thread and block waiting for it to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RefreshThreadPanicked`] if the thread has panicked.
    pub(crate) fn shutdown(self) -> Result<()> {
        self.stop();
        self.join_handle
            .join()
            .map_err(|_| Error::RefreshThreadPanicked)
    }
}

/// Apply randomized `jitter` to `interval`.
fn jitter(interval: Duration, jitter: Duration) -> Duration {
    Duration::saturating_sub(interval, thread_rng().gen_range(Duration::ZERO..=jitter))
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use super::RefreshThread;
    use crate::Error;

    #[test]
    fn invokes_refresh_periodically() {
        let calls = Arc::new(AtomicUsize::new(0));
        let thread = {
            let calls = calls.clone();
            RefreshThread::start(Duration::from_millis(10), move || {
                calls.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap()
        };

        std::thread::sleep(Duration::from_millis(200));
        thread.shutdown().unwrap();

        assert!(calls.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn stops_promptly() {
        let thread = RefreshThread::start(Duration::from_secs(3600), || {}).unwrap();
        thread.shutdown().unwrap();
    }

    #[test]
    fn reports_panics_on_shutdown() {
        let thread = RefreshThread::start(Duration::from_millis(1), || panic!("boom")).unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert!(matches!(thread.shutdown(), Err(Error::RefreshThreadPanicked)));
    }

    #[test]
    fn jitter_is_subtractive() {
        let interval = Duration::from_secs(30);
        let result = super::jitter(interval, Duration::from_secs(3));
        assert!(result <= interval && result >= Duration::from_secs(27));
    }

    #[test]
    fn jitter_works_with_zero_jitter() {
        let interval = Duration::from_secs(30);
        assert_eq!(super::jitter(interval, Duration::ZERO), interval);
    }
}
