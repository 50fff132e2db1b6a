//! Local terminal handling for interactive sessions.
//!
//! [`RawModeGuard`] scopes raw mode to one session and restores the terminal
//! when dropped, whatever path the session takes out. [`ResizeQueue`] feeds
//! window size changes to the remote side while the session runs.

use std::io::IsTerminal;

use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use futures::{Stream, StreamExt};
use kube::api::TerminalSize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Fallback when the terminal size cannot be queried.
const FALLBACK_SIZE: (u16, u16) = (80, 24);

/// Whether stdin is attached to a real terminal.
#[must_use]
pub fn stdin_is_terminal() -> bool {
    std::io::stdin().is_terminal()
}

/// Whether stdout is attached to a real terminal.
#[must_use]
pub fn stdout_is_terminal() -> bool {
    std::io::stdout().is_terminal()
}

/// Current size of the controlling terminal.
#[must_use]
pub fn current_size() -> Option<TerminalSize> {
    crossterm::terminal::size()
        .ok()
        .map(|(width, height)| TerminalSize { width, height })
}

/// RAII guard holding the local terminal in raw mode.
#[derive(Debug)]
pub struct RawModeGuard {
    _private: (),
}

impl RawModeGuard {
    /// Enter raw mode if stdin is a terminal.
    ///
    /// Returns `Ok(None)` when there is no terminal to switch.
    ///
    /// # Errors
    ///
    /// Returns an error if the terminal refuses raw mode.
    pub fn acquire() -> std::io::Result<Option<Self>> {
        if !stdin_is_terminal() {
            return Ok(None);
        }
        enable_raw_mode()?;
        debug!("Entered raw mode");
        Ok(Some(Self { _private: () }))
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = disable_raw_mode() {
            warn!(error = %e, "Failed to restore terminal mode");
        }
    }
}

/// Live sequence of terminal sizes for one interactive session.
///
/// The first call to [`ResizeQueue::next`] yields the size at creation time.
/// Later calls wait for a resize; only the latest pending size is kept, so
/// intermediate sizes between reads may be dropped.
#[derive(Debug)]
pub struct ResizeQueue {
    sizes: watch::Receiver<TerminalSize>,
    stop: CancellationToken,
}

impl ResizeQueue {
    /// Track the controlling terminal, waking on `SIGWINCH`.
    ///
    /// # Errors
    ///
    /// Returns an error if the resize signal handler cannot be installed.
    #[cfg(unix)]
    pub fn start() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        let winch = signal(SignalKind::window_change())?;
        let notifications = futures::stream::unfold(winch, |mut winch| async move {
            winch.recv().await.map(|()| ((), winch))
        });
        Ok(Self::with_notifications(current_size, notifications))
    }

    /// Track the controlling terminal. Resizes are not observed on this platform.
    ///
    /// # Errors
    ///
    /// Never fails on this platform.
    #[cfg(not(unix))]
    pub fn start() -> std::io::Result<Self> {
        Ok(Self::with_notifications(
            current_size,
            futures::stream::pending(),
        ))
    }

    /// Build a queue that re-reads `size` every time `notifications` yields.
    pub fn with_notifications<F, S>(size: F, notifications: S) -> Self
    where
        F: Fn() -> Option<TerminalSize> + Send + 'static,
        S: Stream<Item = ()> + Send + 'static,
    {
        let (width, height) = FALLBACK_SIZE;
        let initial = size().unwrap_or(TerminalSize { width, height });
        let (tx, mut sizes) = watch::channel(initial);
        sizes.mark_changed();

        let stop = CancellationToken::new();
        let token = stop.clone();
        tokio::spawn(async move {
            let mut notifications = std::pin::pin!(notifications);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    next = notifications.next() => {
                        let Some(()) = next else { break };
                        if let Some(latest) = size() {
                            tx.send_if_modified(|pending| {
                                let changed = pending.width != latest.width
                                    || pending.height != latest.height;
                                *pending = latest;
                                changed
                            });
                        }
                    }
                }
            }
            debug!("Resize producer stopped");
        });

        Self { sizes, stop }
    }

    /// Wait for the next size. `None` means no more resizes will arrive.
    pub async fn next(&mut self) -> Option<TerminalSize> {
        if self.stop.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            () = self.stop.cancelled() => None,
            changed = self.sizes.changed() => {
                changed.ok().map(|()| {
                    let size = self.sizes.borrow_and_update();
                    TerminalSize { width: size.width, height: size.height }
                })
            }
        }
    }

    /// Stop producing sizes. Safe to call more than once.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Handle that stops this queue from elsewhere.
    #[must_use]
    pub fn stopper(&self) -> CancellationToken {
        self.stop.clone()
    }
}

impl Drop for ResizeQueue {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU16, Ordering};
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn queue_with_channel(width: Arc<AtomicU16>) -> (ResizeQueue, mpsc::UnboundedSender<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let notifications = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|()| ((), rx))
        });
        let queue = ResizeQueue::with_notifications(
            move || {
                Some(TerminalSize {
                    width: width.load(Ordering::SeqCst),
                    height: 40,
                })
            },
            notifications,
        );
        (queue, tx)
    }

    #[tokio::test]
    async fn test_first_value_is_current_size() {
        let width = Arc::new(AtomicU16::new(120));
        let (mut queue, _tx) = queue_with_channel(width);

        let size = queue.next().await.unwrap();
        assert_eq!(size.width, 120);
        assert_eq!(size.height, 40);
    }

    #[tokio::test]
    async fn test_latest_size_wins() {
        let width = Arc::new(AtomicU16::new(100));
        let (mut queue, tx) = queue_with_channel(Arc::clone(&width));
        assert_eq!(queue.next().await.unwrap().width, 100);

        width.store(110, Ordering::SeqCst);
        tx.send(()).unwrap();
        width.store(130, Ordering::SeqCst);
        tx.send(()).unwrap();

        // Let the producer drain both notifications before reading.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(queue.next().await.unwrap().width, 130);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_ends_sequence() {
        let width = Arc::new(AtomicU16::new(90));
        let (mut queue, _tx) = queue_with_channel(width);
        queue.stop();
        queue.stop();

        assert!(queue.next().await.is_none());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_stopper_wakes_blocked_consumer() {
        let width = Arc::new(AtomicU16::new(90));
        let (mut queue, _tx) = queue_with_channel(width);
        assert!(queue.next().await.is_some());

        let stopper = queue.stopper();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            stopper.cancel();
        });

        assert!(queue.next().await.is_none());
    }
}
