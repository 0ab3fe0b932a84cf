//! Run cancellation
//!
//! A [`CancelHandle`] is held by whoever may stop the run (the interrupt handler in the binary, a
//! test) and any number of [`Cancel`] observers are awaited at the suspension points of the run.

use tokio::sync::watch;

pub struct CancelHandle
{
    tx: watch::Sender<bool>,
}

impl CancelHandle
{
    /// Requests cancellation. Idempotent.
    pub fn cancel(&self)
    {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Cancel
{
    rx: watch::Receiver<bool>,
}

impl Cancel
{
    /// An observer which is never cancelled
    pub fn never() -> Self
    {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool
    {
        *self.rx.borrow()
    }

    /// Completes once cancellation has been requested
    ///
    /// If the handle is dropped without cancelling, this never completes.
    pub async fn cancelled(&self)
    {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, Cancel)
{
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, Cancel { rx })
}
