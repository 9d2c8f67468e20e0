use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use log::error;

/// Background thread delivering edge events of one line.
///
/// The thread body receives a stop flag and is expected to check it at least every few milliseconds.
#[derive(Debug)]
pub(crate) struct EdgeWorker {
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EdgeWorker {
    pub fn spawn<F>(pin: &str, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(&AtomicBool) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let worker = thread::Builder::new()
            .name(format!("pio-edge-{}", pin))
            .spawn(move || body(&flag))?;

        Ok(Self {
            stop,
            worker: Some(worker),
        })
    }

    /// Stops the thread and waits for it, unless called from the thread itself.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                error!("edge callback panicked");
            }
        }
    }
}

impl Drop for EdgeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
