use super::{Completion, CompletionWaker, IoBackend, ReadOp, SubmitError};
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Positional reads on a fixed pool of worker threads.
///
/// Ops go out on one channel and completions come back on another; the
/// submission loop only ever does non-blocking sends and `try_recv`s.
pub struct ThreadPoolBackend {
    ops: Option<Sender<ReadOp>>,
    done: Receiver<Completion>,
    waker: Arc<Mutex<Option<CompletionWaker>>>,
    in_flight: usize,
    workers: Vec<JoinHandle<()>>,
}

impl ThreadPoolBackend {
    /// Start `workers` read threads.
    ///
    /// # Panics
    /// Panics if `workers` is 0.
    pub fn new(workers: usize) -> io::Result<Self> {
        assert!(workers > 0, "thread pool backend needs at least one worker");
        let (op_tx, op_rx) = unbounded::<ReadOp>();
        let (done_tx, done_rx) = unbounded::<Completion>();
        let waker: Arc<Mutex<Option<CompletionWaker>>> = Arc::new(Mutex::new(None));

        let mut handles = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let op_rx = op_rx.clone();
            let done_tx = done_tx.clone();
            let waker = Arc::clone(&waker);
            let handle = thread::Builder::new()
                .name(format!("offload-io-{worker_id}"))
                .spawn(move || io_worker(op_rx, done_tx, waker))?;
            handles.push(handle);
        }

        Ok(Self {
            ops: Some(op_tx),
            done: done_rx,
            waker,
            in_flight: 0,
            workers: handles,
        })
    }
}

fn io_worker(
    ops: Receiver<ReadOp>,
    done: Sender<Completion>,
    waker: Arc<Mutex<Option<CompletionWaker>>>,
) {
    for mut op in ops {
        let result = op.execute();
        if done.send(op.complete(result)).is_err() {
            return;
        }
        let wake = crate::sync::lock(&waker).clone();
        if let Some(wake) = wake {
            wake();
        }
    }
}

impl IoBackend for ThreadPoolBackend {
    fn name(&self) -> &'static str {
        "thread-pool"
    }

    fn submit(&mut self, op: ReadOp) -> Result<(), SubmitError> {
        let Some(ops) = &self.ops else {
            return Err(SubmitError {
                op,
                error: io::Error::new(io::ErrorKind::BrokenPipe, "backend shut down"),
            });
        };
        match ops.send(op) {
            Ok(()) => {
                self.in_flight += 1;
                Ok(())
            }
            Err(err) => Err(SubmitError {
                op: err.into_inner(),
                error: io::Error::new(io::ErrorKind::BrokenPipe, "read workers exited"),
            }),
        }
    }

    fn poll(&mut self, out: &mut Vec<Completion>) -> usize {
        let mut n = 0;
        loop {
            match self.done.try_recv() {
                Ok(c) => {
                    out.push(c);
                    n += 1;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.in_flight -= n;
        n
    }

    fn in_flight(&self) -> usize {
        self.in_flight
    }

    fn set_completion_waker(&mut self, waker: CompletionWaker) {
        *crate::sync::lock(&self.waker) = Some(waker);
    }
}

impl Drop for ThreadPoolBackend {
    fn drop(&mut self) {
        // Closing the op channel ends the workers once queued reads finish.
        self.ops = None;
        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("<unnamed>").to_owned();
            if handle.join().is_err() {
                log::error!("io worker {name} panicked");
            }
        }
    }
}
