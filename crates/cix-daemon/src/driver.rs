//! Driver lifecycle: read loop, worker pool and shutdown.
//!
//! One task reads frames and never waits on scan work. Long-running
//! commands go through the priority queue to a pool of worker threads;
//! their responses, and the inline ones, reach a single writer task over a
//! channel so frames are never interleaved.

use crate::handler::Engine;
use cix_ipc::{
    decode, recover_id, Command, ErrorCode, FramedReader, FramedWriter, RequestFrame, Response,
    ResponseFrame,
};
use std::future::Future;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Why the driver stopped serving.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exit {
    /// `shutdown` request with this id
    Shutdown(u64),
    /// Transport closed between frames
    Disconnected,
    /// SIGINT, SIGTERM or SIGHUP
    Signalled,
    /// The byte stream can no longer be framed
    Desynchronized(String),
}

impl Exit {
    /// Process exit status.
    pub fn code(&self) -> u8 {
        match self {
            Exit::Desynchronized(_) => 2,
            _ => 0,
        }
    }
}

/// Serves one transport until shutdown.
pub struct Driver {
    engine: Arc<Engine>,
}

impl Driver {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Serve requests from `reader`, answering on `writer`, until a
    /// `shutdown` request, end of stream, `stop` resolving, or a framing
    /// error.
    ///
    /// On the way out queued work is drained (or discarded when the stream
    /// is desynchronized), dirty zones are saved, and only then is a
    /// `shutdown` acknowledged.
    pub async fn serve<R, W, S>(
        &self,
        mut reader: FramedReader<R>,
        writer: FramedWriter<W>,
        stop: S,
    ) -> std::io::Result<Exit>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send + 'static,
        S: Future<Output = ()> + Send,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer_task = tokio::spawn(write_responses(writer, rx));
        let workers = spawn_workers(&self.engine, tx.clone())?;
        info!(workers = workers.len(), "Driver ready");

        let exit = self.read_loop(&mut reader, &tx, stop).await;
        match &exit {
            Exit::Desynchronized(reason) => {
                error!(reason = %reason, "Protocol stream desynchronized");
                let dropped = self.engine.queue().remove_matching(|_| true);
                if dropped > 0 {
                    warn!(dropped, "Discarded queued requests");
                }
            }
            other => info!(exit = ?other, "Stopping"),
        }

        self.engine.queue().close();
        let joined = tokio::task::spawn_blocking(move || {
            for worker in workers {
                if worker.join().is_err() {
                    error!("Worker thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            error!(error = %e, "Failed to join workers");
        }

        match self.engine.database().save_all() {
            Ok(saved) => info!(zones = saved, "Indexes saved"),
            Err(e) => error!(error = %e, "Failed to save indexes"),
        }

        if let Exit::Shutdown(id) = exit {
            let _ = tx.send(ResponseFrame::new(id, Response::ok()));
        }
        drop(tx);
        if let Err(e) = writer_task.await {
            error!(error = %e, "Writer task failed");
        }

        Ok(exit)
    }

    async fn read_loop<R, S>(
        &self,
        reader: &mut FramedReader<R>,
        tx: &mpsc::UnboundedSender<ResponseFrame>,
        stop: S,
    ) -> Exit
    where
        R: AsyncRead + Unpin,
        S: Future<Output = ()>,
    {
        tokio::pin!(stop);
        loop {
            let read = tokio::select! {
                read = reader.read_frame() => read,
                _ = &mut stop => return Exit::Signalled,
            };

            let body = match read {
                Ok(Some(body)) => body,
                Ok(None) => return Exit::Disconnected,
                Err(e) => return Exit::Desynchronized(e.to_string()),
            };

            let frame: RequestFrame = match decode(&body) {
                Ok(frame) => frame,
                Err(e) => {
                    let id = recover_id(&body).unwrap_or(0);
                    warn!(id, error = %e, "Rejected malformed request");
                    let response = Response::error(ErrorCode::InvalidRequest, e.to_string());
                    self.engine.record(Instant::now(), &response);
                    let _ = tx.send(ResponseFrame::new(id, response));
                    continue;
                }
            };

            if let Some(exit) = self.dispatch(frame, tx) {
                return exit;
            }
        }
    }

    /// Answer or queue one request. Returns an exit for `shutdown`.
    fn dispatch(
        &self,
        frame: RequestFrame,
        tx: &mpsc::UnboundedSender<ResponseFrame>,
    ) -> Option<Exit> {
        let started = Instant::now();
        let id = frame.id;
        debug!(id, command = frame.command.name(), "Request");

        if frame.command == Command::Shutdown {
            return Some(Exit::Shutdown(id));
        }

        if let Some(response) = self.engine.handle_inline(&frame.command) {
            self.engine.record(started, &response);
            let _ = tx.send(ResponseFrame::new(id, response));
            return None;
        }

        if let Err(e) = self.engine.submit(frame) {
            let response = Response::error(e.code(), e.to_string());
            self.engine.record(started, &response);
            let _ = tx.send(ResponseFrame::new(id, response));
        }
        None
    }
}

fn spawn_workers(
    engine: &Arc<Engine>,
    tx: mpsc::UnboundedSender<ResponseFrame>,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    (0..engine.workers().max(1))
        .map(|n| {
            let engine = engine.clone();
            let tx = tx.clone();
            std::thread::Builder::new()
                .name(format!("cix-worker-{}", n))
                .spawn(move || {
                    while let Some((key, job)) = engine.queue().get() {
                        if let Some(frame) = engine.run_job(key, job) {
                            // The writer is gone when the transport died;
                            // keep draining so the queue empties.
                            let _ = tx.send(frame);
                        }
                    }
                    debug!(worker = n, "Worker stopped");
                })
        })
        .collect()
}

async fn write_responses<W>(mut writer: FramedWriter<W>, mut rx: mpsc::UnboundedReceiver<ResponseFrame>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = rx.recv().await {
        if let Err(e) = writer.write(&frame).await {
            error!(id = frame.id, error = %e, "Failed to write response");
            break;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "Transport already closed");
    }
}
