//! Daemon decorator: interval-driven continuous execution
//!
//! `daemon(innerExpr, id=..., runInterval=ms, queueSize=Q,
//! terminate=bool)` re-runs its inner expression every interval on a
//! background task, pushing each resulting tuple into a bounded queue.
//! The producer blocks when the queue is full; `read()` dequeues,
//! blocking while the daemon runs. With `terminate=true` the daemon
//! stops itself after a run that yields no tuples and enqueues a final
//! EOF. Run failures are logged and retried on the next interval; they
//! never reach the consumer.

use crate::context::StreamContext;
use crate::error::{StreamError, StreamResult};
use crate::factory::{
    bool_param, required_str, stream_children, u64_param, usize_param, StreamFactory,
};
use crate::stream::TupleStream;
use async_trait::async_trait;
use rill_core::{ExprNode, Tuple};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Idle,
    Running,
    Stopped,
}

impl DaemonState {
    fn from_u8(raw: u8) -> DaemonState {
        match raw {
            1 => DaemonState::Running,
            2 => DaemonState::Stopped,
            _ => DaemonState::Idle,
        }
    }
}

enum RunOutcome {
    /// Data tuples pushed into the queue this run.
    Emitted(usize),
    /// The consumer dropped the queue; the loop must exit.
    ConsumerGone,
}

pub struct DaemonStream {
    id: String,
    inner: ExprNode,
    factory: StreamFactory,
    interval: Duration,
    queue_size: usize,
    terminate: bool,
    state: Arc<AtomicU8>,
    rx: Option<mpsc::Receiver<Tuple>>,
    shutdown: Option<watch::Sender<bool>>,
    handle: Option<JoinHandle<()>>,
    finished: bool,
}

impl DaemonStream {
    pub fn from_expr(node: &ExprNode, factory: &StreamFactory) -> StreamResult<Self> {
        let id = required_str(node, "daemon", "id")?.to_string();
        let interval = Duration::from_millis(u64_param(node, "daemon", "runInterval", 0)?);
        if interval.is_zero() {
            return Err(StreamError::missing("daemon", "runInterval"));
        }
        let children = stream_children(node, factory);
        let inner = match children.as_slice() {
            [inner] => (*inner).clone(),
            _ => return Err(StreamError::malformed("daemon", "exactly one nested stream")),
        };
        // surface inner construction errors now, not on the first run
        factory.construct(&inner)?;
        Ok(Self {
            id,
            inner,
            factory: factory.clone(),
            interval,
            queue_size: usize_param(node, "daemon", "queueSize", 64)?,
            terminate: bool_param(node, "daemon", "terminate", false)?,
            state: Arc::new(AtomicU8::new(0)),
            rx: None,
            shutdown: None,
            handle: None,
            finished: false,
        })
    }

    pub fn state(&self) -> DaemonState {
        DaemonState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Out-of-band stop signal: the loop exits after its current run
    /// instead of sleeping for the next interval.
    pub fn stop(&self) {
        if let Some(shutdown) = &self.shutdown {
            let _ = shutdown.send(true);
        }
    }

    async fn run_once(
        inner: &ExprNode,
        factory: &StreamFactory,
        ctx: &StreamContext,
        tx: &mpsc::Sender<Tuple>,
    ) -> StreamResult<RunOutcome> {
        let mut stream = factory.construct(inner)?;
        stream.open(ctx).await?;
        let outcome = Self::drain(stream.as_mut(), tx).await;
        let closed = stream.close().await;
        let outcome = outcome?;
        closed?;
        Ok(outcome)
    }

    async fn drain(
        stream: &mut (dyn TupleStream + '_),
        tx: &mpsc::Sender<Tuple>,
    ) -> StreamResult<RunOutcome> {
        let mut emitted = 0;
        loop {
            let tuple = stream.read().await?;
            if tuple.is_eof() {
                return Ok(RunOutcome::Emitted(emitted));
            }
            // a full queue blocks here until the consumer drains
            if tx.send(tuple).await.is_err() {
                return Ok(RunOutcome::ConsumerGone);
            }
            emitted += 1;
        }
    }

    async fn run_loop(
        id: String,
        inner: ExprNode,
        factory: StreamFactory,
        ctx: StreamContext,
        interval: Duration,
        terminate: bool,
        tx: mpsc::Sender<Tuple>,
        mut shutdown: watch::Receiver<bool>,
        state: Arc<AtomicU8>,
    ) {
        state.store(1, Ordering::Release);
        loop {
            match Self::run_once(&inner, &factory, &ctx, &tx).await {
                Ok(RunOutcome::ConsumerGone) => break,
                Ok(RunOutcome::Emitted(0)) if terminate => {
                    debug!(daemon = %id, "inner stream exhausted, terminating");
                    let _ = tx.send(Tuple::eof()).await;
                    break;
                }
                Ok(RunOutcome::Emitted(count)) => {
                    debug!(daemon = %id, count, "daemon run complete");
                }
                Err(err) => {
                    warn!(daemon = %id, "daemon run failed, retrying next interval: {err}");
                }
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        state.store(2, Ordering::Release);
    }
}

#[async_trait]
impl TupleStream for DaemonStream {
    async fn open(&mut self, ctx: &StreamContext) -> StreamResult<()> {
        let (tx, rx) = mpsc::channel(self.queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.rx = Some(rx);
        self.shutdown = Some(shutdown_tx);
        self.handle = Some(tokio::spawn(Self::run_loop(
            self.id.clone(),
            self.inner.clone(),
            self.factory.clone(),
            ctx.clone(),
            self.interval,
            self.terminate,
            tx,
            shutdown_rx,
            Arc::clone(&self.state),
        )));
        Ok(())
    }

    async fn read(&mut self) -> StreamResult<Tuple> {
        if self.finished {
            return Ok(Tuple::eof());
        }
        let rx = self
            .rx
            .as_mut()
            .ok_or_else(|| StreamError::Execution("daemon read before open".to_string()))?;
        match rx.recv().await {
            Some(tuple) => {
                if tuple.is_eof() {
                    self.finished = true;
                }
                Ok(tuple)
            }
            None => {
                // the loop stopped without a terminal tuple
                self.finished = true;
                Ok(Tuple::eof())
            }
        }
    }

    async fn close(&mut self) -> StreamResult<()> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(true);
        }
        // dropping the receiver unblocks a producer stuck on a full queue
        self.rx = None;
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        self.finished = true;
        Ok(())
    }
}

pub(crate) fn construct(
    node: &ExprNode,
    factory: &StreamFactory,
) -> StreamResult<Box<dyn TupleStream>> {
    Ok(Box::new(DaemonStream::from_expr(node, factory)?))
}
