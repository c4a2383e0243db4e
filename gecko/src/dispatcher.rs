//! Staged dispatcher.
//!
//! Sessions move through three bounded queues, one per [`Stage`]. A single
//! dispatch loop pulls sessions off the queues and spawns one task per
//! session per stage. The task runs that stage's handler, records the
//! stage's start/end attributes and, once the handler has returned, enqueues
//! the session into the stage the handler chose.
//!
//! A full queue makes the sender wait, which pushes backpressure all the way
//! back to the trigger that submitted the event.

use crate::supervisor::{Fault, Supervisor, panic_message};
use chrono::Utc;
use futures::{FutureExt, future::BoxFuture};
use gecko_core::{DispatchError, Session};
use std::{fmt, future::Future, panic::AssertUnwindSafe, sync::Arc};
use tokio::sync::{mpsc, watch};

/// Default capacity of every stage queue.
pub const DEFAULT_EVENTS_CAPACITY: usize = 8;

// ============================================================================
// Stages
// ============================================================================

/// One of the three dispatch stages, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Ordered interceptor chain.
    Interceptor,
    /// Driver fan-out.
    Driver,
    /// Completion callback.
    Output,
}

impl Stage {
    /// All stages in processing order.
    pub const ALL: [Stage; 3] = [Stage::Interceptor, Stage::Driver, Stage::Output];

    fn index(self) -> usize {
        match self {
            Stage::Interceptor => 0,
            Stage::Driver => 1,
            Stage::Output => 2,
        }
    }

    /// Stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Interceptor => "Interceptor",
            Stage::Driver => "Driver",
            Stage::Output => "Output",
        }
    }

    /// Attribute recorded when a session enters the stage.
    pub fn start_key(self) -> &'static str {
        match self {
            Stage::Interceptor => "Interceptor.Start",
            Stage::Driver => "Driver.Start",
            Stage::Output => "Output.Start",
        }
    }

    /// Attribute recorded when the stage handler has returned.
    pub fn end_key(self) -> &'static str {
        match self {
            Stage::Interceptor => "Interceptor.End",
            Stage::Driver => "Driver.End",
            Stage::Output => "Output.End",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a session goes after a stage handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Forward {
    /// Enqueue into the given stage.
    To(Stage),
    /// The session is finished.
    Done,
}

/// A stage handler.
pub type StageHandler = Arc<dyn Fn(Arc<Session>) -> BoxFuture<'static, Forward> + Send + Sync>;

/// Wrap an async function as a [`StageHandler`].
pub fn stage_handler<F, Fut>(handler: F) -> StageHandler
where
    F: Fn(Arc<Session>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Forward> + Send + 'static,
{
    Arc::new(move |session| Box::pin(handler(session)))
}

/// The handler of each stage.
#[derive(Clone)]
pub struct StageHandlers {
    /// Runs on [`Stage::Interceptor`].
    pub interceptor: StageHandler,
    /// Runs on [`Stage::Driver`].
    pub driver: StageHandler,
    /// Runs on [`Stage::Output`].
    pub output: StageHandler,
}

impl StageHandlers {
    fn get(&self, stage: Stage) -> &StageHandler {
        match stage {
            Stage::Interceptor => &self.interceptor,
            Stage::Driver => &self.driver,
            Stage::Output => &self.output,
        }
    }
}

impl fmt::Debug for StageHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageHandlers").finish_non_exhaustive()
    }
}

// ============================================================================
// Senders
// ============================================================================

/// Enqueues sessions into one stage.
#[derive(Clone)]
pub struct StageSender {
    stage: Stage,
    tx: mpsc::Sender<Arc<Session>>,
}

impl StageSender {
    /// Target stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Enqueue `session`, waiting while the stage is full.
    ///
    /// Fails with [`DispatchError::Closed`] once the dispatcher has stopped.
    pub async fn send(&self, session: Arc<Session>) -> Result<(), DispatchError> {
        self.tx.send(session).await.map_err(|_| DispatchError::Closed)
    }

    /// Returns `true` once the dispatcher has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for StageSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageSender")
            .field("stage", &self.stage)
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

// ============================================================================
// Dispatcher
// ============================================================================

/// The three stage queues and the loop serving them.
pub struct Dispatcher {
    capacity: usize,
    senders: [mpsc::Sender<Arc<Session>>; 3],
    receivers: [mpsc::Receiver<Arc<Session>>; 3],
}

impl Dispatcher {
    /// Create the stage queues, each holding up to `capacity` sessions.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx0, rx0) = mpsc::channel(capacity);
        let (tx1, rx1) = mpsc::channel(capacity);
        let (tx2, rx2) = mpsc::channel(capacity);
        Self {
            capacity,
            senders: [tx0, tx1, tx2],
            receivers: [rx0, rx1, rx2],
        }
    }

    /// Queue capacity per stage.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// A sender for `stage`.
    pub fn sender(&self, stage: Stage) -> StageSender {
        StageSender {
            stage,
            tx: self.senders[stage.index()].clone(),
        }
    }

    /// Run the dispatch loop until `shutdown` turns `true` (or its sender is
    /// dropped).
    ///
    /// Stopping ends intake only: tasks already spawned run their handler to
    /// completion, but the queues close with the loop, so sessions still
    /// waiting in them are discarded.
    pub async fn serve(
        self,
        handlers: StageHandlers,
        supervisor: Arc<Supervisor>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let Dispatcher {
            capacity,
            senders,
            receivers: [mut interceptor_rx, mut driver_rx, mut output_rx],
        } = self;
        let routes = Arc::new(senders);
        tracing::debug!(capacity, "dispatcher serving");

        loop {
            // Later stages are polled first so in-flight sessions drain
            // before new ones are admitted.
            let (stage, session) = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => break,
                Some(session) = output_rx.recv() => (Stage::Output, session),
                Some(session) = driver_rx.recv() => (Stage::Driver, session),
                Some(session) = interceptor_rx.recv() => (Stage::Interceptor, session),
                else => break,
            };
            let handler = Arc::clone(handlers.get(stage));
            tokio::spawn(run_stage(
                stage,
                session,
                handler,
                Arc::clone(&routes),
                Arc::clone(&supervisor),
            ));
        }

        tracing::debug!("dispatcher stopped");
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}

async fn run_stage(
    stage: Stage,
    session: Arc<Session>,
    handler: StageHandler,
    routes: Arc<[mpsc::Sender<Arc<Session>>; 3]>,
    supervisor: Arc<Supervisor>,
) {
    session.add_attribute(stage.start_key(), Utc::now());
    let input = Arc::clone(&session);
    let outcome = AssertUnwindSafe(async move { handler(input).await })
        .catch_unwind()
        .await;
    session.add_attribute(stage.end_key(), session.escaped());

    match outcome {
        Ok(Forward::To(next)) => {
            let id = session.id();
            if routes[next.index()].send(session).await.is_err() {
                tracing::warn!(session = id, stage = %next, "stage queue closed, session discarded");
            }
        }
        Ok(Forward::Done) => {}
        Err(payload) => supervisor.report(Fault::Panicked {
            stage,
            session: session.id(),
            topic: session.topic().to_string(),
            message: panic_message(&*payload),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervisor::FatalHandler;
    use gecko_core::Payload;
    use std::{sync::Mutex, time::Duration};

    fn quiet_supervisor() -> Arc<Supervisor> {
        let fatal: FatalHandler = Arc::new(|_: &Fault| {});
        Arc::new(Supervisor::new(false, fatal))
    }

    fn session(id: i64, done: impl FnOnce(Payload) + Send + 'static) -> Arc<Session> {
        Arc::new(Session::new(id, "/t", Payload::new(), Box::new(done)))
    }

    fn passthrough() -> StageHandlers {
        StageHandlers {
            interceptor: stage_handler(|_| async { Forward::To(Stage::Driver) }),
            driver: stage_handler(|_| async { Forward::To(Stage::Output) }),
            output: stage_handler(|s: Arc<Session>| async move {
                s.complete();
                Forward::Done
            }),
        }
    }

    #[tokio::test]
    async fn test_session_visits_every_stage() {
        let dispatcher = Dispatcher::new(4);
        let intake = dispatcher.sender(Stage::Interceptor);
        let (stop, shutdown) = watch::channel(false);
        let server = tokio::spawn(dispatcher.serve(passthrough(), quiet_supervisor(), shutdown));

        let (tx, rx) = futures::channel::oneshot::channel();
        let s = session(1, move |_| {
            let _ = tx.send(());
        });
        intake.send(s.clone()).await.unwrap();
        rx.await.unwrap();

        for stage in Stage::ALL {
            assert!(s.attributes().contains(stage.start_key()), "{stage} start");
        }
        // Output.End is written after the callback returns.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(s.attributes().contains(Stage::Output.end_key()));

        stop.send(true).unwrap();
        server.await.unwrap();
        assert_eq!(intake.send(session(2, |_| {})).await, Err(DispatchError::Closed));
    }

    #[tokio::test]
    async fn test_full_stage_blocks_sender() {
        let dispatcher = Dispatcher::new(2);
        let intake = dispatcher.sender(Stage::Interceptor);
        let completed = Arc::new(Mutex::new(0usize));

        let mk = |id| {
            let completed = completed.clone();
            session(id, move |_| *completed.lock().unwrap() += 1)
        };
        intake.send(mk(1)).await.unwrap();
        intake.send(mk(2)).await.unwrap();

        let third = tokio::spawn({
            let intake = intake.clone();
            let s = mk(3);
            async move { intake.send(s).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!third.is_finished(), "third send must wait for room");

        let (stop, shutdown) = watch::channel(false);
        let server = tokio::spawn(dispatcher.serve(passthrough(), quiet_supervisor(), shutdown));
        third.await.unwrap().unwrap();

        for _ in 0..50 {
            if *completed.lock().unwrap() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*completed.lock().unwrap(), 3);

        stop.send(true).unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let dispatcher = Dispatcher::new(4);
        let intake = dispatcher.sender(Stage::Interceptor);
        let faults = Arc::new(Mutex::new(Vec::new()));
        let sink = faults.clone();
        let fatal: FatalHandler = Arc::new(move |fault: &Fault| {
            sink.lock().unwrap().push(fault.to_string());
        });
        let supervisor = Arc::new(Supervisor::new(true, fatal));

        let mut handlers = passthrough();
        handlers.driver = stage_handler(|s: Arc<Session>| async move {
            if s.id() == 1 {
                panic!("driver exploded");
            }
            Forward::To(Stage::Output)
        });

        let (stop, shutdown) = watch::channel(false);
        let server = tokio::spawn(dispatcher.serve(handlers, supervisor, shutdown));

        let doomed = session(1, |_| {});
        intake.send(doomed.clone()).await.unwrap();
        let (tx, rx) = futures::channel::oneshot::channel();
        intake
            .send(session(2, move |_| {
                let _ = tx.send(());
            }))
            .await
            .unwrap();
        rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(!doomed.is_completed());
        assert!(doomed.attributes().contains("Driver.End"));
        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 1);
        assert!(faults[0].contains("driver exploded"));

        stop.send(true).unwrap();
        server.await.unwrap();
    }

    #[test]
    fn test_stage_keys() {
        assert_eq!(Stage::Driver.start_key(), "Driver.Start");
        assert_eq!(Stage::Output.end_key(), "Output.End");
        assert_eq!(Stage::Interceptor.to_string(), "Interceptor");
    }
}
