use std::{collections::HashMap, sync::Arc};

use log::{debug, error, info};

use tokio::sync::{
    Semaphore, mpsc,
    watch::{self, Receiver as WatchRx, Sender as WatchTx},
};

use crate::{
    error::Error,
    output::Settings as OutputSettings,
    pipeline::{Pipeline, Processed},
    report::{AttemptEvent, Reporter},
    task::{TaskId, TaskInput, TaskState, TaskStatus},
};

/// Folds one [AttemptEvent] into the task snapshot
fn latch(task_id: &TaskId, status: &WatchTx<TaskStatus>, event: AttemptEvent) {
    info!(
        "{} - attempt #{} ({}) {:?}: {}",
        task_id, event.attempt_number, event.method, event.outcome, event.message
    );
    status.send_modify(|snapshot| snapshot.events.push(event));
}

/// [Worker] runs one task to completion
struct Worker {
    task_id: TaskId,
    input: TaskInput,
    output: OutputSettings,
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,

    /// Snapshot publisher
    status: WatchTx<TaskStatus>,

    /// Cancellation request
    cancel: WatchRx<bool>,
}

impl Worker {
    async fn run(self) {
        let Self {
            task_id,
            input,
            output,
            pipeline,
            permits,
            status,
            cancel,
        } = self;

        let _permit = match permits.acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("{} - failed to schedule: {}", task_id, e);
                status.send_modify(|snapshot| snapshot.fail(&e.to_string()));
                return;
            },
        };

        if *cancel.borrow() {
            info!("{} - cancelled while pending", task_id);
            status.send_modify(|snapshot| snapshot.fail(&Error::Cancelled(1).to_string()));
            return;
        }

        status.send_modify(|snapshot| snapshot.state = TaskState::Progress);
        debug!("{} - deployed", task_id);

        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let name = task_id.to_string();

        let mut worker = tokio::task::spawn_blocking(move || {
            let reporter = Reporter::new(&name, event_tx);
            let output = input.output_settings(&output);

            match input.load() {
                Ok(raw) => pipeline.process(&raw, &output, &reporter, &cancel),
                Err(e) => {
                    error!("{} - {}", name, e);
                    Processed::unreadable(e)
                },
            }
        });

        let joined = loop {
            tokio::select! {
                Some(event) = event_rx.recv() => latch(&task_id, &status, event),
                joined = &mut worker => break joined,
            }
        };

        while let Ok(event) = event_rx.try_recv() {
            latch(&task_id, &status, event);
        }

        match joined {
            Ok(processed) => status.send_modify(|snapshot| snapshot.conclude(processed)),
            Err(e) => {
                error!("{} - worker crashed: {}", task_id, e);
                status.send_modify(|snapshot| snapshot.fail(&format!("worker crashed: {}", e)));
            },
        }

        info!("{} - {:?}", task_id, status.borrow().state);
    }
}

/// Handle to a running task
struct Handle {
    status: WatchRx<TaskStatus>,
    cancel: WatchTx<bool>,
}

/// [Scheduler] runs tasks concurrently, each of them on its own worker.
/// Tasks share no mutable state: each one publishes a read-only
/// [TaskStatus] snapshot.
pub struct Scheduler {
    pipeline: Arc<Pipeline>,
    /// Concurrent tasks limit
    permits: Arc<Semaphore>,
    tasks: HashMap<TaskId, Handle>,
}

impl Scheduler {
    pub fn new(pipeline: Pipeline, jobs: usize) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            permits: Arc::new(Semaphore::new(jobs.max(1))),
            tasks: HashMap::new(),
        }
    }

    /// Submits a new task. Requires a tokio runtime.
    pub fn submit(&mut self, input: TaskInput, output: OutputSettings) -> TaskId {
        let task_id = TaskId::new_v4();
        let filename = input.filename();

        let (status_tx, status_rx) = watch::channel(TaskStatus::pending(task_id, &filename));
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let worker = Worker {
            task_id,
            input,
            output,
            pipeline: Arc::clone(&self.pipeline),
            permits: Arc::clone(&self.permits),
            status: status_tx,
            cancel: cancel_rx,
        };

        tokio::spawn(worker.run());

        info!("{} - \"{}\" submitted", task_id, filename);

        self.tasks.insert(
            task_id,
            Handle {
                status: status_rx,
                cancel: cancel_tx,
            },
        );

        task_id
    }

    /// Current snapshot of this task
    pub fn status(&self, task_id: &TaskId) -> Option<TaskStatus> {
        let handle = self.tasks.get(task_id)?;
        let snapshot = handle.status.borrow().clone();
        Some(snapshot)
    }

    /// Requests cancellation. It takes effect before the next attempt.
    pub fn cancel(&self, task_id: &TaskId) -> bool {
        match self.tasks.get(task_id) {
            Some(handle) => {
                handle.cancel.send_replace(true);
                info!("{} - cancellation requested", task_id);
                true
            },
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for task_id in self.tasks.keys() {
            self.cancel(task_id);
        }
    }

    /// Waits for this task to reach a terminal state
    pub async fn wait(&self, task_id: &TaskId) -> Option<TaskStatus> {
        let mut status = self.tasks.get(task_id)?.status.clone();

        let terminal = status
            .wait_for(|snapshot| snapshot.state.is_terminal())
            .await
            .map(|snapshot| snapshot.clone())
            .ok();

        // worker gone: latest snapshot
        Some(terminal.unwrap_or_else(|| status.borrow().clone()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        classifier::Classifier,
        engine::{Engine, EngineSettings},
        input::RawInput,
        model::ScriptedModel,
        report::{Method, Outcome},
        task::TaskResult,
    };
    use std::path::{Path, PathBuf};

    const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47\n";

    const OUT_OF_RANGE: &str = "[{\"timestamp_ms\": 1, \"latitude\": 95, \"longitude\": 0}]";

    fn scheduler(jobs: usize) -> Scheduler {
        let engine = Engine::new(
            EngineSettings::default(),
            Arc::new(ScriptedModel::always(OUT_OF_RANGE)),
        );
        Scheduler::new(Pipeline::new(Classifier::default(), engine), jobs)
    }

    fn output(dir: &Path) -> OutputSettings {
        OutputSettings {
            prefix: Some(dir.to_string_lossy().to_string()),
            ..Default::default()
        }
    }

    fn upload(filename: &str, content: &str) -> TaskInput {
        TaskInput::Upload(RawInput::from_bytes(filename, content.as_bytes().to_vec()).unwrap())
    }

    #[tokio::test]
    async fn nmea_task() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(2);

        let task_id = scheduler.submit(upload("fix.nmea", GGA), output(dir.path()));
        assert_eq!(scheduler.status(&task_id).unwrap().state, TaskState::Pending);

        let status = scheduler.wait(&task_id).await.unwrap();
        assert!(status.succeeded());
        assert_eq!(status.filename, "fix.nmea");
        assert_eq!(status.attempts.len(), 1);

        let events = status
            .events
            .iter()
            .map(|e| (e.attempt_number, e.method, e.outcome))
            .collect::<Vec<_>>();
        assert_eq!(
            events,
            vec![
                (1, Method::Standard, Outcome::Started),
                (1, Method::Standard, Outcome::Passed),
            ]
        );

        match status.result {
            Some(TaskResult::Success {
                result_file,
                records,
            }) => {
                assert_eq!(records, 1);
                assert!(Path::new(&result_file).exists());
            },
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn exhausted_task_completes_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(1);

        let task_id = scheduler.submit(upload("mystery.dat", "lorem ipsum"), output(dir.path()));
        let status = scheduler.wait(&task_id).await.unwrap();

        assert_eq!(status.state, TaskState::Success);
        assert!(!status.succeeded());
        assert_eq!(status.attempts.len(), 11);
        assert_eq!(status.events.len(), 22);

        match status.result {
            Some(TaskResult::Error { message }) => {
                assert!(message.starts_with("processing failed: "));
                assert!(message.contains("latitude"));
            },
            other => panic!("unexpected result {:?}", other),
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreadable_input() {
        let mut scheduler = scheduler(1);

        let task_id = scheduler.submit(
            TaskInput::Path {
                path: PathBuf::from("/definitely/not/here.nmea"),
                format: None,
            },
            OutputSettings::default(),
        );

        let status = scheduler.wait(&task_id).await.unwrap();
        assert_eq!(status.state, TaskState::Success);
        assert!(status.events.is_empty());

        match status.result {
            Some(TaskResult::Error { message }) => assert!(message.contains("failed to read")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[tokio::test]
    async fn pending_task_cancellation() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(1);

        let task_id = scheduler.submit(upload("fix.nmea", GGA), output(dir.path()));
        assert!(scheduler.cancel(&task_id));

        let status = scheduler.wait(&task_id).await.unwrap();
        assert_eq!(status.state, TaskState::Failure);
        assert!(status.result.is_none());
        assert!(status.error.unwrap().starts_with("cancelled"));
    }

    #[tokio::test]
    async fn unknown_task() {
        let scheduler = scheduler(1);
        let task_id = TaskId::new_v4();

        assert!(scheduler.status(&task_id).is_none());
        assert!(!scheduler.cancel(&task_id));
        assert!(scheduler.wait(&task_id).await.is_none());
    }

    #[tokio::test]
    async fn concurrent_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let mut scheduler = scheduler(2);

        let ids = ["a.nmea", "b.nmea", "c.nmea"]
            .iter()
            .map(|name| scheduler.submit(upload(name, GGA), output(dir.path())))
            .collect::<Vec<_>>();

        for task_id in ids.iter() {
            assert!(scheduler.wait(task_id).await.unwrap().succeeded());
        }

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 3);
    }
}
