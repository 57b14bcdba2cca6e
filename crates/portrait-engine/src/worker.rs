//! Background thread that owns a [`PortraitService`] and runs its jobs one at
//! a time. The host submits jobs from its UI thread and drains completions
//! without blocking.

use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context};
use portrait_contracts::settings::PortraitSettings;
use portrait_contracts::store::IdentityStore;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::Portrait;
use crate::request::{GeneratedPayload, GenerationRequest};
use crate::service::PortraitService;

const WORKER_THREAD_NAME: &str = "pawn-portrait-worker";

#[derive(Debug, Clone)]
pub enum PortraitJob {
    Generate {
        identity: String,
        request: GenerationRequest,
        base_name: Option<String>,
    },
    Redisplay {
        identity: String,
    },
    Resolve {
        identity: String,
        payload: Option<GeneratedPayload>,
        base_name: Option<String>,
        force_refresh: bool,
    },
}

impl PortraitJob {
    pub fn identity(&self) -> &str {
        match self {
            Self::Generate { identity, .. }
            | Self::Redisplay { identity }
            | Self::Resolve { identity, .. } => identity,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Generate { .. } => "generate",
            Self::Redisplay { .. } => "redisplay",
            Self::Resolve { .. } => "resolve",
        }
    }
}

/// Result of one job. `portrait` is `None` when the job failed or nothing was
/// cached; the reason is in the log.
#[derive(Debug, Clone)]
pub struct PortraitCompletion {
    pub job_id: String,
    pub identity: String,
    pub portrait: Option<Portrait>,
}

enum WorkerCommand {
    Job { job_id: String, job: PortraitJob },
    UpdateSettings(PortraitSettings),
    Stop,
}

pub struct PortraitWorker<S: IdentityStore + Send + 'static> {
    sender: Option<mpsc::Sender<WorkerCommand>>,
    completions: mpsc::Receiver<PortraitCompletion>,
    handle: Option<thread::JoinHandle<PortraitService<S>>>,
}

impl<S: IdentityStore + Send + 'static> PortraitWorker<S> {
    pub fn spawn(service: PortraitService<S>) -> anyhow::Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run(service, rx, done_tx))
            .context("portrait worker thread spawn failed")?;
        Ok(Self {
            sender: Some(tx),
            completions: done_rx,
            handle: Some(handle),
        })
    }

    /// Queues a job and returns its id. Jobs run in submission order.
    pub fn submit(&self, job: PortraitJob) -> anyhow::Result<String> {
        let job_id = Uuid::new_v4().to_string();
        self.send(WorkerCommand::Job {
            job_id: job_id.clone(),
            job,
        })?;
        Ok(job_id)
    }

    /// Applies to jobs submitted after this call.
    pub fn update_settings(&self, settings: PortraitSettings) -> anyhow::Result<()> {
        self.send(WorkerCommand::UpdateSettings(settings))
    }

    pub fn poll_completions(&self) -> Vec<PortraitCompletion> {
        self.completions.try_iter().collect()
    }

    pub fn wait_completion(&self, timeout: Duration) -> Option<PortraitCompletion> {
        self.completions.recv_timeout(timeout).ok()
    }

    /// Finishes queued jobs, stops the thread and hands the service back so
    /// the host can persist its store.
    pub fn shutdown(mut self) -> anyhow::Result<PortraitService<S>> {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(WorkerCommand::Stop);
        }
        let handle = self
            .handle
            .take()
            .ok_or_else(|| anyhow!("portrait worker already stopped"))?;
        handle
            .join()
            .map_err(|_| anyhow!("portrait worker panicked"))
    }

    fn send(&self, command: WorkerCommand) -> anyhow::Result<()> {
        let tx = self
            .sender
            .as_ref()
            .ok_or_else(|| anyhow!("portrait worker is not running"))?;
        tx.send(command)
            .map_err(|_| anyhow!("portrait worker is not running"))
    }
}

impl<S: IdentityStore + Send + 'static> Drop for PortraitWorker<S> {
    fn drop(&mut self) {
        if let Some(tx) = self.sender.take() {
            let _ = tx.send(WorkerCommand::Stop);
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn run<S: IdentityStore>(
    mut service: PortraitService<S>,
    rx: mpsc::Receiver<WorkerCommand>,
    done: mpsc::Sender<PortraitCompletion>,
) -> PortraitService<S> {
    while let Ok(command) = rx.recv() {
        let (job_id, job) = match command {
            WorkerCommand::Job { job_id, job } => (job_id, job),
            WorkerCommand::UpdateSettings(settings) => {
                debug!(provider = settings.provider.as_str(), "portrait settings updated");
                service.set_settings(settings);
                continue;
            }
            WorkerCommand::Stop => break,
        };

        info!(job_id = job_id.as_str(), job = job.label(), identity = job.identity(), "portrait job started");
        let identity = job.identity().to_string();
        let portrait = match job {
            PortraitJob::Generate {
                identity,
                request,
                base_name,
            } => service.generate_and_cache(&identity, &request, base_name.as_deref()),
            PortraitJob::Redisplay { identity } => service.redisplay(&identity),
            PortraitJob::Resolve {
                identity,
                payload,
                base_name,
                force_refresh,
            } => service.resolve(payload.as_ref(), &identity, base_name.as_deref(), force_refresh),
        };

        let completion = PortraitCompletion {
            job_id,
            identity,
            portrait,
        };
        if done.send(completion).is_err() {
            debug!("completion receiver dropped");
        }
    }
    service
}
