//! Batch coordinator: dispatches ready jobs to worker threads in dependency
//! order and collects their reports.

use crate::error::SchedulerError;
use crate::proof::cache::ProofCache;
use crate::scheduler::channel::{create_channels, CoordinatorChannels, CoordinatorMessage, WorkerChannels, WorkerMessage};
use crate::scheduler::config::SchedulerConfig;
use crate::scheduler::graph::JobGraph;
use crate::scheduler::job::{VerificationJob, Workspace};
use crate::scheduler::pipeline::JobRunner;
use crate::scheduler::report::{InconclusiveReason, Status, VerificationReport};
use crate::semantics::smt::SolverConfig;
use crossbeam_channel::RecvTimeoutError;
use std::collections::BTreeSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Reports of a batch, in submission order.
#[derive(Debug, Clone)]
pub struct BatchResult {
    pub reports: Vec<VerificationReport>,
    pub elapsed: Duration,
    /// Solver invocations made by this batch
    pub solver_calls: u64,
}

impl BatchResult {
    pub fn report(&self, job: &str) -> Option<&VerificationReport> {
        self.reports.iter().find(|r| r.job == job)
    }

    pub fn count(&self, status: Status) -> usize {
        self.reports.iter().filter(|r| r.status == status).count()
    }
}

/// Runs batches of jobs against one workspace, sharing one proof cache
/// across batches.
pub struct Scheduler {
    workspace: Arc<Workspace>,
    cache: Arc<ProofCache>,
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(workspace: Arc<Workspace>, cache: Arc<ProofCache>, config: SchedulerConfig) -> Self {
        Scheduler {
            workspace,
            cache,
            config,
        }
    }

    pub fn cache(&self) -> &Arc<ProofCache> {
        &self.cache
    }

    /// Run `jobs`. The graph is validated up front; a cycle or an override
    /// nobody produces rejects the whole batch.
    pub fn run(&self, jobs: Vec<VerificationJob>) -> Result<BatchResult, SchedulerError> {
        let graph = Arc::new(JobGraph::build(jobs, &self.cache)?);
        let start_time = Instant::now();
        let calls_before = self.cache.solver_calls();
        if graph.is_empty() {
            return Ok(BatchResult {
                reports: Vec::new(),
                elapsed: start_time.elapsed(),
                solver_calls: 0,
            });
        }

        let num_workers = self.config.num_workers.min(graph.len()).max(1);
        info!(jobs = graph.len(), workers = num_workers, "starting batch");
        let (coordinator_channels, worker_channels) = create_channels(num_workers);

        let worker_handles: Vec<_> = worker_channels
            .into_iter()
            .enumerate()
            .map(|(worker_id, channels)| {
                let graph = Arc::clone(&graph);
                let workspace = Arc::clone(&self.workspace);
                let cache = Arc::clone(&self.cache);
                let solver = self.config.solver.clone();
                std::thread::spawn(move || run_worker(worker_id, &graph, &workspace, &cache, solver, channels))
            })
            .collect();

        let reports = run_coordinator(&graph, coordinator_channels, num_workers, self.config.deadline, start_time);

        for handle in worker_handles {
            let _ = handle.join();
        }

        Ok(BatchResult {
            reports,
            elapsed: start_time.elapsed(),
            solver_calls: self.cache.solver_calls().saturating_sub(calls_before),
        })
    }
}

/// Dependency bookkeeping of one batch.
struct Progress {
    position: Vec<usize>,
    waiting: Vec<usize>,
    /// (position in topological order, job)
    ready: BTreeSet<(usize, usize)>,
    reports: Vec<Option<VerificationReport>>,
    started: Vec<bool>,
    done: usize,
}

impl Progress {
    fn new(graph: &JobGraph) -> Self {
        let n = graph.len();
        let mut position = vec![0; n];
        for (p, &job) in graph.order().iter().enumerate() {
            position[job] = p;
        }
        let waiting: Vec<usize> = (0..n).map(|j| graph.dependencies(j).len()).collect();
        let ready = (0..n).filter(|&j| waiting[j] == 0).map(|j| (position[j], j)).collect();
        Progress {
            position,
            waiting,
            ready,
            reports: vec![None; n],
            started: vec![false; n],
            done: 0,
        }
    }

    fn finish(&mut self, graph: &JobGraph, job: usize, report: VerificationReport) {
        self.reports[job] = Some(report);
        self.done += 1;
        for &d in graph.dependents(job) {
            self.waiting[d] -= 1;
            if self.waiting[d] == 0 && self.reports[d].is_none() {
                self.ready.insert((self.position[d], d));
            }
        }
    }

    /// First in-batch dependency of `job` that did not verify.
    fn failed_dependency(&self, graph: &JobGraph, job: usize) -> Option<usize> {
        graph
            .dependencies(job)
            .iter()
            .copied()
            .find(|&d| !self.reports[d].as_ref().is_some_and(VerificationReport::is_verified))
    }

    fn cancel_unstarted(&mut self, graph: &JobGraph) {
        self.ready.clear();
        for job in 0..graph.len() {
            if self.reports[job].is_none() && !self.started[job] {
                self.reports[job] = Some(VerificationReport::inconclusive(
                    &graph.job(job).name,
                    InconclusiveReason::Cancelled,
                ));
                self.done += 1;
            }
        }
    }
}

/// Coordinator loop: dispatch ready jobs to idle workers and collect
/// reports until every job has one.
fn run_coordinator(
    graph: &JobGraph,
    channels: CoordinatorChannels,
    num_workers: usize,
    deadline: Option<Duration>,
    start_time: Instant,
) -> Vec<VerificationReport> {
    let mut progress = Progress::new(graph);
    let mut idle: Vec<usize> = (0..num_workers).rev().collect();
    let deadline = deadline.map(|d| start_time + d);
    let mut cancelled = false;

    while progress.done < graph.len() {
        if !cancelled && deadline.is_some_and(|d| Instant::now() >= d) {
            info!("batch deadline reached, cancelling jobs not yet started");
            cancelled = true;
            channels.shared.signal_stop();
            progress.cancel_unstarted(graph);
            continue;
        }

        while !cancelled {
            let Some(&(pos, job)) = progress.ready.iter().next() else {
                break;
            };
            if let Some(dep) = progress.failed_dependency(graph, job) {
                progress.ready.remove(&(pos, job));
                let producer = graph.job(dep);
                let dependency = producer.produces().unwrap_or(&producer.implementation).to_string();
                debug!(job = %graph.job(job).name, dependency = %dependency, "dependency not verified");
                let report = VerificationReport::inconclusive(
                    &graph.job(job).name,
                    InconclusiveReason::DependencyNotVerified { dependency },
                );
                progress.finish(graph, job, report);
                continue;
            }
            let Some(worker) = idle.pop() else {
                break;
            };
            progress.ready.remove(&(pos, job));
            progress.started[job] = true;
            debug!(job = %graph.job(job).name, worker, "dispatching");
            if channels.to_workers[worker].send(CoordinatorMessage::Run { job }).is_err() {
                warn!(worker, "worker channel closed");
                let report = VerificationReport::inconclusive(
                    &graph.job(job).name,
                    InconclusiveReason::Error {
                        class: "WorkerLost".into(),
                    },
                );
                progress.finish(graph, job, report);
            }
        }
        if progress.done >= graph.len() {
            break;
        }

        match channels.from_workers.recv_timeout(Duration::from_millis(100)) {
            Ok(WorkerMessage::Finished { worker_id, job, report }) => {
                idle.push(worker_id);
                progress.finish(graph, job, *report);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    for tx in &channels.to_workers {
        let _ = tx.send(CoordinatorMessage::Stop);
    }

    progress
        .reports
        .into_iter()
        .enumerate()
        .map(|(job, r)| {
            r.unwrap_or_else(|| VerificationReport::inconclusive(&graph.job(job).name, InconclusiveReason::Cancelled))
        })
        .collect()
}

/// Worker loop: run jobs until told to stop.
fn run_worker(
    worker_id: usize,
    graph: &JobGraph,
    workspace: &Workspace,
    cache: &ProofCache,
    solver: SolverConfig,
    channels: WorkerChannels,
) {
    let solver = solver.with_cancel(channels.shared.stop_flag());
    let runner = JobRunner::new(workspace, cache, solver);
    while let Ok(msg) = channels.from_coordinator.recv() {
        let job = match msg {
            CoordinatorMessage::Run { job } => job,
            CoordinatorMessage::Stop => break,
        };
        let name = &graph.job(job).name;
        let report = if channels.shared.should_stop() {
            VerificationReport::inconclusive(name, InconclusiveReason::Cancelled)
        } else {
            catch_unwind(AssertUnwindSafe(|| runner.run(graph.job(job)))).unwrap_or_else(|_| {
                warn!(job = %name, "job panicked");
                VerificationReport::inconclusive(
                    name,
                    InconclusiveReason::Error {
                        class: "Panic".into(),
                    },
                )
            })
        };
        channels.shared.record_completion();
        let msg = WorkerMessage::Finished {
            worker_id,
            job,
            report: Box::new(report),
        };
        if channels.to_coordinator.send(msg).is_err() {
            break;
        }
    }
}
