//! Messages between the scheduler coordinator and its workers.

use crate::scheduler::report::VerificationReport;
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// Message sent from workers to the coordinator.
#[derive(Debug, Clone)]
pub enum WorkerMessage {
    /// Worker finished a job.
    Finished {
        worker_id: usize,
        job: usize,
        report: Box<VerificationReport>,
    },
}

/// Message sent from coordinator to workers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorMessage {
    /// Run the job at this index of the graph.
    Run { job: usize },
    /// No more work.
    Stop,
}

/// State every worker can check without a message round trip.
#[derive(Debug, Default)]
pub struct SharedState {
    /// Set once the batch deadline has passed. Shared with the solver so
    /// in-flight queries are abandoned too.
    pub should_stop: Arc<AtomicBool>,
    /// Jobs that reached a report on a worker.
    pub completed: AtomicUsize,
}

impl SharedState {
    pub fn should_stop(&self) -> bool {
        self.should_stop.load(Ordering::SeqCst)
    }

    pub fn signal_stop(&self) {
        self.should_stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.should_stop)
    }

    pub fn record_completion(&self) -> usize {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

/// Channel endpoints for a worker.
pub struct WorkerChannels {
    pub to_coordinator: Sender<WorkerMessage>,
    pub from_coordinator: Receiver<CoordinatorMessage>,
    pub shared: Arc<SharedState>,
}

/// Channel endpoints for the coordinator.
pub struct CoordinatorChannels {
    pub from_workers: Receiver<WorkerMessage>,
    /// One sender per worker, indexed by worker id
    pub to_workers: Vec<Sender<CoordinatorMessage>>,
    pub shared: Arc<SharedState>,
}

/// Create channels for the given number of workers.
pub fn create_channels(num_workers: usize) -> (CoordinatorChannels, Vec<WorkerChannels>) {
    let shared = Arc::new(SharedState::default());

    // workers never block on reporting
    let (worker_tx, coordinator_rx) = unbounded();

    let mut to_workers = Vec::with_capacity(num_workers);
    let mut worker_channels = Vec::with_capacity(num_workers);
    for _ in 0..num_workers {
        // a worker holds at most one job at a time, plus Stop
        let (coord_tx, worker_rx) = bounded(8);
        to_workers.push(coord_tx);
        worker_channels.push(WorkerChannels {
            to_coordinator: worker_tx.clone(),
            from_coordinator: worker_rx,
            shared: Arc::clone(&shared),
        });
    }

    let coordinator = CoordinatorChannels {
        from_workers: coordinator_rx,
        to_workers,
        shared,
    };
    (coordinator, worker_channels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::report::Status;

    #[test]
    fn test_shared_stop_signal() {
        let shared = SharedState::default();
        assert!(!shared.should_stop());
        let flag = shared.stop_flag();
        shared.signal_stop();
        assert!(shared.should_stop());
        assert!(flag.load(Ordering::SeqCst));
    }

    #[test]
    fn test_completion_counter() {
        let shared = SharedState::default();
        assert_eq!(shared.record_completion(), 1);
        assert_eq!(shared.record_completion(), 2);
        assert_eq!(shared.completed(), 2);
    }

    #[test]
    fn test_round_trip() {
        let (coordinator, workers) = create_channels(3);
        assert_eq!(workers.len(), 3);
        coordinator.to_workers[1].send(CoordinatorMessage::Run { job: 4 }).unwrap();
        assert_eq!(workers[1].from_coordinator.recv().unwrap(), CoordinatorMessage::Run { job: 4 });

        let report = VerificationReport::new("j", Status::Verified);
        workers[2]
            .to_coordinator
            .send(WorkerMessage::Finished {
                worker_id: 2,
                job: 4,
                report: Box::new(report),
            })
            .unwrap();
        match coordinator.from_workers.recv().unwrap() {
            WorkerMessage::Finished { worker_id, job, report } => {
                assert_eq!((worker_id, job), (2, 4));
                assert!(report.is_verified());
            }
        }
    }
}
