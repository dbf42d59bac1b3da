//! Dependency graph of a batch: job B depends on job A when B uses the
//! override A produces.

use crate::error::{CycleError, SchedulerError};
use crate::proof::cache::ProofCache;
use crate::scheduler::job::VerificationJob;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone)]
pub struct JobGraph {
    jobs: Vec<VerificationJob>,
    /// Producers each job waits for
    deps: Vec<BTreeSet<usize>>,
    dependents: Vec<Vec<usize>>,
    order: Vec<usize>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    New,
    Active,
    Done,
}

impl JobGraph {
    /// Resolve every override a job names to a producer in the batch or an
    /// override already in `cache`, and reject cycles.
    pub fn build(jobs: Vec<VerificationJob>, cache: &ProofCache) -> Result<Self, SchedulerError> {
        let mut names = BTreeSet::new();
        let mut producers: BTreeMap<&str, usize> = BTreeMap::new();
        for (i, job) in jobs.iter().enumerate() {
            if !names.insert(job.name.as_str()) {
                return Err(SchedulerError::DuplicateJob(job.name.clone()));
            }
            if let Some(produced) = job.produces() {
                if producers.insert(produced, i).is_some() {
                    return Err(SchedulerError::DuplicateProducer(produced.to_string()));
                }
            }
        }

        let mut deps = vec![BTreeSet::new(); jobs.len()];
        for (i, job) in jobs.iter().enumerate() {
            for name in &job.overrides {
                match producers.get(name.as_str()) {
                    Some(&p) => {
                        deps[i].insert(p);
                    }
                    None if cache.has_override(name) => {}
                    None => {
                        return Err(SchedulerError::MissingOverride {
                            job: job.name.clone(),
                            name: name.clone(),
                        })
                    }
                }
            }
        }

        let mut dependents = vec![Vec::new(); jobs.len()];
        for (i, ds) in deps.iter().enumerate() {
            for &d in ds {
                dependents[d].push(i);
            }
        }

        let mut graph = JobGraph {
            jobs,
            deps,
            dependents,
            order: Vec::new(),
        };
        graph.check_acyclic()?;
        graph.order = graph.topological_order();
        Ok(graph)
    }

    fn check_acyclic(&self) -> Result<(), CycleError> {
        let mut marks = vec![Mark::New; self.jobs.len()];
        let mut path = Vec::new();
        for start in 0..self.jobs.len() {
            if marks[start] == Mark::New {
                self.visit(start, &mut marks, &mut path)?;
            }
        }
        Ok(())
    }

    fn visit(&self, node: usize, marks: &mut [Mark], path: &mut Vec<usize>) -> Result<(), CycleError> {
        marks[node] = Mark::Active;
        path.push(node);
        for &next in &self.dependents[node] {
            match marks[next] {
                Mark::Active => {
                    let from = path.iter().position(|&n| n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[from..].iter().map(|&n| self.jobs[n].name.clone()).collect();
                    cycle.push(self.jobs[next].name.clone());
                    return Err(CycleError { cycle });
                }
                Mark::New => self.visit(next, marks, path)?,
                Mark::Done => {}
            }
        }
        path.pop();
        marks[node] = Mark::Done;
        Ok(())
    }

    /// Kahn's algorithm; among ready jobs the earliest submitted goes first.
    fn topological_order(&self) -> Vec<usize> {
        let mut waiting: Vec<usize> = self.deps.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.jobs.len()).filter(|&i| waiting[i] == 0).collect();
        let mut order = Vec::with_capacity(self.jobs.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &d in &self.dependents[next] {
                waiting[d] -= 1;
                if waiting[d] == 0 {
                    ready.insert(d);
                }
            }
        }
        order
    }

    pub fn jobs(&self) -> &[VerificationJob] {
        &self.jobs
    }

    pub fn job(&self, index: usize) -> &VerificationJob {
        &self.jobs[index]
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Job indices in dependency order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    /// In-batch producers `index` waits for.
    pub fn dependencies(&self, index: usize) -> &BTreeSet<usize> {
        &self.deps[index]
    }

    pub fn dependents(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(name: &str, imp: &str, uses: &[&str]) -> VerificationJob {
        VerificationJob::new(name, imp, format!("{}_spec", imp)).with_overrides(uses.iter().copied())
    }

    fn names(graph: &JobGraph) -> Vec<&str> {
        graph.order().iter().map(|&i| graph.job(i).name.as_str()).collect()
    }

    #[test]
    fn test_order_respects_dependencies() {
        let cache = ProofCache::new();
        let jobs = vec![job("top", "f", &["g", "h"]), job("g", "g", &["h"]), job("h", "h", &[])];
        let graph = JobGraph::build(jobs, &cache).unwrap();
        assert_eq!(names(&graph), vec!["h", "g", "top"]);
        assert_eq!(graph.dependencies(0).len(), 2);
    }

    #[test]
    fn test_independent_jobs_keep_submission_order() {
        let cache = ProofCache::new();
        let jobs = vec![job("b", "b", &[]), job("a", "a", &[])];
        let graph = JobGraph::build(jobs, &cache).unwrap();
        assert_eq!(names(&graph), vec!["b", "a"]);
    }

    #[test]
    fn test_cycle_reported_with_path() {
        let cache = ProofCache::new();
        let jobs = vec![job("a", "a", &["b"]), job("b", "b", &["a"])];
        match JobGraph::build(jobs, &cache) {
            Err(SchedulerError::Cycle(c)) => {
                assert_eq!(c.cycle.len(), 3);
                assert_eq!(c.cycle.first(), c.cycle.last());
            }
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let cache = ProofCache::new();
        let jobs = vec![job("rec", "rec", &["rec"])];
        match JobGraph::build(jobs, &cache) {
            Err(SchedulerError::Cycle(c)) => assert_eq!(c.cycle, vec!["rec".to_string(), "rec".to_string()]),
            other => panic!("expected a cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_override() {
        let cache = ProofCache::new();
        let jobs = vec![job("a", "a", &["ghost"])];
        assert_eq!(
            JobGraph::build(jobs, &cache).unwrap_err(),
            SchedulerError::MissingOverride {
                job: "a".into(),
                name: "ghost".into()
            }
        );
    }

    #[test]
    fn test_duplicates_rejected() {
        let cache = ProofCache::new();
        let jobs = vec![job("a", "f", &[]), job("a", "g", &[])];
        assert_eq!(JobGraph::build(jobs, &cache).unwrap_err(), SchedulerError::DuplicateJob("a".into()));
        let jobs = vec![job("a", "f", &[]), job("b", "f", &[])];
        assert_eq!(
            JobGraph::build(jobs, &cache).unwrap_err(),
            SchedulerError::DuplicateProducer("f".into())
        );
    }
}
