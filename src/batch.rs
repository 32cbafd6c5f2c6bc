//! Batch runs of max-min searches over motif populations.
//!
//! A job pairs a source group with a target group. Every source motif is
//! searched against the whole target population and its [`SearchRecord`]
//! is stored under a descriptor key; keys already present are skipped.

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::MotifResult;
use crate::motif::{build_motif_population, MotifModel, MotifSpec, Topology};
use crate::search::{max_min_search, SearchConfig, SearchRecord};
use crate::storage::ArtifactStore;

/// A reproducible population of one motif spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotifGroup {
    pub topology: Topology,
    pub subtype: u8,
    pub activations: Vec<String>,
    #[serde(default)]
    pub aggregations: Vec<String>,
    pub population: usize,
    /// Unsigned nominal weights, resolved against the sign table.
    #[serde(default)]
    pub magnitudes: Option<Vec<f64>>,
    #[serde(default)]
    pub biases: Option<Vec<f64>>,
    #[serde(default)]
    pub seed: u64,
}

impl MotifGroup {
    pub fn spec(&self) -> MotifResult<MotifSpec> {
        let acts: Vec<&str> = self.activations.iter().map(String::as_str).collect();
        let aggs: Vec<&str> = self.aggregations.iter().map(String::as_str).collect();
        MotifSpec::new(self.topology, self.subtype, &acts, &aggs)
    }

    pub fn build(&self) -> MotifResult<Vec<MotifModel>> {
        build_motif_population(
            &self.spec()?,
            self.population,
            self.magnitudes.as_deref(),
            self.biases.as_deref(),
            self.seed,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub source: MotifGroup,
    pub target: MotifGroup,
    #[serde(default)]
    pub config: SearchConfig,
}

/// The on-disk batch file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPlan {
    #[serde(default = "default_parallelism")]
    pub max_parallelism: usize,
    pub jobs: Vec<BatchJob>,
}

fn default_parallelism() -> usize {
    1
}

/// Artifact key for one source motif against a target group.
pub fn job_key(source: &MotifSpec, index: usize, target: &MotifSpec) -> String {
    format!("{}__vs__{}", source.descriptor(index), target.label())
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchReport {
    pub ran: Vec<String>,
    pub skipped: Vec<String>,
    /// `(key, error message)`; jobs whose groups fail to build use `job-<n>`.
    pub failed: Vec<(String, String)>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

struct Task<'a> {
    key: String,
    source: MotifModel,
    pool: &'a [MotifModel],
    config: SearchConfig,
}

pub struct BatchRunner<'s, S: ArtifactStore> {
    store: &'s S,
    max_parallelism: usize,
}

impl<'s, S: ArtifactStore> BatchRunner<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            max_parallelism: 1,
        }
    }

    /// Number of worker threads; 0 is treated as 1.
    pub fn set_max_parallelism(&mut self, threads: usize) {
        self.max_parallelism = threads.max(1);
    }

    pub fn max_parallelism(&self) -> usize {
        self.max_parallelism
    }

    pub fn run_plan(&mut self, plan: &BatchPlan) -> BatchReport {
        self.set_max_parallelism(plan.max_parallelism);
        self.run(&plan.jobs)
    }

    pub fn run(&self, jobs: &[BatchJob]) -> BatchReport {
        let mut report = BatchReport::default();

        // Populations are built up front so tasks can borrow the target pools.
        let mut built: Vec<(MotifSpec, Vec<MotifModel>, MotifSpec, Vec<MotifModel>, SearchConfig)> =
            Vec::with_capacity(jobs.len());
        for (n, job) in jobs.iter().enumerate() {
            let group = || -> MotifResult<_> {
                Ok((
                    job.source.spec()?,
                    job.source.build()?,
                    job.target.spec()?,
                    job.target.build()?,
                    job.config,
                ))
            };
            match group() {
                Ok(b) => built.push(b),
                Err(e) => {
                    warn!(job = n, error = %e, "batch job rejected");
                    report.failed.push((format!("job-{n}"), e.to_string()));
                }
            }
        }

        let mut tasks = Vec::new();
        let mut queued = HashSet::new();
        for (source_spec, sources, target_spec, pool, config) in &built {
            for (i, source) in sources.iter().enumerate() {
                let key = job_key(source_spec, i, target_spec);
                if self.store.contains(&key) {
                    info!(key = %key, "artifact exists, skipping");
                    report.skipped.push(key);
                    continue;
                }
                if !queued.insert(key.clone()) {
                    warn!(key = %key, "duplicate key in plan, keeping the first job");
                    report.skipped.push(key);
                    continue;
                }
                tasks.push(Task {
                    key,
                    source: source.clone(),
                    pool,
                    config: *config,
                });
            }
        }

        if tasks.is_empty() {
            return report;
        }

        let threads = self.max_parallelism.min(tasks.len());
        let chunk = tasks.len().div_ceil(threads);

        let segments: Vec<&[Task<'_>]> = tasks.chunks(chunk).collect();
        let outcomes: Vec<(String, Result<(), String>)> = std::thread::scope(|scope| {
            let handles: Vec<_> = segments
                .iter()
                .map(|&segment| {
                    scope.spawn(move || {
                        segment
                            .iter()
                            .map(|task| (task.key.clone(), self.run_task_guarded(task)))
                            .collect::<Vec<_>>()
                    })
                })
                .collect();
            handles
                .into_iter()
                .zip(segments.iter())
                .flat_map(|(h, segment)| match h.join() {
                    Ok(done) => done,
                    Err(_) => {
                        warn!(tasks = segment.len(), "batch worker panicked");
                        segment
                            .iter()
                            .map(|task| (task.key.clone(), Err("worker panicked".to_string())))
                            .collect()
                    }
                })
                .collect()
        });

        for (key, outcome) in outcomes {
            match outcome {
                Ok(()) => report.ran.push(key),
                Err(e) => {
                    warn!(key = %key, error = %e, "batch task failed");
                    report.failed.push((key, e));
                }
            }
        }
        report
    }

    fn run_task_guarded(&self, task: &Task<'_>) -> Result<(), String> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.run_task(task))) {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err("task panicked".to_string()),
        }
    }

    fn run_task(&self, task: &Task<'_>) -> MotifResult<()> {
        let record: SearchRecord = max_min_search(&task.source, task.pool, &task.config)?;
        self.store.save(&task.key, &record)?;
        info!(
            key = %task.key,
            outer_iterations = record.len(),
            final_loss = record.last().map(|s| s.outer_loss).unwrap_or(f64::NAN),
            termination = ?record.termination,
            "batch task finished"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::landscape::InputRange;
    use crate::storage::MemoryStore;

    fn group(topology: Topology, subtype: u8, acts: &[&str], aggs: &[&str], n: usize) -> MotifGroup {
        MotifGroup {
            topology,
            subtype,
            activations: acts.iter().map(|s| s.to_string()).collect(),
            aggregations: aggs.iter().map(|s| s.to_string()).collect(),
            population: n,
            magnitudes: None,
            biases: None,
            seed: 5,
        }
    }

    fn quick() -> SearchConfig {
        SearchConfig::default()
            .with_grid(InputRange::default(), 7)
            .with_learn_rate(0.05)
            .with_stopping(1e-6, 3)
            .with_caps(15, 2)
    }

    fn job() -> BatchJob {
        BatchJob {
            source: group(Topology::Collider, 1, &["tanh"], &["sum"], 3),
            target: group(Topology::Chain, 2, &["tanh", "relu"], &[], 2),
            config: quick(),
        }
    }

    #[test]
    fn keys_follow_descriptors() {
        let j = job();
        let key = job_key(&j.source.spec().unwrap(), 2, &j.target.spec().unwrap());
        assert_eq!(key, "collider-1-tanh-sum#2__vs__chain-2-tanh_relu");
    }

    #[test]
    fn runs_then_skips_existing() {
        let store = MemoryStore::new();
        let runner = BatchRunner::new(&store);
        let first = runner.run(&[job()]);
        assert!(first.is_success());
        assert_eq!(first.ran.len(), 3);
        assert!(first.skipped.is_empty());
        for key in &first.ran {
            let record: SearchRecord = store.load(key).unwrap().unwrap();
            assert!(!record.is_empty());
        }

        let second = runner.run(&[job()]);
        assert!(second.ran.is_empty());
        assert_eq!(second.skipped.len(), 3);
    }

    #[test]
    fn parallel_runner_covers_every_key() {
        let serial = MemoryStore::new();
        BatchRunner::new(&serial).run(&[job()]);

        let parallel = MemoryStore::new();
        let mut runner = BatchRunner::new(&parallel);
        runner.set_max_parallelism(2);
        let report = runner.run(&[job()]);
        assert_eq!(report.ran.len(), 3);
        assert_eq!(parallel.keys(), serial.keys());
    }

    #[test]
    fn bad_groups_and_mismatched_channels_fail() {
        let mut bad_spec = job();
        bad_spec.source.subtype = 9;
        let mut fork_target = job();
        fork_target.target = group(Topology::Fork, 1, &["tanh", "tanh"], &[], 2);

        let store = MemoryStore::new();
        let report = BatchRunner::new(&store).run(&[bad_spec, fork_target]);
        assert_eq!(report.failed.len(), 1 + 3);
        assert_eq!(report.failed[0].0, "job-0");
        assert!(store.is_empty());
    }

    #[test]
    fn plans_parse_from_json() {
        let json = r#"{
            "max_parallelism": 2,
            "jobs": [{
                "source": {"topology": "coherent-loop", "subtype": 1,
                           "activations": ["tanh", "sigmoid"], "aggregations": ["sum", "sum"],
                           "population": 2, "magnitudes": [0.5, 0.5, 0.5]},
                "target": {"topology": "collider", "subtype": 1,
                           "activations": ["relu"], "aggregations": ["max"], "population": 4}
            }]
        }"#;
        let plan: BatchPlan = serde_json::from_str(json).unwrap();
        assert_eq!(plan.max_parallelism, 2);
        assert_eq!(plan.jobs[0].config, SearchConfig::default());
        let pop = plan.jobs[0].source.build().unwrap();
        assert_eq!(pop.len(), 2);
        assert!(pop[0].parameters().is_within_box());
    }

    struct FlakyStore {
        inner: MemoryStore,
    }

    impl ArtifactStore for FlakyStore {
        fn save_bytes(&self, key: &str, bytes: &[u8]) -> MotifResult<()> {
            if key.contains("#1__") {
                panic!("write failed for {key}");
            }
            self.inner.save_bytes(key, bytes)
        }

        fn load_bytes(&self, key: &str) -> MotifResult<Option<Vec<u8>>> {
            self.inner.load_bytes(key)
        }

        fn contains(&self, key: &str) -> bool {
            self.inner.contains(key)
        }
    }

    #[test]
    fn panicking_task_is_reported_failed() {
        let store = FlakyStore {
            inner: MemoryStore::new(),
        };
        let report = BatchRunner::new(&store).run(&[job()]);
        assert!(!report.is_success());
        assert_eq!(report.ran.len(), 2);
        assert_eq!(report.failed.len(), 1);
        assert!(report.failed[0].0.contains("#1__"));
        assert_eq!(report.ran.len() + report.failed.len(), 3);
    }

    #[test]
    fn duplicate_keys_run_once() {
        let mut again = job();
        again.target.seed = 99;
        let store = MemoryStore::new();
        let mut runner = BatchRunner::new(&store);
        runner.set_max_parallelism(3);
        let report = runner.run(&[job(), again]);
        assert!(report.is_success());
        assert_eq!(report.ran.len(), 3);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(store.len(), 3);
    }
}
