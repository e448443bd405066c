//! Workflow graphs and their sequential runner.
//!
//! A [`Pipeline`] is a set of named tasks with dependencies. Before running,
//! the graph is checked for duplicate ids, unknown dependencies, and cycles,
//! then ordered topologically (ties broken by declaration order, so the
//! order is deterministic). Tasks run one at a time:
//!
//! - a failing task is retried up to the pipeline's retry count, with a
//!   fixed delay between attempts;
//! - the vector validation gate is never retried;
//! - a task whose dependency failed or was skipped is skipped;
//! - the run fails if any task failed.
//!
//! Two graphs are built from configuration: [`daily_pipeline`] (warehouse
//! ETL, quality checks, report, documents, vector refresh) and
//! [`vectors_pipeline`] (chunk → embed → store → index → validate).

use anyhow::Result;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::vector_store::{self, ValidationError};
use crate::{chunk, connector_s3, db, embed_cmd, embedding, ingest, quality, report};

pub type TaskFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
type TaskFn<'a> = Box<dyn Fn() -> TaskFuture<'a> + Send + Sync + 'a>;

#[derive(Debug, Error, PartialEq)]
pub enum PipelineError {
    #[error("unknown pipeline '{0}' (expected 'daily' or 'vectors')")]
    UnknownPipeline(String),
    #[error("duplicate task id '{0}'")]
    DuplicateTask(String),
    #[error("task '{task}' depends on unknown task '{dependency}'")]
    UnknownDependency { task: String, dependency: String },
    #[error("dependency cycle among tasks: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("pipeline '{pipeline}' failed: failed tasks [{}], skipped [{}]", .failed.join(", "), .skipped.join(", "))]
    Failed {
        pipeline: String,
        failed: Vec<String>,
        skipped: Vec<String>,
    },
}

pub struct Task<'a> {
    pub id: &'static str,
    pub deps: Vec<&'static str>,
    /// `false` for hard gates.
    pub retryable: bool,
    run: TaskFn<'a>,
}

impl<'a> Task<'a> {
    pub fn new<F>(id: &'static str, deps: &[&'static str], run: F) -> Self
    where
        F: Fn() -> TaskFuture<'a> + Send + Sync + 'a,
    {
        Self {
            id,
            deps: deps.to_vec(),
            retryable: true,
            run: Box::new(run),
        }
    }

    pub fn gate(mut self) -> Self {
        self.retryable = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub pipeline: String,
    pub outcomes: Vec<(String, TaskOutcome)>,
}

impl RunReport {
    pub fn outcome(&self, id: &str) -> Option<&TaskOutcome> {
        self.outcomes.iter().find(|(t, _)| t == id).map(|(_, o)| o)
    }

    pub fn succeeded(&self) -> bool {
        self.outcomes
            .iter()
            .all(|(_, o)| matches!(o, TaskOutcome::Succeeded { .. }))
    }

    fn ids_where(&self, pred: impl Fn(&TaskOutcome) -> bool) -> Vec<String> {
        self.outcomes
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(t, _)| t.clone())
            .collect()
    }
}

pub struct Pipeline<'a> {
    pub name: String,
    tasks: Vec<Task<'a>>,
    retries: u32,
    retry_delay: Duration,
}

impl<'a> Pipeline<'a> {
    pub fn new(name: &str, retries: u32, retry_delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            tasks: Vec::new(),
            retries,
            retry_delay,
        }
    }

    pub fn task(mut self, task: Task<'a>) -> Self {
        self.tasks.push(task);
        self
    }

    pub fn task_ids(&self) -> Vec<&'static str> {
        self.tasks.iter().map(|t| t.id).collect()
    }

    /// Validate the graph and return task indices in execution order.
    pub fn execution_order(&self) -> Result<Vec<usize>, PipelineError> {
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, task) in self.tasks.iter().enumerate() {
            if index.insert(task.id, i).is_some() {
                return Err(PipelineError::DuplicateTask(task.id.to_string()));
            }
        }

        let mut indegree = vec![0usize; self.tasks.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); self.tasks.len()];
        for (i, task) in self.tasks.iter().enumerate() {
            for dep in &task.deps {
                let &d = index
                    .get(dep)
                    .ok_or_else(|| PipelineError::UnknownDependency {
                        task: task.id.to_string(),
                        dependency: dep.to_string(),
                    })?;
                indegree[i] += 1;
                dependents[d].push(i);
            }
        }

        // Kahn's algorithm, always taking the earliest declared ready task
        let mut ready: Vec<usize> = (0..self.tasks.len()).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(self.tasks.len());
        while !ready.is_empty() {
            ready.sort_unstable_by(|a, b| b.cmp(a));
            let Some(next) = ready.pop() else { break };
            order.push(next);
            for &dependent in &dependents[next] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push(dependent);
                }
            }
        }

        if order.len() != self.tasks.len() {
            let placed: HashSet<usize> = order.iter().copied().collect();
            let stuck = (0..self.tasks.len())
                .filter(|i| !placed.contains(i))
                .map(|i| self.tasks[i].id.to_string())
                .collect();
            return Err(PipelineError::Cycle(stuck));
        }
        Ok(order)
    }

    /// Run every task in order; fails with [`PipelineError::Failed`] if any
    /// task did not succeed.
    pub async fn run(&self) -> Result<RunReport, PipelineError> {
        let report = self.execute().await?;
        into_result(report)
    }

    /// Run every task in order and report per-task outcomes. Only graph
    /// errors are returned as `Err`.
    pub async fn execute(&self) -> Result<RunReport, PipelineError> {
        let order = self.execution_order()?;
        info!(pipeline = %self.name, tasks = order.len(), "pipeline started");

        let mut state: HashMap<&str, TaskOutcome> = HashMap::new();
        let mut outcomes = Vec::with_capacity(order.len());
        for i in order {
            let task = &self.tasks[i];
            let blocked = task.deps.iter().any(|d| {
                !matches!(state.get(d), Some(TaskOutcome::Succeeded { .. }))
            });
            let outcome = if blocked {
                warn!(task = task.id, "upstream task did not succeed, skipping");
                TaskOutcome::Skipped
            } else {
                self.run_task(task).await
            };
            state.insert(task.id, outcome.clone());
            outcomes.push((task.id.to_string(), outcome));
        }

        let report = RunReport {
            pipeline: self.name.clone(),
            outcomes,
        };
        if report.succeeded() {
            info!(pipeline = %self.name, "pipeline finished");
        } else {
            error!(pipeline = %self.name, "pipeline failed");
        }
        Ok(report)
    }

    async fn run_task(&self, task: &Task<'a>) -> TaskOutcome {
        let max_attempts = if task.retryable { self.retries + 1 } else { 1 };
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!(task = task.id, attempt, "task started");
            match (task.run)().await {
                Ok(()) => {
                    info!(task = task.id, attempt, "task succeeded");
                    return TaskOutcome::Succeeded { attempts: attempt };
                }
                Err(e) => {
                    let hard_gate = e.downcast_ref::<ValidationError>().is_some();
                    if hard_gate || attempt >= max_attempts {
                        error!(task = task.id, attempt, error = %format!("{:#}", e), "task failed");
                        return TaskOutcome::Failed {
                            attempts: attempt,
                            error: format!("{:#}", e),
                        };
                    }
                    warn!(
                        task = task.id,
                        attempt,
                        error = %format!("{:#}", e),
                        delay_secs = self.retry_delay.as_secs(),
                        "task failed, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

fn into_result(report: RunReport) -> Result<RunReport, PipelineError> {
    if report.succeeded() {
        return Ok(report);
    }
    Err(PipelineError::Failed {
        pipeline: report.pipeline.clone(),
        failed: report.ids_where(|o| matches!(o, TaskOutcome::Failed { .. })),
        skipped: report.ids_where(|o| matches!(o, TaskOutcome::Skipped)),
    })
}

fn boxed<'a, F>(fut: F) -> TaskFuture<'a>
where
    F: Future<Output = Result<()>> + Send + 'a,
{
    Box::pin(fut)
}

// ============ Stages ============

async fn generate_embeddings_stage(config: &Config) -> Result<()> {
    let provider = embedding::create_provider(&config.embedding)?;
    embed_cmd::generate_embeddings(config, provider.as_ref()).await?;
    Ok(())
}

async fn validate_stage(config: &Config) -> Result<()> {
    let pool = db::connect_docstore(config).await?;
    let result =
        vector_store::validate_vector_store(&pool, config.validation.min_embedded_ratio).await;
    pool.close().await;
    result.map(|_| ())
}

/// Chunk → embed → store → index → validate for documents not yet in the
/// vector store.
async fn refresh_vector_store(config: &Config) -> Result<()> {
    if !config.embedding.is_enabled() {
        warn!("embedding provider disabled, vector store not updated");
        return Ok(());
    }
    chunk::chunk_new_documents(config).await?;
    generate_embeddings_stage(config).await?;
    vector_store::store_embeddings(config).await?;
    vector_store::create_vector_index_stage(config).await?;
    validate_stage(config).await
}

async fn with_warehouse<F, Fut, T>(config: &Config, f: F) -> Result<T>
where
    F: FnOnce(sqlx::SqlitePool) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let pool = db::connect_warehouse(config).await?;
    let result = f(pool.clone()).await;
    pool.close().await;
    result
}

/// The daily operations graph for `date`.
pub fn daily_pipeline(config: &Config, date: NaiveDate) -> Pipeline<'_> {
    Pipeline::new(
        "daily",
        config.pipeline.daily_retries,
        Duration::from_secs(config.pipeline.retry_delay_secs),
    )
    .task(Task::new("start_pipeline", &[], move || {
        boxed(async move {
            info!(%date, "starting aviation data pipeline");
            Ok(())
        })
    }))
    .task(Task::new("extract_flight_data", &["start_pipeline"], move || {
        boxed(async move {
            with_warehouse(config, |pool| async move {
                report::extract_flight_data(&pool, date).await
            })
            .await?;
            Ok(())
        })
    }))
    .task(Task::new("extract_cargo_data", &["start_pipeline"], move || {
        boxed(async move {
            with_warehouse(config, |pool| async move {
                report::extract_cargo_data(&pool, date).await
            })
            .await?;
            Ok(())
        })
    }))
    .task(Task::new("load_external_data", &["start_pipeline"], move || {
        boxed(async move {
            connector_s3::load_external_data(config).await?;
            Ok(())
        })
    }))
    .task(Task::new(
        "data_quality_flights",
        &["extract_flight_data"],
        move || {
            boxed(async move {
                with_warehouse(config, |pool| async move {
                    Ok(quality::check_flights(&pool).await?)
                })
                .await
            })
        },
    ))
    .task(Task::new(
        "data_quality_cargo",
        &["extract_cargo_data"],
        move || {
            boxed(async move {
                with_warehouse(config, |pool| async move {
                    Ok(quality::check_cargo(&pool).await?)
                })
                .await
            })
        },
    ))
    .task(Task::new(
        "process_aviation_documents",
        &["load_external_data"],
        move || {
            boxed(async move {
                ingest::process_documents(config).await?;
                Ok(())
            })
        },
    ))
    .task(Task::new(
        "update_vector_store",
        &["process_aviation_documents"],
        move || boxed(refresh_vector_store(config)),
    ))
    .task(Task::new(
        "generate_daily_report",
        &["data_quality_flights", "data_quality_cargo"],
        move || {
            boxed(async move {
                with_warehouse(config, |pool| async move {
                    report::generate_daily_report(&pool, date).await
                })
                .await?;
                Ok(())
            })
        },
    ))
    .task(Task::new(
        "end_pipeline",
        &["generate_daily_report", "update_vector_store"],
        move || {
            boxed(async move {
                info!("aviation data pipeline completed successfully");
                Ok(())
            })
        },
    ))
}

/// The vector store build graph.
pub fn vectors_pipeline(config: &Config) -> Pipeline<'_> {
    Pipeline::new(
        "vectors",
        config.pipeline.vectors_retries,
        Duration::from_secs(config.pipeline.retry_delay_secs),
    )
    .task(Task::new("chunk_documents", &[], move || {
        boxed(async move {
            chunk::chunk_documents(config).await?;
            Ok(())
        })
    }))
    .task(Task::new(
        "generate_embeddings",
        &["chunk_documents"],
        move || boxed(generate_embeddings_stage(config)),
    ))
    .task(Task::new(
        "store_embeddings",
        &["generate_embeddings"],
        move || {
            boxed(async move {
                vector_store::store_embeddings(config).await?;
                Ok(())
            })
        },
    ))
    .task(Task::new(
        "create_vector_index",
        &["store_embeddings"],
        move || boxed(vector_store::create_vector_index_stage(config)),
    ))
    .task(
        Task::new(
            "validate_vector_store",
            &["create_vector_index"],
            move || boxed(validate_stage(config)),
        )
        .gate(),
    )
}

/// CLI entry point for `avrag pipeline <name>`.
pub async fn run_pipeline(config: &Config, name: &str, date: NaiveDate) -> Result<()> {
    let pipeline = match name {
        "daily" => daily_pipeline(config, date),
        "vectors" => vectors_pipeline(config),
        other => return Err(PipelineError::UnknownPipeline(other.to_string()).into()),
    };

    let report = pipeline.execute().await?;

    println!("pipeline {}", report.pipeline);
    for (task, outcome) in &report.outcomes {
        match outcome {
            TaskOutcome::Succeeded { attempts } => println!("  {}: ok ({} attempt(s))", task, attempts),
            TaskOutcome::Failed { attempts, error } => {
                println!("  {}: failed after {} attempt(s): {}", task, attempts, error)
            }
            TaskOutcome::Skipped => println!("  {}: skipped", task),
        }
    }
    into_result(report)?;
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn ok_task(id: &'static str, deps: &[&'static str], log: Arc<Mutex<Vec<&'static str>>>) -> Task<'static> {
        Task::new(id, deps, move || {
            let log = log.clone();
            boxed(async move {
                log.lock().unwrap().push(id);
                Ok(())
            })
        })
    }

    fn fixture_config(dir: &std::path::Path) -> Config {
        let toml = format!(
            r#"
[warehouse]
path = "{dir}/warehouse.sqlite"

[docstore]
path = "{dir}/docs.sqlite"

[documents]
paths = ["{dir}/docs"]

[chunking]
output_dir = "{dir}/chunks"

[embedding]
output_dir = "{dir}/embeddings"

[pipeline]
retry_delay_secs = 0
"#,
            dir = dir.display()
        );
        crate::config::parse_config(&toml).unwrap()
    }

    #[test]
    fn daily_graph_orders_deterministically() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = fixture_config(dir.path());
        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let pipeline = daily_pipeline(&config, date);
        let ids = pipeline.task_ids();
        let order: Vec<&str> = pipeline
            .execution_order()
            .unwrap()
            .into_iter()
            .map(|i| ids[i])
            .collect();
        assert_eq!(
            order,
            vec![
                "start_pipeline",
                "extract_flight_data",
                "extract_cargo_data",
                "load_external_data",
                "data_quality_flights",
                "data_quality_cargo",
                "process_aviation_documents",
                "update_vector_store",
                "generate_daily_report",
                "end_pipeline",
            ]
        );
    }

    #[test]
    fn vectors_graph_is_a_chain_ending_in_a_gate() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = fixture_config(dir.path());
        let pipeline = vectors_pipeline(&config);
        assert_eq!(pipeline.execution_order().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(!pipeline.tasks[4].retryable);
        assert_eq!(pipeline.retries, 3);
    }

    #[test]
    fn invalid_graphs_are_rejected() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let unknown = Pipeline::new("t", 0, Duration::ZERO).task(ok_task("a", &["missing"], log.clone()));
        assert_eq!(
            unknown.execution_order(),
            Err(PipelineError::UnknownDependency {
                task: "a".to_string(),
                dependency: "missing".to_string()
            })
        );

        let cyclic = Pipeline::new("t", 0, Duration::ZERO)
            .task(ok_task("root", &[], log.clone()))
            .task(ok_task("a", &["b"], log.clone()))
            .task(ok_task("b", &["a"], log.clone()));
        assert_eq!(
            cyclic.execution_order(),
            Err(PipelineError::Cycle(vec!["a".to_string(), "b".to_string()]))
        );

        let dup = Pipeline::new("t", 0, Duration::ZERO)
            .task(ok_task("a", &[], log.clone()))
            .task(ok_task("a", &[], log));
        assert_eq!(dup.execution_order(), Err(PipelineError::DuplicateTask("a".to_string())));
    }

    #[tokio::test]
    async fn failing_task_is_retried_then_dependents_skipped() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let pipeline = Pipeline::new("t", 2, Duration::ZERO)
            .task(ok_task("start", &[], log.clone()))
            .task(Task::new("flaky", &["start"], move || {
                let counter = counter.clone();
                boxed(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    bail!("warehouse unavailable")
                })
            }))
            .task(ok_task("after", &["flaky"], log.clone()))
            .task(ok_task("independent", &["start"], log.clone()));

        let err = pipeline.run().await.unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            err,
            PipelineError::Failed {
                pipeline: "t".to_string(),
                failed: vec!["flaky".to_string()],
                skipped: vec!["after".to_string()],
            }
        );
        assert_eq!(*log.lock().unwrap(), vec!["start", "independent"]);
    }

    #[tokio::test]
    async fn flaky_task_recovers_within_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let pipeline = Pipeline::new("t", 3, Duration::ZERO).task(Task::new("flaky", &[], move || {
            let counter = counter.clone();
            boxed(async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    bail!("transient");
                }
                Ok(())
            })
        }));

        let report = pipeline.run().await.unwrap();
        assert_eq!(report.outcome("flaky"), Some(&TaskOutcome::Succeeded { attempts: 3 }));
    }

    #[tokio::test]
    async fn validation_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let pipeline = Pipeline::new("t", 3, Duration::ZERO).task(Task::new("check", &[], move || {
            let counter = counter.clone();
            boxed(async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ValidationError::NoEmbeddings { total: 4 }.into())
            })
        }));

        assert!(pipeline.run().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn daily_pipeline_runs_end_to_end_without_embeddings() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = fixture_config(dir.path());
        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect_warehouse(&config).await.unwrap();
        crate::sample_data::load_staging(&pool).await.unwrap();
        pool.close().await;
        crate::sample_data::write_sample_documents(&dir.path().join("docs")).unwrap();

        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let report = daily_pipeline(&config, date).run().await.unwrap();
        assert!(report.succeeded());

        let pool = db::connect_warehouse(&config).await.unwrap();
        let rows = report::fetch_report(&pool).await.unwrap();
        assert_eq!(rows.len(), 2);
        pool.close().await;
    }

    #[tokio::test]
    async fn daily_quality_failure_blocks_report() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = fixture_config(dir.path());
        crate::migrate::run_migrations(&config).await.unwrap();
        let pool = db::connect_warehouse(&config).await.unwrap();
        crate::sample_data::load_staging(&pool).await.unwrap();
        sqlx::query("UPDATE cargo_raw SET weight_kg = 0 WHERE waybill_number = 'BA20240115001'")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        let date = NaiveDate::from_ymd_opt(2024, 1, 15).unwrap();
        let result = daily_pipeline(&config, date).run().await;
        match result {
            Err(PipelineError::Failed { failed, skipped, .. }) => {
                assert_eq!(failed, vec!["data_quality_cargo".to_string()]);
                assert!(skipped.contains(&"generate_daily_report".to_string()));
                assert!(skipped.contains(&"end_pipeline".to_string()));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
