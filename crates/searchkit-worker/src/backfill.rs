use crate::collaborators::{EntityPager, LexicalDocumentBuilder, Page};
use searchkit_core::{BackfillOptions, BackfillStatus, SearchkitResult};
use searchkit_store::SearchStore;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Reason recorded on tasks enqueued by backfill.
pub const BACKFILL_REASON: &str = "model_backfill";

/// Counters for one backfill run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackfillReport {
    /// Pages fetched from the pager.
    pub pages: usize,
    /// Tasks enqueued (vector backfill).
    pub enqueued: usize,
    /// Documents written (document backfill).
    pub documents: usize,
    /// Partitions that reached `done` during this run.
    pub completed_partitions: usize,
    /// Partitions whose pager failed during this run.
    pub failed_partitions: usize,
    /// True when a budget stopped the run early.
    pub budget_exhausted: bool,
}

impl BackfillReport {
    /// Add `other` to this report.
    pub fn merge(&mut self, other: &BackfillReport) {
        self.pages += other.pages;
        self.enqueued += other.enqueued;
        self.documents += other.documents;
        self.completed_partitions += other.completed_partitions;
        self.failed_partitions += other.failed_partitions;
        self.budget_exhausted |= other.budget_exhausted;
    }
}

/// Wall-clock, page and task limits shared by one or more backfill passes.
#[derive(Debug, Clone)]
pub struct BackfillBudget {
    started: Instant,
    options: BackfillOptions,
    pages: usize,
    tasks: usize,
}

impl BackfillBudget {
    /// A fresh budget starting now.
    pub fn new(options: &BackfillOptions) -> Self {
        Self {
            started: Instant::now(),
            options: options.normalized(),
            pages: 0,
            tasks: 0,
        }
    }

    /// True once any limit is reached.
    pub fn exhausted(&self) -> bool {
        self.started.elapsed() >= self.options.max_runtime()
            || self.pages >= self.options.max_pages
            || self.tasks >= self.options.max_tasks_per_run
    }

    fn record_page(&mut self, tasks: usize) {
        self.pages += 1;
        self.tasks += tasks;
    }
}

/// One partition of vector (`model = Some`) or document (`model = None`) backfill.
#[derive(Clone, Copy)]
struct Partition<'a> {
    model: Option<&'a str>,
    entity_type: &'a str,
    language: &'a str,
}

impl std::fmt::Display for Partition<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.model {
            Some(model) => write!(f, "{model}/{}/{}", self.entity_type, self.language),
            None => write!(f, "documents/{}/{}", self.entity_type, self.language),
        }
    }
}

/// Pages host entities into the task queue (new models) and the document
/// table (lexical search), one page per partition per run.
pub struct BackfillEngine {
    store: Arc<dyn SearchStore>,
    pager: Arc<dyn EntityPager>,
    lexical_builder: Option<Arc<dyn LexicalDocumentBuilder>>,
    options: BackfillOptions,
}

fn clean(values: &[String]) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty() && seen.insert(*v))
        .collect()
}

impl BackfillEngine {
    /// Create an engine; options are normalised.
    pub fn new(
        store: Arc<dyn SearchStore>,
        pager: Arc<dyn EntityPager>,
        options: BackfillOptions,
    ) -> Self {
        Self {
            store,
            pager,
            lexical_builder: None,
            options: options.normalized(),
        }
    }

    /// Builder used by document backfill.
    pub fn with_lexical_builder(mut self, builder: Arc<dyn LexicalDocumentBuilder>) -> Self {
        self.lexical_builder = Some(builder);
        self
    }

    /// A budget sized by this engine's options.
    pub fn budget(&self) -> BackfillBudget {
        BackfillBudget::new(&self.options)
    }

    /// Vector backfill with a fresh budget.
    pub async fn run_once(
        &self,
        models: &[String],
        entity_types: &[String],
        languages: &[String],
    ) -> SearchkitResult<BackfillReport> {
        let mut budget = self.budget();
        self.run_vectors(&mut budget, models, entity_types, languages)
            .await
    }

    /// Document backfill with a fresh budget.
    pub async fn run_documents_once(
        &self,
        entity_types: &[String],
        languages: &[String],
    ) -> SearchkitResult<BackfillReport> {
        let mut budget = self.budget();
        self.run_documents(&mut budget, entity_types, languages)
            .await
    }

    /// Enqueue tasks for entities lacking a vector, spending `budget`.
    pub async fn run_vectors(
        &self,
        budget: &mut BackfillBudget,
        models: &[String],
        entity_types: &[String],
        languages: &[String],
    ) -> SearchkitResult<BackfillReport> {
        let mut report = BackfillReport::default();
        'outer: for model in clean(models) {
            for entity_type in clean(entity_types) {
                for language in clean(languages) {
                    let partition = Partition {
                        model: Some(model),
                        entity_type,
                        language,
                    };
                    if !self.step(&partition, budget, &mut report).await? {
                        break 'outer;
                    }
                }
            }
        }
        log_report("vectors", &report);
        Ok(report)
    }

    /// Write lexical documents for every paged entity, spending `budget`.
    pub async fn run_documents(
        &self,
        budget: &mut BackfillBudget,
        entity_types: &[String],
        languages: &[String],
    ) -> SearchkitResult<BackfillReport> {
        let mut report = BackfillReport::default();
        if self.lexical_builder.is_none() {
            debug!("No lexical document builder; skipping document backfill");
            return Ok(report);
        }
        'outer: for entity_type in clean(entity_types) {
            for language in clean(languages) {
                let partition = Partition {
                    model: None,
                    entity_type,
                    language,
                };
                if !self.step(&partition, budget, &mut report).await? {
                    break 'outer;
                }
            }
        }
        log_report("documents", &report);
        Ok(report)
    }

    /// Advance one partition by at most one page. Returns `false` when the
    /// budget is spent and the run should stop.
    async fn step(
        &self,
        partition: &Partition<'_>,
        budget: &mut BackfillBudget,
        report: &mut BackfillReport,
    ) -> SearchkitResult<bool> {
        let Partition {
            model,
            entity_type,
            language,
        } = *partition;

        let state = self
            .store
            .ensure_backfill_state(model, entity_type, language)
            .await?;
        if state.state != BackfillStatus::Running {
            return Ok(true);
        }
        if budget.exhausted() {
            report.budget_exhausted = true;
            return Ok(false);
        }

        let page = match self
            .pager
            .page(entity_type, language, &state.cursor, self.options.page_size)
            .await
        {
            Ok(page) => page,
            Err(e) => {
                warn!(partition = %partition, error = %e, "Backfill pager failed");
                self.store
                    .fail_backfill(model, entity_type, language, &e.to_string())
                    .await?;
                report.failed_partitions += 1;
                return Ok(true);
            }
        };

        let written = match model {
            Some(model) => self.enqueue_missing(model, entity_type, language, &page).await?,
            None => self.write_documents(entity_type, language, &page).await?,
        };
        budget.record_page(if model.is_some() { written } else { 0 });
        report.pages += 1;
        if model.is_some() {
            report.enqueued += written;
        } else {
            report.documents += written;
        }

        self.store
            .advance_backfill(model, entity_type, language, &page.next_cursor, page.done)
            .await?;
        if page.done {
            report.completed_partitions += 1;
            info!(partition = %partition, "Backfill partition done");
        }
        debug!(
            partition = %partition,
            ids = page.ids.len(),
            written,
            cursor = %page.next_cursor,
            "Backfill page processed"
        );
        Ok(true)
    }

    async fn enqueue_missing(
        &self,
        model: &str,
        entity_type: &str,
        language: &str,
        page: &Page,
    ) -> SearchkitResult<usize> {
        let ids: Vec<String> = clean(&page.ids).into_iter().map(str::to_string).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let existing = self
            .store
            .existing_vector_ids(model, entity_type, language, &ids)
            .await?;
        let missing: Vec<String> = ids.into_iter().filter(|id| !existing.contains(id)).collect();
        if missing.is_empty() {
            return Ok(0);
        }
        self.store
            .enqueue_many(entity_type, &missing, model, language, BACKFILL_REASON)
            .await
    }

    async fn write_documents(
        &self,
        entity_type: &str,
        language: &str,
        page: &Page,
    ) -> SearchkitResult<usize> {
        let Some(builder) = &self.lexical_builder else {
            return Ok(0);
        };
        let ids: Vec<String> = clean(&page.ids).into_iter().map(str::to_string).collect();
        if ids.is_empty() {
            return Ok(0);
        }
        let documents = builder.build(entity_type, language, &ids).await?;
        let write = self
            .store
            .upsert_documents(entity_type, language, &documents)
            .await?;
        Ok(write.upserted)
    }
}

fn log_report(kind: &str, report: &BackfillReport) {
    if report.pages == 0 && report.failed_partitions == 0 {
        return;
    }
    info!(
        kind,
        pages = report.pages,
        enqueued = report.enqueued,
        documents = report.documents,
        completed = report.completed_partitions,
        failed = report.failed_partitions,
        budget_exhausted = report.budget_exhausted,
        "Backfill run finished"
    );
}

impl std::fmt::Debug for BackfillEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackfillEngine")
            .field("options", &self.options)
            .field("lexical_builder", &self.lexical_builder.is_some())
            .finish_non_exhaustive()
    }
}
