//! Oplog tailer: one-shot queries and resumable follow mode.

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace};

use crate::cancel::cancellable;
use crate::defaults;
use crate::error::{Error, Result};
use crate::event::ChangeEvent;
use crate::filter::FilterBuilder;
use crate::temporal::to_bson_timestamp;
use crate::traits::{ChangeSource, ResumeTokenStore, WatchRequest, WatchScope};

/// Settings for [`OplogTailer::run`].
#[derive(Clone)]
pub struct TailOptions {
    pub criteria: FilterBuilder,
    /// Maximum entries for one-shot queries; `None` or zero means unlimited.
    pub limit: Option<i64>,
    pub follow: bool,
    /// Look up the current document for update events (follow mode).
    pub full_document: bool,
    /// Where follow mode loads and persists its resume token.
    pub resume: Option<Arc<dyn ResumeTokenStore>>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            criteria: FilterBuilder::default(),
            limit: Some(defaults::TAIL_LIMIT),
            follow: false,
            full_document: false,
            resume: None,
        }
    }
}

impl TailOptions {
    pub fn new(criteria: FilterBuilder) -> Self {
        Self {
            criteria,
            ..Self::default()
        }
    }

    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = (limit > 0).then_some(limit);
        self
    }

    pub fn follow(mut self, follow: bool) -> Self {
        self.follow = follow;
        self
    }

    pub fn full_document(mut self, full_document: bool) -> Self {
        self.full_document = full_document;
        self
    }

    pub fn resume(mut self, store: Arc<dyn ResumeTokenStore>) -> Self {
        self.resume = Some(store);
        self
    }
}

/// Split `db.collection` into a watch scope.
pub fn parse_namespace(namespace: &str) -> Result<WatchScope> {
    match namespace.split_once('.') {
        Some((db, coll)) if !db.is_empty() && !coll.is_empty() => Ok(WatchScope::Collection {
            database: db.to_string(),
            collection: coll.to_string(),
        }),
        _ => Err(Error::InvalidNamespace(namespace.to_string())),
    }
}

/// Reads replicated writes from a [`ChangeSource`] and hands them to a
/// caller-supplied render callback.
pub struct OplogTailer<C: ChangeSource> {
    source: C,
}

impl<C: ChangeSource> OplogTailer<C> {
    pub fn new(source: C) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    /// Run in the mode selected by `options`. Returns the number of events
    /// delivered to `render`.
    pub async fn run<F>(
        &self,
        options: &TailOptions,
        cancel: &CancellationToken,
        render: F,
    ) -> Result<usize>
    where
        F: FnMut(&[ChangeEvent]) -> anyhow::Result<()> + Send,
    {
        if options.follow {
            self.follow(
                &options.criteria,
                options.full_document,
                options.resume.as_deref(),
                cancel,
                render,
            )
            .await
        } else {
            cancellable(cancel, self.query(&options.criteria, options.limit, render)).await
        }
    }

    /// Query the legacy oplog newest first and render the batch once, also
    /// when it is empty.
    #[instrument(
        skip(self, criteria, render),
        fields(subsystem = "oplog", component = "tailer", op = "query")
    )]
    pub async fn query<F>(
        &self,
        criteria: &FilterBuilder,
        limit: Option<i64>,
        mut render: F,
    ) -> Result<usize>
    where
        F: FnMut(&[ChangeEvent]) -> anyhow::Result<()> + Send,
    {
        criteria.validate(false)?;
        let start = Instant::now();

        let filter = criteria.oplog_filter();
        debug!(filter = %filter, "Querying oplog");
        let raw = self
            .source
            .query_log(filter, limit.filter(|l| *l > 0))
            .await?;

        let events = raw
            .iter()
            .map(ChangeEvent::from_oplog)
            .collect::<Result<Vec<_>>>()?;

        render(&events).map_err(|e| Error::Render(e.into()))?;
        info!(
            event_count = events.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Oplog query rendered"
        );
        Ok(events.len())
    }

    /// Follow the change stream until it closes or `cancel` fires.
    ///
    /// Each event's resume token is saved before the event is rendered. A
    /// fired token ends the loop cleanly and returns the number of events
    /// delivered so far. Stream, decode, persistence and render failures end
    /// the loop with an error; events rendered before the failure stand.
    #[instrument(
        skip(self, criteria, resume, cancel, render),
        fields(subsystem = "oplog", component = "tailer", op = "follow")
    )]
    pub async fn follow<F>(
        &self,
        criteria: &FilterBuilder,
        full_document: bool,
        resume: Option<&dyn ResumeTokenStore>,
        cancel: &CancellationToken,
        mut render: F,
    ) -> Result<usize>
    where
        F: FnMut(&[ChangeEvent]) -> anyhow::Result<()> + Send,
    {
        criteria.validate(true)?;

        let scope = match criteria.exact_namespace() {
            Some(ns) => parse_namespace(ns)?,
            None => WatchScope::Deployment,
        };
        let resume_after = match resume {
            Some(store) => store.load().await?,
            None => None,
        };
        let start_at = match resume_after {
            Some(_) => None,
            None => criteria.from_time().map(to_bson_timestamp),
        };

        info!(
            scope = ?scope,
            resuming = resume_after.is_some(),
            full_document,
            "Opening change stream"
        );
        let request = WatchRequest {
            scope,
            pipeline: criteria.change_stream_pipeline(),
            full_document,
            resume_after,
            start_at,
        };

        let mut feed = match cancellable(cancel, self.source.watch(request)).await {
            Ok(feed) => feed,
            Err(Error::Cancelled) => return Ok(0),
            Err(e) => return Err(e),
        };

        let mut delivered = 0usize;
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(event_count = delivered, "Follow cancelled");
                    break;
                }
                next = feed.next_change() => next?,
            };
            let Some(raw) = next else {
                info!(event_count = delivered, "Change stream closed");
                break;
            };

            let event = ChangeEvent::from_change_stream(&raw)?;
            if let Some(store) = resume {
                if let Some(token) = feed.resume_token() {
                    store.save(&token).await?;
                }
            }

            render(std::slice::from_ref(&event)).map_err(|e| Error::Render(e.into()))?;
            delivered += 1;
            trace!(
                operation = %event.operation,
                namespace = %event.namespace,
                "Event rendered"
            );
        }
        Ok(delivered)
    }
}
