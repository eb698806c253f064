//! One generator run: prompt the model, build an item, merge it into the feed.
//!
//! Every step must succeed before the feed file is touched. The merged
//! document is read back with `feed-rs` and must contain the new item's GUID;
//! only then is it written (atomically) to disk.
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::content::{render_prompt, CompletionClient, ContentError};
use crate::feed::{
    parse_feed, starts_fresh, FeedMerger, FeedStore, MergeError, MergeMode, StoreError,
};
use crate::newsletter::{
    parse_content, HtmlPolicy, HtmlPolicyError, Item, ItemOptions, MalformedContentError,
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Content(#[from] ContentError),

    #[error(transparent)]
    Malformed(#[from] MalformedContentError),

    #[error(transparent)]
    Html(#[from] HtmlPolicyError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    /// The merged document did not read back as a feed containing the new item.
    #[error("Merged feed failed verification: {0}")]
    Verification(String),
}

/// Whether the run started a new feed or extended an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunKind {
    Created,
    Appended,
}

/// Outcome of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub kind: RunKind,
    /// Items in the resulting feed.
    pub item_count: usize,
    pub guid: String,
    pub title: String,
    /// The full merged document, as written (or as it would have been on a dry run).
    pub document: String,
    /// False on a dry run.
    pub written: bool,
}

pub struct Pipeline {
    client: CompletionClient,
    template: String,
    policy: HtmlPolicy,
    item_options: ItemOptions,
    merger: FeedMerger,
    mode: MergeMode,
    store: FeedStore,
    dry_run: bool,
}

impl Pipeline {
    /// A pipeline with the default HTML policy, append mode and channel metadata.
    pub fn new(client: CompletionClient, template: impl Into<String>, store: FeedStore) -> Self {
        Self {
            client,
            template: template.into(),
            policy: HtmlPolicy::default(),
            item_options: ItemOptions::default(),
            merger: FeedMerger::default(),
            mode: MergeMode::Append,
            store,
            dry_run: false,
        }
    }

    pub fn with_policy(mut self, policy: HtmlPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_item_options(mut self, options: ItemOptions) -> Self {
        self.item_options = options;
        self
    }

    pub fn with_merger(mut self, merger: FeedMerger) -> Self {
        self.merger = merger;
        self
    }

    pub fn with_mode(mut self, mode: MergeMode) -> Self {
        self.mode = mode;
        self
    }

    /// Skip the final write; the merged document is still returned in the report.
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn store(&self) -> &FeedStore {
        &self.store
    }

    /// Runs once, stamping the item with `now`.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<RunReport, PipelineError> {
        let prompt = render_prompt(&self.template, now.date_naive(), &self.policy);

        let raw = self.client.complete(&prompt).await?;

        let content = match parse_content(&raw) {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(reason = %e.reason, raw = %e.raw, "Model output is not a newsletter object");
                return Err(e.into());
            }
        };

        let item = Item::from_content(content, &self.policy, self.item_options, now)?;
        tracing::debug!(guid = %item.guid, title = %item.title, "Built newsletter item");

        let existing = self.store.read().await?;
        let kind = if starts_fresh(existing.as_deref(), self.mode) {
            RunKind::Created
        } else {
            RunKind::Appended
        };

        let document = self.merger.merge(existing.as_deref(), &item, self.mode)?;

        let parsed = parse_feed(document.as_bytes())
            .map_err(|e| PipelineError::Verification(e.to_string()))?;
        if !parsed.contains_guid(&item.guid) {
            return Err(PipelineError::Verification(format!(
                "new item {} missing from merged feed",
                item.guid
            )));
        }

        if self.dry_run {
            tracing::info!(items = parsed.items.len(), "Dry run, feed not written");
        } else {
            self.store.write(&document)?;
            tracing::info!(
                path = %self.store.path().display(),
                items = parsed.items.len(),
                kind = ?kind,
                "Feed updated"
            );
        }

        Ok(RunReport {
            kind,
            item_count: parsed.items.len(),
            guid: item.guid,
            title: item.title,
            document,
            written: !self.dry_run,
        })
    }
}
