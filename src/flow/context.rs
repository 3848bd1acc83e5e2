// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Per-execution context and the handler-facing `ctx` API.
//!
//! Each execution owns a fresh pod, a local store, and a journal. Store
//! reads fall back through the parent context chain; writes are always
//! local, so sibling sub-flows never observe each other's values and a
//! parent never observes a child's.

use std::future::Future;
use std::sync::Arc;

use futures::future::{join_all, BoxFuture};
use futures::FutureExt;

use crate::errors::{FlowError, TagError};
use crate::executor::Preset;
use crate::extension::{compose, OperationDescriptor, ParallelMode, WrapResult};
use crate::observability::messages::flow::{JournalReplayed, ParallelStarted};
use crate::observability::messages::StructuredLog;
use crate::scope::{lock, Pod, PodOptions};
use crate::tag::{AnyValue, Store, Tag, TagSource, Tagged};

use super::handle::{FlowHandle, FlowOutcome};
use super::journal::{Journal, JournalEntry};
use super::meta;
use super::settled::{FlowStats, ParallelOutcome, SettledBatch, SettledResult};
use super::{run_flow, to_flow_error, Flow};

/// Immutable description of one execution, shared by its handle, its `ctx`,
/// and its children.
pub struct FlowContext {
    pod: Pod,
    parent: Option<Arc<FlowContext>>,
    local: Arc<Store>,
    journal: Arc<Journal>,
    depth: usize,
    flow_name: String,
    parent_flow_name: Option<String>,
    is_parallel: bool,
}

impl FlowContext {
    pub(crate) fn root(pod: Pod, flow_name: String) -> Arc<Self> {
        let context = Arc::new(Self {
            pod,
            parent: None,
            local: Arc::new(Store::new()),
            journal: Arc::new(Journal::new()),
            depth: 0,
            flow_name,
            parent_flow_name: None,
            is_parallel: false,
        });
        context.seed();
        context
    }

    pub(crate) fn child(
        parent: &Arc<FlowContext>,
        pod: Pod,
        flow_name: String,
        is_parallel: bool,
    ) -> Arc<Self> {
        let context = Arc::new(Self {
            pod,
            parent: Some(parent.clone()),
            local: Arc::new(Store::new()),
            journal: Arc::new(Journal::new()),
            depth: parent.depth + 1,
            flow_name,
            parent_flow_name: Some(parent.flow_name.clone()),
            is_parallel,
        });
        context.seed();
        context
    }

    /// Expose the built-in metadata through the ordinary tag API.
    fn seed(&self) {
        self.local
            .insert(meta::flow_name().key(), Arc::new(self.flow_name.clone()));
        if let Some(parent_name) = &self.parent_flow_name {
            self.local
                .insert(meta::parent_flow_name().key(), Arc::new(parent_name.clone()));
        }
        self.local.insert(meta::depth().key(), Arc::new(self.depth));
        self.local
            .insert(meta::is_parallel().key(), Arc::new(self.is_parallel));
        self.local
            .insert(meta::journal().key(), self.journal.clone() as AnyValue);
    }

    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn flow_name(&self) -> &str {
        &self.flow_name
    }

    pub fn parent_flow_name(&self) -> Option<&str> {
        self.parent_flow_name.as_deref()
    }

    pub fn is_parallel(&self) -> bool {
        self.is_parallel
    }

    pub fn journal(&self) -> &Arc<Journal> {
        &self.journal
    }

    pub fn store(&self) -> &Store {
        &self.local
    }

    pub(crate) fn store_arc(&self) -> Arc<Store> {
        self.local.clone()
    }

    /// Find through the local store, then the parent chain.
    pub fn find<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
        tag.find(self)
    }

    pub fn get<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Result<Arc<T>, TagError> {
        tag.get(self)
    }
}

impl TagSource for FlowContext {
    fn tag_entries(&self) -> Vec<Tagged> {
        let mut entries = match &self.parent {
            Some(parent) => parent.tag_entries(),
            None => Vec::new(),
        };
        entries.extend(self.local.entries());
        entries
    }
}

impl std::fmt::Debug for FlowContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowContext")
            .field("flow", &self.flow_name)
            .field("depth", &self.depth)
            .field("is_parallel", &self.is_parallel)
            .finish()
    }
}

/// Options for [`Ctx::exec_with`].
#[derive(Default)]
pub struct ExecOptions {
    /// Mark the child context as part of a parallel composition.
    pub parallel: bool,
    /// Extra metas for the child pod.
    pub meta: Vec<Tagged>,
    /// Pre-resolved values seeded into the child pod.
    pub presets: Vec<Preset>,
}

/// The handler-facing context API.
#[derive(Clone)]
pub struct Ctx {
    pub(crate) inner: Arc<FlowContext>,
}

impl Ctx {
    pub(crate) fn new(inner: Arc<FlowContext>) -> Self {
        Self { inner }
    }

    pub fn context(&self) -> Arc<FlowContext> {
        self.inner.clone()
    }

    pub fn pod(&self) -> &Pod {
        self.inner.pod()
    }

    pub fn depth(&self) -> usize {
        self.inner.depth()
    }

    pub fn flow_name(&self) -> &str {
        self.inner.flow_name()
    }

    pub fn journal(&self) -> Arc<Journal> {
        self.inner.journal.clone()
    }

    /// Read a tag from this execution's store, falling back through parent
    /// contexts.
    pub fn find<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Option<Arc<T>> {
        self.inner.find(tag)
    }

    pub fn get<T: Send + Sync + 'static>(&self, tag: &Tag<T>) -> Result<Arc<T>, TagError> {
        self.inner.get(tag)
    }

    /// Write a tag into this execution's local store. Parents and siblings
    /// never observe the write.
    pub fn set<T: Send + Sync + 'static>(&self, tag: &Tag<T>, value: T) -> Result<(), TagError> {
        tag.set(&self.inner.local, value)
    }

    fn reversed_extensions(&self) -> Vec<Arc<dyn crate::extension::Extension>> {
        let state = lock(&self.inner.pod.as_scope().core.state);
        state.reversed_extensions.clone()
    }

    /// Run a journaled operation: at most once per key within this
    /// execution. Replays return the stored value or rethrow the stored
    /// error without invoking `operation` again.
    pub async fn run<T, F, Fut>(&self, key: &str, operation: F) -> Result<Arc<T>, FlowError>
    where
        T: Send + Sync + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let journal_key = format!("{}:{}:{}", self.inner.flow_name, self.inner.depth, key);
        if let Some(entry) = self.inner.journal.lookup(&journal_key) {
            JournalReplayed {
                key: &journal_key,
                stored_error: entry.is_error(),
            }
            .log();
            return match entry {
                JournalEntry::Value(value) => self.downcast_journal(&journal_key, value),
                JournalEntry::Error(error) => Err(error),
            };
        }

        let task_key = journal_key.clone();
        let core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send> =
            Box::new(move || {
                async move {
                    operation()
                        .await
                        .map(|value| Arc::new(value) as AnyValue)
                        .map_err(|cause| anyhow::Error::new(FlowError::task(task_key, cause)))
                }
                .boxed()
            });
        let result = compose(
            self.reversed_extensions(),
            self.inner.local.clone(),
            OperationDescriptor::Journal {
                key: journal_key.clone(),
            },
            core,
        )
        .await;
        match result {
            Ok(value) => {
                self.inner.journal.record_value(&journal_key, value.clone());
                self.downcast_journal(&journal_key, value)
            }
            Err(error) => {
                let error = to_flow_error(error);
                self.inner.journal.record_error(&journal_key, error.clone());
                Err(error)
            }
        }
    }

    fn downcast_journal<T: Send + Sync + 'static>(
        &self,
        key: &str,
        value: AnyValue,
    ) -> Result<Arc<T>, FlowError> {
        value.downcast::<T>().map_err(|_| {
            FlowError::task(
                key,
                anyhow::anyhow!("journal entry has an unexpected type"),
            )
        })
    }

    /// Execute a sub-flow in a fresh child pod with a child context.
    pub fn exec<I, O>(&self, flow: &Flow<I, O>, input: I) -> FlowHandle<O>
    where
        I: Send + 'static,
        O: Send + Sync + 'static,
    {
        self.exec_with(flow, input, ExecOptions::default())
    }

    /// Execute a sub-flow with pod presets, extra metas, or a parallel mark.
    pub fn exec_with<I, O>(
        &self,
        flow: &Flow<I, O>,
        input: I,
        options: ExecOptions,
    ) -> FlowHandle<O>
    where
        I: Send + 'static,
        O: Send + Sync + 'static,
    {
        let parent = self.inner.clone();
        let parent_pod = self.inner.pod.clone();
        let flow = flow.clone();
        let flow_name = flow.name();
        let parent_name = self.inner.flow_name.clone();

        let fut = async move {
            let mut pod_options = PodOptions::new();
            for entry in options.meta {
                pod_options = pod_options.meta(entry);
            }
            for preset in options.presets {
                pod_options = pod_options.preset(preset);
            }
            let pod = match parent_pod.pod_with(pod_options).await {
                Ok(pod) => pod,
                Err(error) => return (Err(FlowError::Resolve(error)), None),
            };
            let context = FlowContext::child(&parent, pod, flow_name.clone(), options.parallel);
            let descriptors = vec![
                OperationDescriptor::Subflow {
                    flow_name: flow_name.clone(),
                    parent_flow_name: Some(parent_name.clone()),
                },
                OperationDescriptor::FlowExec {
                    flow_name,
                    parent_flow_name: Some(parent_name),
                },
            ];
            let result = run_flow(flow, context.clone(), input, descriptors).await;
            (result, Some(context))
        };
        FlowHandle::spawn(Some(self.inner.pod.clone()), fut)
    }

    /// Await sibling executions together; the first rejection rejects the
    /// whole composition.
    pub fn parallel<T: Send + Sync + 'static>(
        &self,
        handles: Vec<FlowHandle<T>>,
    ) -> FlowHandle<ParallelOutcome<T>> {
        let count = handles.len();
        ParallelStarted {
            mode: ParallelMode::Parallel.as_str(),
            count,
        }
        .log();
        let my_pod = self.inner.pod.clone();
        let reversed = self.reversed_extensions();
        let store = self.inner.local.clone();

        let fut = async move {
            for handle in &handles {
                match handle.pod() {
                    Some(pod) if pod.same_pod(&my_pod) => {}
                    _ => return (Err(FlowError::PodMismatch), None),
                }
            }
            let core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send> =
                Box::new(move || {
                    async move {
                        let outcomes =
                            join_all(handles.iter().map(|handle| handle.outcome())).await;
                        let mut results = Vec::with_capacity(count);
                        for (result, _) in outcomes {
                            match result {
                                Ok(value) => results.push(value),
                                Err(error) => return Err(anyhow::Error::new(error)),
                            }
                        }
                        let stats = FlowStats {
                            total: count,
                            succeeded: results.len(),
                            failed: 0,
                        };
                        Ok(Arc::new(ParallelOutcome { results, stats }) as AnyValue)
                    }
                    .boxed()
                });
            let result = compose(
                reversed,
                store,
                OperationDescriptor::Parallel {
                    mode: ParallelMode::Parallel,
                    count,
                },
                core,
            )
            .await;
            match result {
                Ok(value) => match value.downcast::<ParallelOutcome<T>>() {
                    Ok(outcome) => (Ok(outcome), None),
                    Err(_) => (
                        Err(FlowError::Join {
                            message: "parallel composition produced an unexpected type".into(),
                        }),
                        None,
                    ),
                },
                Err(error) => (Err(to_flow_error(error)), None),
            }
        };
        FlowHandle::spawn(Some(self.inner.pod.clone()), fut)
    }

    /// Await sibling executions together; outcomes settle individually and
    /// the composition itself never rejects.
    pub fn parallel_settled<T: Send + Sync + 'static>(
        &self,
        handles: Vec<FlowHandle<T>>,
    ) -> FlowHandle<SettledBatch<T>> {
        let count = handles.len();
        ParallelStarted {
            mode: ParallelMode::ParallelSettled.as_str(),
            count,
        }
        .log();
        let my_pod = self.inner.pod.clone();
        let reversed = self.reversed_extensions();
        let store = self.inner.local.clone();

        let fut = async move {
            for handle in &handles {
                match handle.pod() {
                    Some(pod) if pod.same_pod(&my_pod) => {}
                    _ => return (Err(FlowError::PodMismatch), None),
                }
            }
            let core: Box<dyn FnOnce() -> BoxFuture<'static, WrapResult> + Send> =
                Box::new(move || {
                    async move {
                        let results: Vec<SettledResult<T>> =
                            join_all(handles.iter().map(|handle| handle.outcome()))
                                .await
                                .into_iter()
                                .map(|(result, _)| match result {
                                    Ok(value) => SettledResult::Fulfilled(value),
                                    Err(error) => SettledResult::Rejected(error),
                                })
                                .collect();
                        Ok(Arc::new(SettledBatch::new(results)) as AnyValue)
                    }
                    .boxed()
                });
            let result = compose(
                reversed,
                store,
                OperationDescriptor::Parallel {
                    mode: ParallelMode::ParallelSettled,
                    count,
                },
                core,
            )
            .await;
            match result {
                Ok(value) => match value.downcast::<SettledBatch<T>>() {
                    Ok(batch) => (Ok(batch), None),
                    Err(_) => (
                        Err(FlowError::Join {
                            message: "settled composition produced an unexpected type".into(),
                        }),
                        None,
                    ),
                },
                Err(error) => (Err(to_flow_error(error)), None),
            }
        };
        FlowHandle::spawn(Some(self.inner.pod.clone()), fut)
    }
}
