// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! The flow promise: an awaitable that keeps its execution context.
//!
//! A [`FlowHandle`] carries the underlying pod and the execution context
//! alongside a shared result future, so chaining (`map`, `and_then`) and
//! introspection (`ctx`, `in_details`) never lose the execution they belong
//! to. Handles clone cheaply and every clone observes the same single run.

use std::future::{Future, IntoFuture};
use std::sync::Arc;

use futures::future::{join_all, select_all, BoxFuture, Shared};
use futures::FutureExt;

use crate::errors::FlowError;
use crate::scope::Pod;

use super::context::FlowContext;
use super::settled::{SettledBatch, SettledResult};

/// A finished execution: the result plus the context it ran in. The context
/// is absent only when execution failed before a context existed, or for
/// combinator-produced handles.
pub(crate) type FlowOutcome<T> = (Result<Arc<T>, FlowError>, Option<Arc<FlowContext>>);

pub(crate) type SharedOutcome<T> = Shared<BoxFuture<'static, FlowOutcome<T>>>;

/// Discriminated view of a finished execution; never rejects.
pub enum FlowDetails<T> {
    Success {
        result: Arc<T>,
        context: Option<Arc<FlowContext>>,
    },
    Failure {
        error: FlowError,
        context: Option<Arc<FlowContext>>,
    },
}

impl<T> FlowDetails<T> {
    pub fn success(&self) -> bool {
        matches!(self, FlowDetails::Success { .. })
    }

    pub fn context(&self) -> Option<&Arc<FlowContext>> {
        match self {
            FlowDetails::Success { context, .. } | FlowDetails::Failure { context, .. } => {
                context.as_ref()
            }
        }
    }
}

/// Handle to one flow execution.
pub struct FlowHandle<T> {
    shared: SharedOutcome<T>,
    pod: Option<Pod>,
}

impl<T> Clone for FlowHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            pod: self.pod.clone(),
        }
    }
}

impl<T> std::fmt::Debug for FlowHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlowHandle")
            .field("pod", &self.pod.is_some())
            .finish()
    }
}

impl<T: Send + Sync + 'static> FlowHandle<T> {
    /// Spawn the execution eagerly; the handle observes the running task.
    pub(crate) fn spawn(
        pod: Option<Pod>,
        fut: impl Future<Output = FlowOutcome<T>> + Send + 'static,
    ) -> Self {
        let task = tokio::spawn(fut);
        let shared = async move {
            match task.await {
                Ok(outcome) => outcome,
                Err(join_error) => (
                    Err(FlowError::Join {
                        message: join_error.to_string(),
                    }),
                    None,
                ),
            }
        }
        .boxed()
        .shared();
        Self { shared, pod }
    }

    /// Wrap an already-driven future without spawning.
    pub(crate) fn wrap(
        pod: Option<Pod>,
        fut: impl Future<Output = FlowOutcome<T>> + Send + 'static,
    ) -> Self {
        Self {
            shared: fut.boxed().shared(),
            pod,
        }
    }

    pub(crate) fn outcome(&self) -> SharedOutcome<T> {
        self.shared.clone()
    }

    pub(crate) fn pod(&self) -> Option<&Pod> {
        self.pod.as_ref()
    }

    /// Transform the success value, preserving the pod and context.
    pub fn map<U, F>(self, f: F) -> FlowHandle<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> U + Send + 'static,
    {
        let shared = self.shared;
        FlowHandle::wrap(self.pod, async move {
            let (result, context) = shared.await;
            (result.map(|value| Arc::new(f(value))), context)
        })
    }

    /// Transform the rejection, preserving the pod and context.
    pub fn map_err<F>(self, f: F) -> FlowHandle<T>
    where
        F: FnOnce(FlowError) -> FlowError + Send + 'static,
    {
        let shared = self.shared;
        FlowHandle::wrap(self.pod, async move {
            let (result, context) = shared.await;
            (result.map_err(f), context)
        })
    }

    /// Chain a dependent execution off the success value.
    pub fn and_then<U, F>(self, f: F) -> FlowHandle<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>) -> FlowHandle<U> + Send + 'static,
    {
        let shared = self.shared;
        FlowHandle::wrap(self.pod, async move {
            let (result, context) = shared.await;
            match result {
                Ok(value) => f(value).outcome().await,
                Err(error) => (Err(error), context),
            }
        })
    }

    /// Recover from a rejection with another execution.
    pub fn or_else<F>(self, f: F) -> FlowHandle<T>
    where
        F: FnOnce(FlowError) -> FlowHandle<T> + Send + 'static,
    {
        let shared = self.shared;
        FlowHandle::wrap(self.pod, async move {
            let (result, context) = shared.await;
            match result {
                Ok(value) => (Ok(value), context),
                Err(error) => f(error).outcome().await,
            }
        })
    }

    /// The execution context, available after completion regardless of
    /// outcome.
    pub async fn ctx(&self) -> Result<Arc<FlowContext>, FlowError> {
        let (_, context) = self.shared.clone().await;
        context.ok_or(FlowError::Join {
            message: "execution produced no context".to_string(),
        })
    }

    /// Always-resolving view of the outcome with its context.
    pub async fn in_details(&self) -> FlowDetails<T> {
        let (result, context) = self.shared.clone().await;
        match result {
            Ok(result) => FlowDetails::Success { result, context },
            Err(error) => FlowDetails::Failure { error, context },
        }
    }

    fn common_pod(handles: &[FlowHandle<T>]) -> Result<Pod, FlowError> {
        let first = handles
            .first()
            .and_then(|handle| handle.pod.clone())
            .ok_or(FlowError::PodMismatch)?;
        for handle in handles {
            match &handle.pod {
                Some(pod) if pod.same_pod(&first) => {}
                _ => return Err(FlowError::PodMismatch),
            }
        }
        Ok(first)
    }

    /// Await every handle; the first rejection (in input order) rejects the
    /// combined handle. All inputs must share a single root execution.
    pub fn all(handles: Vec<FlowHandle<T>>) -> FlowHandle<Vec<Arc<T>>> {
        if handles.is_empty() {
            return FlowHandle::wrap(None, async { (Ok(Arc::new(Vec::new())), None) });
        }
        let pod = match Self::common_pod(&handles) {
            Ok(pod) => pod,
            Err(error) => return FlowHandle::wrap(None, async move { (Err(error), None) }),
        };
        let futures: Vec<SharedOutcome<T>> =
            handles.iter().map(|handle| handle.outcome()).collect();
        FlowHandle::wrap(Some(pod), async move {
            let mut values = Vec::with_capacity(futures.len());
            for (result, _) in join_all(futures).await {
                match result {
                    Ok(value) => values.push(value),
                    Err(error) => return (Err(error), None),
                }
            }
            (Ok(Arc::new(values)), None)
        })
    }

    /// The first handle to finish decides the outcome.
    pub fn race(handles: Vec<FlowHandle<T>>) -> FlowHandle<T> {
        if handles.is_empty() {
            return FlowHandle::wrap(None, async {
                (
                    Err(FlowError::Join {
                        message: "race over no executions".to_string(),
                    }),
                    None,
                )
            });
        }
        let pod = match Self::common_pod(&handles) {
            Ok(pod) => pod,
            Err(error) => return FlowHandle::wrap(None, async move { (Err(error), None) }),
        };
        let futures: Vec<SharedOutcome<T>> =
            handles.iter().map(|handle| handle.outcome()).collect();
        FlowHandle::wrap(Some(pod), async move {
            let (outcome, _, _) = select_all(futures).await;
            outcome
        })
    }

    /// Await every handle; individual outcomes settle into a
    /// [`SettledBatch`] and the combined handle never rejects from
    /// composition.
    pub fn all_settled(handles: Vec<FlowHandle<T>>) -> FlowHandle<SettledBatch<T>> {
        if handles.is_empty() {
            return FlowHandle::wrap(None, async {
                (Ok(Arc::new(SettledBatch::new(Vec::new()))), None)
            });
        }
        let pod = match Self::common_pod(&handles) {
            Ok(pod) => pod,
            Err(error) => return FlowHandle::wrap(None, async move { (Err(error), None) }),
        };
        let futures: Vec<SharedOutcome<T>> =
            handles.iter().map(|handle| handle.outcome()).collect();
        FlowHandle::wrap(Some(pod), async move {
            let results = join_all(futures)
                .await
                .into_iter()
                .map(|(result, _)| match result {
                    Ok(value) => SettledResult::Fulfilled(value),
                    Err(error) => SettledResult::Rejected(error),
                })
                .collect();
            (Ok(Arc::new(SettledBatch::new(results))), None)
        })
    }
}

impl<T: Send + Sync + 'static> IntoFuture for FlowHandle<T> {
    type Output = Result<Arc<T>, FlowError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        async move {
            let (result, _) = self.shared.await;
            result
        }
        .boxed()
    }
}
