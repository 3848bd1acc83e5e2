// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Pods: child scopes with hierarchical, copy-on-read caches.
//!
//! A pod resolves against its own cache first, then walks a parent chain
//! precomputed at construction: nearest enclosing pod outward, ending at the
//! owning scope. The first ancestor holding a resolved entry contributes a
//! copy of the value; cleanups stay with the owner. Pods never propagate
//! writes upward, so an update inside a pod is invisible to the parent and
//! parent updates do not reach values a pod already copied.

use std::ops::Deref;
use std::sync::Arc;

use crate::errors::ResolveError;
use crate::executor::Preset;
use crate::extension::Extension;
use crate::observability::messages::scope::PodCreated;
use crate::observability::messages::StructuredLog;
use crate::tag::{TagSource, Tagged};

use super::{lock, Scope, ScopeCore, ScopeState};

/// Construction options for a pod.
#[derive(Default)]
pub struct PodOptions {
    pub(crate) presets: Vec<Preset>,
    pub(crate) metas: Vec<Tagged>,
    pub(crate) extensions: Vec<Arc<dyn Extension>>,
}

impl PodOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the pod's cache with an already-resolved value.
    pub fn preset(mut self, preset: Preset) -> Self {
        self.presets.push(preset);
        self
    }

    /// Add a pod-level meta entry on top of the inherited ones.
    pub fn meta(mut self, entry: Tagged) -> Self {
        self.metas.push(entry);
        self
    }

    /// Add a pod-local extension after the inherited ones.
    pub fn extension(mut self, extension: Arc<dyn Extension>) -> Self {
        self.extensions.push(extension);
        self
    }
}

/// A child scope. Dereferences to [`Scope`], so all scope operations apply;
/// resolution adds the hierarchical parent lookup.
#[derive(Clone)]
pub struct Pod {
    scope: Scope,
}

impl Pod {
    pub(crate) fn from_core(core: Arc<ScopeCore>) -> Self {
        Self {
            scope: Scope { core },
        }
    }

    /// The plain scope handle for this pod.
    pub fn as_scope(&self) -> &Scope {
        &self.scope
    }

    /// How many ancestors this pod resolves through.
    pub fn depth(&self) -> usize {
        self.scope.core.parent_chain.len()
    }

    /// Identity: both handles point at the same pod state.
    pub fn same_pod(&self, other: &Pod) -> bool {
        Arc::ptr_eq(&self.scope.core, &other.scope.core)
    }
}

impl Deref for Pod {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl std::fmt::Debug for Pod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pod").field("depth", &self.depth()).finish()
    }
}

impl TagSource for Pod {
    fn tag_entries(&self) -> Vec<Tagged> {
        self.scope.metas()
    }
}

impl Scope {
    /// Create a child pod with inherited extensions and metas.
    pub async fn pod(&self) -> Result<Pod, ResolveError> {
        self.pod_with(PodOptions::default()).await
    }

    /// Create a child pod. Inherited extensions and metas come first, then
    /// the options' additions; presets seed the pod's own cache.
    pub async fn pod_with(&self, options: PodOptions) -> Result<Pod, ResolveError> {
        let (mut extensions, mut metas) = {
            let state = lock(&self.core.state);
            if state.disposed {
                return Err(ResolveError::scope_disposed("pod"));
            }
            (state.extensions.clone(), state.metas.clone())
        };
        extensions.extend(options.extensions);
        metas.extend(options.metas);

        let mut parent_chain = Vec::with_capacity(self.core.parent_chain.len() + 1);
        parent_chain.push(self.core.clone());
        parent_chain.extend(self.core.parent_chain.iter().cloned());

        let core = Arc::new(ScopeCore {
            state: std::sync::Mutex::new(ScopeState::new(extensions.clone(), metas)),
            ext_store: Arc::new(crate::tag::Store::new()),
            parent_chain,
            is_pod: true,
        });
        for preset in &options.presets {
            core.insert_preset(preset);
        }
        {
            let mut state = lock(&self.core.state);
            state.child_pods.push(Arc::downgrade(&core));
        }

        let pod = Pod::from_core(core);
        PodCreated {
            depth: pod.depth(),
            presets: options.presets.len(),
        }
        .log();
        for extension in &extensions {
            if let Err(cause) = extension.init_pod(&pod).await {
                let boxed: Box<dyn std::error::Error + Send + Sync> = cause.into();
                return Err(ResolveError::internal(format!(
                    "extension '{}' failed to initialize pod",
                    extension.name()
                ))
                .with_cause(Arc::from(boxed)));
            }
        }
        Ok(pod)
    }
}
