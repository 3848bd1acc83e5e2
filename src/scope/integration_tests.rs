// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cross-module tests for resolution, propagation, pods, and disposal.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use crate::errors::ErrorCode;
use crate::executor::{derive, preset, provide, Executor};
use crate::extension::{Extension, Next, OperationDescriptor, WrapResult};
use crate::scope::{ChangeEvent, PodOptions, Scope};
use crate::tag::Store;

/// Route `tracing` output through the test harness; honors `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn counting_executor(calls: Arc<AtomicUsize>, value: u32) -> Executor<u32> {
    provide(move |_| {
        let calls = calls.clone();
        async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }
    })
}

#[tokio::test]
async fn resolve_memoizes_the_factory() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let answer = counting_executor(calls.clone(), 42);
    let scope = Scope::new();

    assert_eq!(*scope.resolve(&answer).await.unwrap(), 42);
    assert_eq!(*scope.resolve(&answer).await.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_resolves_share_one_factory_run() {
    let calls = Arc::new(AtomicUsize::new(0));
    let slow = {
        let calls = calls.clone();
        provide(move |_| {
            let calls = calls.clone();
            async move {
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                calls.fetch_add(1, Ordering::SeqCst);
                Ok("ready".to_string())
            }
        })
    };
    let scope = Scope::new();

    let (a, b, c) = tokio::join!(
        scope.resolve(&slow),
        scope.resolve(&slow),
        scope.resolve(&slow)
    );
    assert_eq!(*a.unwrap(), "ready");
    assert_eq!(*b.unwrap(), "ready");
    assert_eq!(*c.unwrap(), "ready");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn dependencies_materialize_in_declared_shapes() {
    let host = provide(|_| async { Ok("localhost".to_string()) });
    let port = provide(|_| async { Ok(5432u16) });
    let url = derive((&host, &port), |(host, port), _| async move {
        Ok(format!("postgres://{}:{}", host, port))
    });
    let scope = Scope::new();

    assert_eq!(
        *scope.resolve(&url).await.unwrap(),
        "postgres://localhost:5432"
    );
}

#[tokio::test]
async fn record_dependencies_materialize_by_name() {
    let host = provide(|_| async { Ok("localhost".to_string()) });
    let attempts = provide(|_| async { Ok(3u32) });
    let deps = crate::executor::DepMap::new()
        .with("host", &host)
        .with("attempts", attempts.lazy());
    let client = derive(deps, |resolved, _| async move {
        let host = resolved.get::<String>("host")?;
        let attempts = resolved.accessor::<u32>("attempts")?;
        Ok(format!("{} x{}", host, *attempts.resolve().await?))
    });
    let scope = Scope::new();

    assert_eq!(*scope.resolve(&client).await.unwrap(), "localhost x3");
}

#[tokio::test]
async fn lazy_edges_defer_resolution_until_asked() {
    let calls = Arc::new(AtomicUsize::new(0));
    let expensive = counting_executor(calls.clone(), 7);
    let consumer = derive(expensive.lazy(), |handle, _| async move {
        // Holding the accessor does not produce the target.
        Ok(handle)
    });
    let scope = Scope::new();

    let handle = scope.resolve(&consumer).await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    assert_eq!(*handle.resolve().await.unwrap(), 7);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn static_edges_resolve_and_expose_sync_reads() {
    let limit = provide(|_| async { Ok(250u64) });
    let reader = derive(limit.static_(), |handle, _| async move {
        Ok(*handle.get()?)
    });
    let scope = Scope::new();

    assert_eq!(*scope.resolve(&reader).await.unwrap(), 250);
}

#[tokio::test]
async fn reactive_dependents_reproduce_on_update() {
    init_tracing();
    let cleanups = Arc::new(AtomicUsize::new(0));
    let base = provide(|_| async { Ok(1u32) });
    let tenfold = {
        let cleanups = cleanups.clone();
        derive(base.reactive(), move |value, ctl| {
            let cleanups = cleanups.clone();
            ctl.cleanup(move || {
                cleanups.fetch_add(1, Ordering::SeqCst);
            });
            async move { Ok(*value * 10) }
        })
    };
    let scope = Scope::new();

    assert_eq!(*scope.resolve(&tenfold).await.unwrap(), 10);
    assert_eq!(cleanups.load(Ordering::SeqCst), 0);

    scope.update(&base, 5).await.unwrap();
    let accessor = scope.accessor(&tenfold);
    assert_eq!(*accessor.get().unwrap(), 50);
    assert_eq!(cleanups.load(Ordering::SeqCst), 1);

    scope.update(&base, 6).await.unwrap();
    assert_eq!(*accessor.get().unwrap(), 60);
    assert_eq!(cleanups.load(Ordering::SeqCst), 2);

    scope.dispose().await.unwrap();
    assert_eq!(cleanups.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn reactive_propagation_runs_in_insertion_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let base = provide(|_| async { Ok(0u32) });

    let first = {
        let order = order.clone();
        derive(base.reactive(), move |value, _| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(format!("first:{}", value));
                Ok(())
            }
        })
    };
    let second = {
        let order = order.clone();
        derive(base.reactive(), move |value, _| {
            let order = order.clone();
            async move {
                order.lock().unwrap().push(format!("second:{}", value));
                Ok(())
            }
        })
    };
    let scope = Scope::new();
    scope.resolve(&first).await.unwrap();
    scope.resolve(&second).await.unwrap();
    order.lock().unwrap().clear();

    scope.update(&base, 3).await.unwrap();
    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, vec!["first:3", "second:3"]);
}

#[tokio::test]
async fn failed_dependent_reproduction_does_not_stop_siblings() {
    let base = provide(|_| async { Ok(1u32) });
    let failing = derive(base.reactive(), |value, _| async move {
        if *value > 1 {
            Err(anyhow::anyhow!("too big"))
        } else {
            Ok(*value)
        }
    });
    let healthy = derive(base.reactive(), |value, _| async move { Ok(*value + 100) });
    let scope = Scope::new();
    scope.resolve(&failing).await.unwrap();
    scope.resolve(&healthy).await.unwrap();

    let errors = Arc::new(AtomicUsize::new(0));
    let _sub = {
        let errors = errors.clone();
        scope.on_error(move |_, _| {
            errors.fetch_add(1, Ordering::SeqCst);
        })
    };

    scope.update(&base, 2).await.unwrap();
    assert!(scope.accessor(&failing).get().is_err());
    assert_eq!(*scope.accessor(&healthy).get().unwrap(), 102);
    assert_eq!(errors.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cleanups_run_in_lifo_order() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let resource = {
        let order = order.clone();
        provide(move |ctl| {
            let first = order.clone();
            let second = order.clone();
            ctl.cleanup(move || first.lock().unwrap().push("first"));
            ctl.cleanup(move || second.lock().unwrap().push("second"));
            async move { Ok(()) }
        })
    };
    let scope = Scope::new();
    scope.resolve(&resource).await.unwrap();
    scope.release(&resource).await.unwrap();

    assert_eq!(order.lock().unwrap().clone(), vec!["second", "first"]);
}

#[tokio::test]
async fn update_with_applies_to_the_current_value() {
    let counter = provide(|_| async { Ok(10u32) });
    let scope = Scope::new();
    scope.resolve(&counter).await.unwrap();

    scope.update_with(&counter, |current| *current + 5).await.unwrap();
    assert_eq!(*scope.accessor(&counter).get().unwrap(), 15);
}

#[tokio::test]
async fn update_requires_a_resolved_entry() {
    let never = provide(|_| async { Ok(0u8) });
    let scope = Scope::new();
    let err = scope.update(&never, 1).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::Internal);
}

#[tokio::test]
async fn accessor_subscriptions_fire_on_update() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let level = provide(|_| async { Ok(1i64) });
    let scope = Scope::new();
    scope.resolve(&level).await.unwrap();

    let accessor = scope.accessor(&level);
    let sub = {
        let seen = seen.clone();
        accessor
            .subscribe(move |current| {
                seen.lock().unwrap().push(*current.get().unwrap());
            })
            .unwrap()
    };

    scope.update(&level, 2).await.unwrap();
    scope.update(&level, 3).await.unwrap();
    sub.unsubscribe();
    scope.update(&level, 4).await.unwrap();

    assert_eq!(seen.lock().unwrap().clone(), vec![2, 3]);
}

#[tokio::test]
async fn release_cascades_through_reactive_dependents_only() {
    let base = provide(|_| async { Ok(1u32) });
    let reactive_child = derive(base.reactive(), |value, _| async move { Ok(*value) });
    let lazy_child = derive(base.lazy(), |handle, _| async move { Ok(handle) });
    let scope = Scope::new();
    scope.resolve(&reactive_child).await.unwrap();
    scope.resolve(&lazy_child).await.unwrap();

    scope.release(&base).await.unwrap();

    assert!(scope.accessor(&base).lookup().is_none());
    assert!(scope.accessor(&reactive_child).lookup().is_none());
    assert!(scope.accessor(&lazy_child).lookup().is_some());
}

#[tokio::test]
async fn rejections_are_cached_and_rethrown() {
    let calls = Arc::new(AtomicUsize::new(0));
    let broken = {
        let calls = calls.clone();
        provide(move |_| {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(anyhow::anyhow!("boom"))
            }
        })
    };
    let scope = Scope::new();

    let first = scope.resolve(&broken).await.unwrap_err();
    assert_eq!(first.code, ErrorCode::FactoryFailed);
    let second = scope.resolve(&broken).await.unwrap_err();
    assert_eq!(second.code, ErrorCode::FactoryFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    let via_get = scope.accessor(&broken).get().unwrap_err();
    assert_eq!(via_get.code, ErrorCode::FactoryFailed);
}

#[tokio::test]
async fn dependency_failures_name_the_consumer() {
    let broken = provide(|_| async { Err::<u32, _>(anyhow::anyhow!("no disk")) });
    let consumer = derive(&broken, |value, _| async move { Ok(*value) });
    let scope = Scope::new();

    let err = scope.resolve(&consumer).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyResolutionFailed);
    assert!(err.cause().is_some());
}

#[tokio::test]
async fn controller_resolves_detect_cycles() {
    let second_slot: Arc<OnceLock<Executor<u32>>> = Arc::new(OnceLock::new());
    let first = {
        let second_slot = second_slot.clone();
        provide(move |ctl| {
            let second_slot = second_slot.clone();
            async move {
                let second = second_slot
                    .get()
                    .cloned()
                    .ok_or_else(|| anyhow::anyhow!("second not wired"))?;
                Ok(*ctl.resolve(&second).await?)
            }
        })
    };
    let second = {
        let first = first.clone();
        provide(move |ctl| {
            let first = first.clone();
            async move { Ok(*ctl.resolve(&first).await?) }
        })
    };
    second_slot.set(second).ok();

    let scope = Scope::new();
    let err = scope.resolve(&first).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DependencyCycle);
    assert!(err.context.dependency_chain.len() >= 3);
}

#[tokio::test]
async fn pods_copy_parent_values_without_sharing_updates() {
    let counter = provide(|_| async { Ok(1u32) });
    let scope = Scope::new();
    scope.resolve(&counter).await.unwrap();

    let pod = scope.pod().await.unwrap();
    assert_eq!(*pod.resolve(&counter).await.unwrap(), 1);

    pod.update(&counter, 99).await.unwrap();
    assert_eq!(*pod.accessor(&counter).get().unwrap(), 99);
    assert_eq!(*scope.accessor(&counter).get().unwrap(), 1);

    scope.update(&counter, 2).await.unwrap();
    assert_eq!(*pod.accessor(&counter).get().unwrap(), 99);
}

#[tokio::test]
async fn pod_presets_shadow_parent_values() {
    let flag = provide(|_| async { Ok(false) });
    let scope = Scope::new();
    scope.resolve(&flag).await.unwrap();

    let pod = scope
        .pod_with(PodOptions::new().preset(preset(&flag, true)))
        .await
        .unwrap();
    assert!(*pod.resolve(&flag).await.unwrap());
    assert!(!*scope.resolve(&flag).await.unwrap());
}

#[tokio::test]
async fn nested_pods_walk_the_whole_chain() {
    let calls = Arc::new(AtomicUsize::new(0));
    let config = counting_executor(calls.clone(), 11);
    let scope = Scope::new();
    scope.resolve(&config).await.unwrap();

    let outer = scope.pod().await.unwrap();
    let inner = outer.pod().await.unwrap();
    assert_eq!(inner.depth(), 2);
    assert_eq!(*inner.resolve(&config).await.unwrap(), 11);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn disposal_is_terminal() {
    let value = provide(|_| async { Ok(5u8) });
    let scope = Scope::new();
    scope.resolve(&value).await.unwrap();

    scope.dispose().await.unwrap();
    assert!(scope.is_disposed());

    let err = scope.resolve(&value).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ScopeDisposed);
    assert!(scope.update(&value, 9).await.is_err());
    assert!(scope.pod().await.is_err());
    assert!(scope.dispose().await.is_err());
}

#[tokio::test]
async fn dispose_releases_child_pods_first() {
    let released = Arc::new(AtomicUsize::new(0));
    let resource = {
        let released = released.clone();
        provide(move |ctl| {
            let released = released.clone();
            ctl.cleanup(move || {
                released.fetch_add(1, Ordering::SeqCst);
            });
            async move { Ok(()) }
        })
    };
    let scope = Scope::new();
    let pod = scope.pod().await.unwrap();
    // The pod produces its own instance; the scope has none.
    pod.resolve(&resource).await.unwrap();

    scope.dispose().await.unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(pod.is_disposed());
}

#[tokio::test]
async fn change_callbacks_see_updates() {
    let events = Arc::new(Mutex::new(Vec::new()));
    let value = provide(|_| async { Ok(1u32) });
    let scope = Scope::new();
    let _sub = {
        let events = events.clone();
        scope.on_change(move |event, executor, _| {
            events.lock().unwrap().push((event, executor.name()));
        })
    };

    scope.resolve(&value).await.unwrap();
    scope.update(&value, 2).await.unwrap();
    scope.release(&value).await.unwrap();

    let seen = events.lock().unwrap().clone();
    let kinds: Vec<ChangeEvent> = seen.iter().map(|(event, _)| *event).collect();
    assert_eq!(
        kinds,
        vec![ChangeEvent::Resolve, ChangeEvent::Update, ChangeEvent::Release]
    );
}

struct OperationCounter {
    resolves: Arc<AtomicUsize>,
    updates: Arc<AtomicUsize>,
}

#[async_trait]
impl Extension for OperationCounter {
    fn name(&self) -> &str {
        "operation-counter"
    }

    async fn wrap(
        &self,
        _context: &Store,
        next: Next,
        operation: &OperationDescriptor,
    ) -> WrapResult {
        match operation {
            OperationDescriptor::Resolve { .. } => {
                self.resolves.fetch_add(1, Ordering::SeqCst);
            }
            OperationDescriptor::Update { .. } => {
                self.updates.fetch_add(1, Ordering::SeqCst);
            }
            _ => {}
        }
        next.run().await
    }
}

#[tokio::test]
async fn extensions_wrap_resolve_and_update() {
    let resolves = Arc::new(AtomicUsize::new(0));
    let updates = Arc::new(AtomicUsize::new(0));
    let scope = Scope::builder()
        .extension(Arc::new(OperationCounter {
            resolves: resolves.clone(),
            updates: updates.clone(),
        }))
        .build()
        .await
        .unwrap();

    let value = provide(|_| async { Ok(3u32) });
    scope.resolve(&value).await.unwrap();
    scope.update(&value, 4).await.unwrap();

    assert_eq!(resolves.load(Ordering::SeqCst), 1);
    assert_eq!(updates.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn removed_extensions_stop_wrapping() {
    let resolves = Arc::new(AtomicUsize::new(0));
    let scope = Scope::new();
    let sub = scope
        .use_extension(Arc::new(OperationCounter {
            resolves: resolves.clone(),
            updates: Arc::new(AtomicUsize::new(0)),
        }))
        .await
        .unwrap();

    let first = provide(|_| async { Ok(1u8) });
    scope.resolve(&first).await.unwrap();
    assert_eq!(resolves.load(Ordering::SeqCst), 1);

    sub.unsubscribe();
    let second = provide(|_| async { Ok(2u8) });
    scope.resolve(&second).await.unwrap();
    assert_eq!(resolves.load(Ordering::SeqCst), 1);
}
