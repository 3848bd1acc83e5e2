// Copyright (c) 2025 Steve Wagner (ciroque@live.com)
// SPDX-License-Identifier: MIT

//! Cross-module tests for flow execution, journaling, and composition.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::errors::{ErrorCode, FlowError};
use crate::executor::provide;
use crate::flow::{execute, execute_with, meta, ExecuteOptions, Flow, FlowDefinition, FlowHandle};
use crate::schema::{self, SchemaIssues};
use crate::scope::Scope;
use crate::tag;

/// Route `tracing` output through the test harness; honors `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn execute_runs_the_handler_and_returns_its_value() {
    init_tracing();
    let double = Flow::new(|_ctx, n: u32| async move { Ok(n * 2) });
    let result = execute(&double, 21).await.unwrap();
    assert_eq!(*result, 42);
}

#[tokio::test]
async fn definitions_validate_input_and_output() {
    let positive = schema::typed::<i64, _>(|v| {
        if v > 0 {
            Ok(v)
        } else {
            Err(SchemaIssues::single("must be positive"))
        }
    });
    let capped = schema::typed::<i64, _>(|v| {
        if v <= 100 {
            Ok(v)
        } else {
            Err(SchemaIssues::single("too large"))
        }
    });
    let flow = Flow::define(
        FlowDefinition::named("scaled")
            .input_schema(positive)
            .output_schema(capped),
    )
    .handler(|_ctx, n: i64| async move { Ok(n * 30) });

    assert_eq!(*execute(&flow, 3).await.unwrap(), 90);

    match execute(&flow, -1).await.unwrap_err() {
        FlowError::Validation { flow, .. } => assert_eq!(flow, "scaled"),
        other => panic!("expected validation error, got {}", other),
    }

    // 4 * 30 passes input validation and fails output validation.
    assert!(matches!(
        execute(&flow, 4).await.unwrap_err(),
        FlowError::Validation { .. }
    ));
}

#[tokio::test]
async fn flows_resolve_dependencies_against_their_pod() {
    let greeting = provide(|_| async { Ok("hello".to_string()) });
    let greet = Flow::with_deps(&greeting, |greeting, _ctx, name: String| async move {
        Ok(format!("{} {}", greeting, name))
    });

    let scope = Scope::new();
    scope.resolve(&greeting).await.unwrap();
    let result = execute_with(
        &greet,
        "world".to_string(),
        ExecuteOptions {
            scope: Some(scope.clone()),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    assert_eq!(*result, "hello world");

    // The flow ran in a pod; the scope's own cache is untouched by the run.
    assert_eq!(*scope.accessor(&greeting).get().unwrap(), "hello");
}

#[tokio::test]
async fn journal_runs_each_key_at_most_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let flow = {
        let calls = calls.clone();
        Flow::new(move |ctx, _: ()| {
            let calls = calls.clone();
            async move {
                let first = {
                    let calls = calls.clone();
                    ctx.run("sum", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(5u32 + 3)
                    })
                    .await?
                };
                // Same key, different operation: replays the stored value.
                let second = {
                    let calls = calls.clone();
                    ctx.run("sum", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(999u32)
                    })
                    .await?
                };
                Ok((*first, *second))
            }
        })
    };

    let result = execute(&flow, ()).await.unwrap();
    assert_eq!(*result, (8, 8));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn journal_replays_stored_errors() {
    let calls = Arc::new(AtomicUsize::new(0));
    let flow = {
        let calls = calls.clone();
        Flow::new(move |ctx, _: ()| {
            let calls = calls.clone();
            async move {
                let first = {
                    let calls = calls.clone();
                    ctx.run::<u32, _, _>("broken", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(anyhow::anyhow!("remote down"))
                    })
                    .await
                };
                assert!(first.is_err());
                let second = {
                    let calls = calls.clone();
                    ctx.run::<u32, _, _>("broken", move || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(1)
                    })
                    .await
                };
                match second {
                    Err(FlowError::Task { key, .. }) => {
                        assert!(key.ends_with(":broken"));
                    }
                    other => panic!("expected replayed task error, got {:?}", other.is_ok()),
                }
                Ok(ctx.journal().len())
            }
        })
    };

    let result = execute(&flow, ()).await.unwrap();
    assert_eq!(*result, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn sibling_sub_flows_do_not_share_context_writes() {
    let shade = tag::custom::<String>();
    let child = {
        let shade = shade.clone();
        Flow::new(move |ctx, label: String| {
            let shade = shade.clone();
            async move {
                ctx.set(&shade, label)?;
                Ok((*ctx.get(&shade).map_err(anyhow::Error::new)?).clone())
            }
        })
    };
    let parent = {
        let shade = shade.clone();
        let child = child.clone();
        Flow::new(move |ctx, _: ()| {
            let shade = shade.clone();
            let child = child.clone();
            async move {
                let red = ctx.exec(&child, "red".to_string());
                let blue = ctx.exec(&child, "blue".to_string());
                let red = (*red.await?).clone();
                let blue = (*blue.await?).clone();
                // The parent context never saw either write.
                let parent_sees = ctx.find(&shade).is_none();
                Ok((red, blue, parent_sees))
            }
        })
    };

    let result = execute(&parent, ()).await.unwrap();
    assert_eq!(result.0, "red");
    assert_eq!(result.1, "blue");
    assert!(result.2);
}

#[tokio::test]
async fn child_contexts_read_parent_values_through_fallback() {
    let tenant = tag::custom::<String>();
    let child = {
        let tenant = tenant.clone();
        Flow::new(move |ctx, _: ()| {
            let tenant = tenant.clone();
            async move { Ok((*ctx.get(&tenant).map_err(anyhow::Error::new)?).clone()) }
        })
    };
    let parent = {
        let tenant = tenant.clone();
        let child = child.clone();
        Flow::new(move |ctx, _: ()| {
            let tenant = tenant.clone();
            let child = child.clone();
            async move {
                ctx.set(&tenant, "acme".to_string())?;
                Ok((*ctx.exec(&child, ()).await?).clone())
            }
        })
    };

    assert_eq!(*execute(&parent, ()).await.unwrap(), "acme");
}

#[tokio::test]
async fn sub_flow_contexts_carry_depth_and_parent_name() {
    let probe = Flow::define(FlowDefinition::named("probe")).handler(|ctx, _: ()| async move {
        let depth = *ctx.get(meta::depth()).map_err(anyhow::Error::new)?;
        let parent = ctx
            .find(meta::parent_flow_name())
            .map(|name| (*name).clone());
        Ok((depth, parent))
    });
    let driver = {
        let probe = probe.clone();
        Flow::define(FlowDefinition::named("driver")).handler(move |ctx, _: ()| {
            let probe = probe.clone();
            async move {
                let own_depth = *ctx.get(meta::depth()).map_err(anyhow::Error::new)?;
                let nested = (*ctx.exec(&probe, ()).await?).clone();
                Ok((own_depth, nested))
            }
        })
    };

    let result = execute(&driver, ()).await.unwrap();
    assert_eq!(result.0, 0);
    assert_eq!(result.1, (1, Some("driver".to_string())));
}

#[tokio::test]
async fn parallel_rejects_with_the_first_rejection() {
    let step = Flow::new(|_ctx, n: u32| async move {
        if n == 2 {
            Err(anyhow::anyhow!("two is broken"))
        } else {
            Ok(n)
        }
    });
    let driver = {
        let step = step.clone();
        Flow::new(move |ctx, _: ()| {
            let step = step.clone();
            async move {
                let handles = vec![
                    ctx.exec(&step, 1),
                    ctx.exec(&step, 2),
                    ctx.exec(&step, 3),
                ];
                let outcome = ctx.parallel(handles).await;
                match outcome {
                    Err(error) => Ok(error.to_string()),
                    Ok(_) => Err(anyhow::anyhow!("expected a rejection")),
                }
            }
        })
    };

    let message = execute(&driver, ()).await.unwrap();
    assert!(message.contains("two is broken"));
}

#[tokio::test]
async fn parallel_settled_partitions_preserving_positions() {
    let step = Flow::new(|_ctx, n: u32| async move {
        if n == 2 {
            Err(anyhow::anyhow!("middle failed"))
        } else {
            Ok(n * 10)
        }
    });
    let driver = {
        let step = step.clone();
        Flow::new(move |ctx, _: ()| {
            let step = step.clone();
            async move {
                let handles = vec![
                    ctx.exec(&step, 1),
                    ctx.exec(&step, 2),
                    ctx.exec(&step, 3),
                ];
                let batch = ctx.parallel_settled(handles).await?;
                let (fulfilled, rejected) = batch.partition();
                let values: Vec<u32> = fulfilled.iter().map(|v| **v).collect();
                let stats = batch.stats();
                Ok((values, rejected.len(), stats.succeeded, stats.failed))
            }
        })
    };

    let result = execute(&driver, ()).await.unwrap();
    assert_eq!(result.0, vec![10, 30]);
    assert_eq!(result.1, 1);
    assert_eq!(result.2, 2);
    assert_eq!(result.3, 1);
}

#[tokio::test]
async fn exec_with_marks_parallel_contexts() {
    let probe = Flow::new(|ctx, _: ()| async move {
        Ok(*ctx.get(meta::is_parallel()).map_err(anyhow::Error::new)?)
    });
    let driver = {
        let probe = probe.clone();
        Flow::new(move |ctx, _: ()| {
            let probe = probe.clone();
            async move {
                let plain = *ctx.exec(&probe, ()).await?;
                let marked = *ctx
                    .exec_with(
                        &probe,
                        (),
                        crate::flow::ExecOptions {
                            parallel: true,
                            ..Default::default()
                        },
                    )
                    .await?;
                Ok((plain, marked))
            }
        })
    };

    let result = execute(&driver, ()).await.unwrap();
    assert_eq!(*result, (false, true));
}

#[tokio::test]
async fn handles_chain_with_map_and_then() {
    let base = Flow::new(|_ctx, n: u32| async move { Ok(n + 1) });
    let doubled = execute(&base, 1).map(|v| *v * 2);
    assert_eq!(*doubled.await.unwrap(), 4);

    let chained = execute(&base, 10).and_then(|v| {
        let next = Flow::new(|_ctx, n: u32| async move { Ok(n * 100) });
        execute(&next, *v)
    });
    assert_eq!(*chained.await.unwrap(), 1100);
}

#[tokio::test]
async fn in_details_discriminates_without_rejecting() {
    let flaky = Flow::new(|_ctx, fail: bool| async move {
        if fail {
            Err(anyhow::anyhow!("asked to fail"))
        } else {
            Ok("fine".to_string())
        }
    });

    let ok = execute(&flaky, false).in_details().await;
    assert!(ok.success());
    assert!(ok.context().is_some());

    let failed = execute(&flaky, true).in_details().await;
    assert!(!failed.success());
    // The context survives failure for journal inspection.
    assert!(failed.context().is_some());
}

#[tokio::test]
async fn handle_ctx_exposes_the_journal_after_completion() {
    let flow = Flow::define(FlowDefinition::named("audited")).handler(|ctx, _: ()| async move {
        let _ = ctx.run("first", || async { Ok(1u32) }).await?;
        let _ = ctx.run("second", || async { Ok(2u32) }).await?;
        Ok(())
    });

    let handle = execute(&flow, ());
    let context = handle.ctx().await.unwrap();
    assert_eq!(
        context.journal().keys(),
        vec!["audited:0:first", "audited:0:second"]
    );
    assert_eq!(context.flow_name(), "audited");
}

#[tokio::test]
async fn combinators_demand_a_single_root_execution() {
    let noop = Flow::new(|_ctx, _: ()| async move { Ok(1u32) });
    let driver = {
        let noop = noop.clone();
        Flow::new(move |ctx, _: ()| {
            let noop = noop.clone();
            async move {
                let a = ctx.exec(&noop, ());
                let b = ctx.exec(&noop, ());
                let all = FlowHandle::all(vec![a, b]).await?;
                Ok(all.iter().map(|v| **v).sum::<u32>())
            }
        })
    };
    assert_eq!(*execute(&driver, ()).await.unwrap(), 2);

    // Root handles carry no shared pod, so combining them is rejected.
    let left = execute(&noop, ());
    let right = execute(&noop, ());
    assert!(matches!(
        FlowHandle::all(vec![left, right]).await.unwrap_err(),
        FlowError::PodMismatch
    ));
}

#[tokio::test]
async fn race_settles_with_the_first_finisher() {
    let sleepy = Flow::new(|_ctx, millis: u64| async move {
        tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        Ok(millis)
    });
    let driver = {
        let sleepy = sleepy.clone();
        Flow::new(move |ctx, _: ()| {
            let sleepy = sleepy.clone();
            async move {
                let handles = vec![ctx.exec(&sleepy, 50), ctx.exec(&sleepy, 5)];
                Ok(*FlowHandle::race(handles).await?)
            }
        })
    };

    assert_eq!(*execute(&driver, ()).await.unwrap(), 5);
}

#[tokio::test]
async fn or_else_recovers_a_rejection() {
    let flaky = Flow::new(|_ctx, fail: bool| async move {
        if fail {
            Err(anyhow::anyhow!("down"))
        } else {
            Ok(7u32)
        }
    });

    let recovered = execute(&flaky, true).or_else({
        let flaky = flaky.clone();
        move |_error| execute(&flaky, false)
    });
    assert_eq!(*recovered.await.unwrap(), 7);
}

#[tokio::test]
async fn handler_resolve_errors_keep_their_identity() {
    let broken = provide(|_| async { Err::<u32, _>(anyhow::anyhow!("no backend")) });
    let flow = Flow::with_deps(&broken, |_value, _ctx, _: ()| async move { Ok(()) });

    match execute(&flow, ()).await.unwrap_err() {
        FlowError::Resolve(err) => {
            assert_eq!(err.code, ErrorCode::DependencyResolutionFailed);
        }
        other => panic!("expected resolve error, got {}", other),
    }
}
