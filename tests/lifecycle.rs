//! Setup → run → cleanup behaviour of whole sequences.

mod common;

use common::{Harness, Phase};
use rust_scan::{parse, ActionRegistry, ScanError};
use std::time::Duration;

#[tokio::test]
async fn test_repeat_runs_children_exactly_count_times() {
    for k in [0, 1, 3, 7] {
        let harness = Harness::new();
        let text = format!(
            "action count\n    count {k}\n    action trace\n        name a\n    end\n    action trace\n        name b\n    end\nend\n"
        );
        let (_forest, result) = harness.run(&text).await;
        result.unwrap();

        for name in ["a", "b"] {
            assert_eq!(harness.count(Phase::Run, name), k, "count {k}, child {name}");
            assert_eq!(harness.count(Phase::Setup, name), 1);
            assert_eq!(harness.count(Phase::Cleanup, name), 1);
        }
    }
}

#[tokio::test]
async fn test_children_run_in_declaration_order_each_iteration() {
    let harness = Harness::new();
    let text = "action count\n count 2\n action trace\n  name a\n end\n action trace\n  name b\n end\nend\n";
    let (_forest, result) = harness.run(text).await;
    result.unwrap();

    let runs: Vec<String> = harness
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("run:"))
        .collect();
    assert_eq!(runs, vec!["run:a", "run:b", "run:a", "run:b"]);
}

#[tokio::test]
async fn test_nested_repeats_multiply() {
    let harness = Harness::new();
    let text = "\
action count
    count 2
    action count
        count 3
        action trace
            name inner
        end
    end
end
";
    let (_forest, result) = harness.run(text).await;
    result.unwrap();
    assert_eq!(harness.count(Phase::Run, "inner"), 6);
    assert_eq!(harness.count(Phase::Setup, "inner"), 1);
}

#[tokio::test]
async fn test_count_with_zero_delay() {
    let harness = Harness::new();
    let text = "\
action count
    count 3
    action sleep
        seconds 0
        action trace
            name tick
        end
    end
end
";
    let started = std::time::Instant::now();
    let (forest, result) = harness.run(text).await;
    let summary = result.unwrap();

    assert_eq!(summary.nodes, 3);
    assert_eq!(harness.count(Phase::Run, "tick"), 3);
    assert_eq!(harness.count(Phase::Cleanup, "tick"), 1);
    assert!(forest.walk().iter().all(|node| !node.is_ready()));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_run_failure_cleans_every_ready_node_once() {
    let harness = Harness::new();
    let text = "\
action trace
    name first
end
action count
    count 4
    action trace
        name ok
    end
    action trace
        name broken
        fail run
    end
    action trace
        name never
    end
end
";
    let (forest, result) = harness.run(text).await;
    let err = result.unwrap_err();
    assert_eq!(err.node().map(|n| n.line), Some(9));

    assert_eq!(harness.count(Phase::Run, "ok"), 1);
    assert_eq!(harness.count(Phase::Run, "never"), 0);
    for name in ["first", "ok", "broken", "never"] {
        assert_eq!(harness.count(Phase::Cleanup, name), 1, "{name}");
    }
    assert!(forest.walk().iter().all(|node| !node.is_ready()));

    let calls = harness.calls();
    let cleanups: Vec<&str> = calls
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("cleanup:"))
        .collect();
    assert_eq!(
        cleanups,
        vec!["cleanup:never", "cleanup:broken", "cleanup:ok", "cleanup:first"]
    );
}

#[tokio::test]
async fn test_setup_failure_skips_later_siblings() {
    let harness = Harness::new();
    let text = "\
action trace
    name a
end
action trace
    name b
    fail setup
end
action trace
    name c
end
";
    let (_forest, result) = harness.run(text).await;
    assert!(result.is_err());

    assert_eq!(harness.count(Phase::Cleanup, "a"), 1);
    assert_eq!(harness.count(Phase::Cleanup, "b"), 0);
    assert_eq!(harness.count(Phase::Setup, "c"), 0);
    assert_eq!(harness.count(Phase::Run, "a"), 0);
}

#[tokio::test]
async fn test_first_fatal_error_wins_over_cleanup_failures() {
    let harness = Harness::new();
    let text = "\
action trace
    name leaky
    fail cleanup
end
action trace
    name broken
    fail run
end
";
    let (_forest, result) = harness.run(text).await;
    let err = result.unwrap_err();
    assert_eq!(err.line(), Some(5));
    assert_eq!(harness.count(Phase::Cleanup, "leaky"), 1);
}

#[tokio::test]
async fn test_cleanup_failures_reported_after_successful_run() {
    let harness = Harness::new();
    let text = "action trace\n name x\n fail cleanup\nend\naction trace\n name y\n fail cleanup\nend\n";
    let (_forest, result) = harness.run(text).await;
    match result.unwrap_err() {
        ScanError::CleanupFailed(failures) => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].line(), Some(5));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_delay() {
    let harness = Harness::new();
    let mut forest = harness.parse(
        "action sleep\n    minutes 10\n    action trace\n        name after\n    end\nend\n",
    );
    let ctx = harness.context();
    let cancel = ctx.cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
    });

    let err = rust_scan::run_all(&mut forest, ctx).await.unwrap_err();
    assert!(matches!(err, ScanError::Cancelled));
    assert_eq!(harness.count(Phase::Run, "after"), 0);
    assert_eq!(harness.count(Phase::Cleanup, "after"), 1);
}

#[tokio::test]
async fn test_cancellation_between_repeat_iterations() {
    let harness = Harness::new();
    let text = "\
action count
    count 5
    action trace
        name stopper
        cancel
    end
end
action trace
    name sibling
end
";
    let (forest, result) = harness.run(text).await;
    assert!(matches!(result.unwrap_err(), ScanError::Cancelled));

    assert_eq!(harness.count(Phase::Run, "stopper"), 1);
    assert_eq!(harness.count(Phase::Run, "sibling"), 0);
    for name in ["stopper", "sibling"] {
        assert_eq!(harness.count(Phase::Cleanup, name), 1, "{name}");
    }
    assert!(forest.walk().iter().all(|node| !node.is_ready()));
}

#[tokio::test]
async fn test_parse_errors_abort_before_setup() {
    let harness = Harness::new();
    for text in [
        "action trace\n name a\n",
        "action trace\nend\nend\n",
        "name a\n",
        "action trace\nend\naction laser\nend\n",
    ] {
        assert!(parse(text, &harness.registry).is_err(), "{text:?}");
    }
    assert!(harness.calls().is_empty());
}

#[test]
fn test_imbalance_is_structural() {
    let registry = ActionRegistry::with_builtins();
    for text in ["action count\n", "end\n", "action count\naction sleep\nend\n"] {
        let err = parse(text, &registry).unwrap_err();
        assert!(matches!(err, ScanError::Structural { .. }), "{text:?}: {err}");
    }
}

#[test]
fn test_rendered_forest_reproduces_parameters() {
    let registry = ActionRegistry::with_builtins();
    let text = "\
action count
    count 2
    action a2d
        channels 0 1 2
        rate 10000
        samples 100
    end
end
";
    let forest = parse(text, &registry).unwrap();
    assert_eq!(forest.to_string(), text);

    let leaf = &forest.roots()[0].children()[0];
    let pairs: Vec<(String, Vec<String>)> = leaf
        .parameters()
        .entries()
        .iter()
        .map(|p| (p.keyword.clone(), p.values.clone()))
        .collect();
    assert_eq!(pairs[0], ("channels".to_string(), vec!["0".into(), "1".into(), "2".into()]));
    assert_eq!(pairs.len(), 3);
}
