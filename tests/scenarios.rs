//! End-to-end ordering scenarios through the public `SyncCore` API.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use boardsync::drag::DropEvent;
use boardsync::model::{Collection, ItemId, OrderableItem, PartitionKey};
use boardsync::sync::{
    CommitOutcome, CommitReceipt, GatewayError, MemoryGateway, PersistenceGateway, StateChange,
    SyncCore,
};
use futures::channel::oneshot;
use futures::executor::{LocalPool, block_on};
use futures::task::LocalSpawnExt;
use pretty_assertions::assert_eq;

fn key(s: &str) -> PartitionKey {
    PartitionKey::from(s)
}

fn id(s: &str) -> ItemId {
    ItemId::from(s)
}

fn ids(core: &SyncCore<impl PersistenceGateway + 'static>, partition: &str) -> Vec<String> {
    core.with_collection(|c| {
        c.partition(&key(partition))
            .iter()
            .map(|i| i.id.to_string())
            .collect()
    })
}

fn positions(core: &SyncCore<impl PersistenceGateway + 'static>, partition: &str) -> Vec<f64> {
    core.with_collection(|c| {
        c.partition(&key(partition))
            .iter()
            .map(|i| i.position.value())
            .collect()
    })
}

/// Gateway whose answers are handed out by the test through oneshot channels.
#[derive(Default)]
struct ScriptedGateway {
    answers: RefCell<Vec<oneshot::Receiver<Result<CommitReceipt, GatewayError>>>>,
    calls: RefCell<usize>,
}

impl ScriptedGateway {
    fn next_answer(&self) -> oneshot::Sender<Result<CommitReceipt, GatewayError>> {
        let (tx, rx) = oneshot::channel();
        self.answers.borrow_mut().push(rx);
        tx
    }
}

#[async_trait(?Send)]
impl PersistenceGateway for ScriptedGateway {
    async fn commit(&self, _changes: &[OrderableItem]) -> Result<CommitReceipt, GatewayError> {
        *self.calls.borrow_mut() += 1;
        let rx = self.answers.borrow_mut().remove(0);
        match rx.await {
            Ok(answer) => answer,
            Err(_) => Err(GatewayError::Unavailable("no answer".into())),
        }
    }
}

#[test]
fn scenario_a_move_to_top_of_other_column() {
    let board = Collection::from_items(vec![
        OrderableItem::new("T1", "not_started", 1.0, ""),
        OrderableItem::new("T2", "not_started", 2.0, ""),
        OrderableItem::new("T3", "done", 1.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), MemoryGateway::new(board));

    core.start_drag(&id("T1")).unwrap();
    core.update_target(key("done"), 0);
    let outcome = block_on(core.drop_item().unwrap());

    assert_eq!(outcome, CommitOutcome::Confirmed);
    assert_eq!(ids(&core, "not_started"), vec!["T2"]);
    assert_eq!(ids(&core, "done"), vec!["T1", "T3"]);
    let done = positions(&core, "done");
    assert!(done[0] < 1.0);
    assert_eq!(done[1], 1.0);
    assert_eq!(core.gateway().stored(), core.snapshot());
}

#[test]
fn scenario_b_move_last_to_first() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "col", 1.0, ""),
        OrderableItem::new("B", "col", 2.0, ""),
        OrderableItem::new("C", "col", 3.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), MemoryGateway::new(board));

    core.start_drag(&id("C")).unwrap();
    core.update_target(key("col"), 0);
    block_on(core.drop_item().unwrap());

    assert_eq!(ids(&core, "col"), vec!["C", "A", "B"]);
    let p = positions(&core, "col");
    assert!(p.windows(2).all(|w| w[0] < w[1]));
    // only C was sent
    assert_eq!(core.gateway().calls()[0].len(), 1);
}

#[test]
fn scenario_c_failing_store_rolls_back() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "todo", 1.0, ""),
        OrderableItem::new("B", "todo", 2.0, ""),
        OrderableItem::new("C", "done", 1.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), MemoryGateway::failing(board.clone()));
    let errors = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&errors);
    let observer = core.clone();
    core.on_failure(move |failure| {
        // the rollback is already visible when the failure arrives
        sink.borrow_mut().push((failure.item_id.clone(), observer.snapshot()));
    });

    core.start_drag(&id("A")).unwrap();
    core.update_target(key("done"), 1);
    let commit = core.drop_item().unwrap();
    assert_eq!(ids(&core, "done"), vec!["C", "A"]);

    assert_eq!(block_on(commit), CommitOutcome::RolledBack);
    assert_eq!(core.snapshot(), board);
    let errors = errors.borrow();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, id("A"));
    assert_eq!(errors[0].1, board);
}

#[test]
fn scenario_d_cancel_then_drag_again() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "todo", 1.0, ""),
        OrderableItem::new("B", "todo", 2.0, ""),
        OrderableItem::new("C", "done", 1.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), MemoryGateway::new(board));

    core.start_drag(&id("A")).unwrap();
    core.update_target(key("done"), 0);
    core.cancel();
    assert!(core.drop_item().is_none());

    core.start_drag(&id("A")).unwrap();
    core.update_target(key("todo"), 1);
    let outcome = block_on(core.drop_item().unwrap());

    assert_eq!(outcome, CommitOutcome::Confirmed);
    assert_eq!(core.gateway().call_count(), 1);
    assert_eq!(ids(&core, "todo"), vec!["B", "A"]);
    assert_eq!(ids(&core, "done"), vec!["C"]);
}

#[test]
fn drop_at_origin_is_idempotent() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "todo", 1.0, ""),
        OrderableItem::new("B", "todo", 2.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), MemoryGateway::new(board.clone()));
    for _ in 0..3 {
        core.start_drag(&id("B")).unwrap();
        assert!(core.drop_item().is_none());
    }
    assert_eq!(core.gateway().call_count(), 0);
    assert_eq!(core.snapshot(), board);
}

#[test]
fn later_drop_wins_over_earlier_late_response() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "todo", 1.0, ""),
        OrderableItem::new("B", "todo", 2.0, ""),
    ]);
    let core = SyncCore::new(board, ScriptedGateway::default());
    let first_answer = core.gateway().next_answer();
    let second_answer = core.gateway().next_answer();

    let mut pool = LocalPool::new();
    let outcomes = Rc::new(RefCell::new(Vec::new()));

    let first = core
        .apply_drop(DropEvent {
            item_id: id("A"),
            source_partition: key("todo"),
            target_partition: key("doing"),
            target_index: 0,
        })
        .unwrap();
    let sink = Rc::clone(&outcomes);
    pool.spawner()
        .spawn_local(async move { sink.borrow_mut().push(("first", first.await)) })
        .unwrap();
    pool.run_until_stalled();

    let second = core
        .apply_drop(DropEvent {
            item_id: id("A"),
            source_partition: key("doing"),
            target_partition: key("done"),
            target_index: 0,
        })
        .unwrap();
    let sink = Rc::clone(&outcomes);
    pool.spawner()
        .spawn_local(async move { sink.borrow_mut().push(("second", second.await)) })
        .unwrap();
    pool.run_until_stalled();
    assert_eq!(*core.gateway().calls.borrow(), 2);

    second_answer.send(Ok(CommitReceipt::default())).unwrap();
    pool.run_until_stalled();
    first_answer
        .send(Err(GatewayError::Rejected("too late".into())))
        .unwrap();
    pool.run_until_stalled();

    assert_eq!(
        *outcomes.borrow(),
        vec![
            ("second", CommitOutcome::Confirmed),
            ("first", CommitOutcome::Stale)
        ]
    );
    assert_eq!(ids(&core, "done"), vec!["A"]);
    assert!(ids(&core, "doing").is_empty());
    assert_eq!(core.outstanding_commits(), 0);
}

#[test]
fn both_overlapping_drops_failing_restores_the_board() {
    let board = Collection::from_items(vec![
        OrderableItem::new("T1", "not_started", 1.0, ""),
        OrderableItem::new("T3", "done", 1.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), ScriptedGateway::default());
    let first_answer = core.gateway().next_answer();
    let second_answer = core.gateway().next_answer();
    let failures = Rc::new(RefCell::new(0));
    let counter = Rc::clone(&failures);
    core.on_failure(move |_| *counter.borrow_mut() += 1);

    let mut pool = LocalPool::new();
    let outcomes = Rc::new(RefCell::new(Vec::new()));
    for (label, target) in [("first", "done"), ("second", "in_progress")] {
        let from = core.with_collection(|c| c.get(&id("T1")).map(|i| i.partition.clone()));
        let commit = core
            .apply_drop(DropEvent {
                item_id: id("T1"),
                source_partition: from.unwrap(),
                target_partition: key(target),
                target_index: 0,
            })
            .unwrap();
        let sink = Rc::clone(&outcomes);
        pool.spawner()
            .spawn_local(async move { sink.borrow_mut().push((label, commit.await)) })
            .unwrap();
        pool.run_until_stalled();
    }

    second_answer
        .send(Err(GatewayError::Rejected("conflict".into())))
        .unwrap();
    pool.run_until_stalled();
    assert_eq!(ids(&core, "done"), vec!["T1", "T3"]);

    first_answer
        .send(Err(GatewayError::Unavailable("offline".into())))
        .unwrap();
    pool.run_until_stalled();

    assert_eq!(
        *outcomes.borrow(),
        vec![
            ("second", CommitOutcome::RolledBack),
            ("first", CommitOutcome::RolledBack)
        ]
    );
    assert_eq!(core.snapshot(), board);
    assert_eq!(*failures.borrow(), 2);
}

#[test]
fn failed_renumber_racing_another_drop_keeps_positions_distinct() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "col", 1.0, ""),
        OrderableItem::new("B", "col", 1.0 + f64::EPSILON, ""),
        OrderableItem::new("C", "col", 3.0, ""),
        OrderableItem::new("X", "inbox", 1.0, ""),
        OrderableItem::new("Y", "inbox", 2.0, ""),
    ]);
    let core = SyncCore::new(board, ScriptedGateway::default());
    let x_answer = core.gateway().next_answer();
    let y_answer = core.gateway().next_answer();
    let repair_answer = core.gateway().next_answer();

    let mut pool = LocalPool::new();
    for (item, index) in [("X", 1), ("Y", 9)] {
        let commit = core
            .apply_drop(DropEvent {
                item_id: id(item),
                source_partition: key("inbox"),
                target_partition: key("col"),
                target_index: index,
            })
            .unwrap();
        pool.spawner()
            .spawn_local(async move {
                commit.await;
            })
            .unwrap();
        pool.run_until_stalled();
    }

    y_answer.send(Ok(CommitReceipt::default())).unwrap();
    pool.run_until_stalled();
    x_answer
        .send(Err(GatewayError::Rejected("conflict".into())))
        .unwrap();
    pool.run_until_stalled();
    // the follow-up renumber is in flight
    assert_eq!(*core.gateway().calls.borrow(), 3);
    repair_answer.send(Ok(CommitReceipt::default())).unwrap();
    pool.run_until_stalled();

    assert_eq!(ids(&core, "col"), vec!["A", "B", "C", "Y"]);
    let pos = positions(&core, "col");
    assert!(pos.windows(2).all(|w| w[0] < w[1]), "{:?}", pos);
    assert_eq!(ids(&core, "inbox"), vec!["X"]);
    assert_eq!(core.outstanding_commits(), 0);
}

#[test]
fn change_events_follow_the_commit_lifecycle() {
    let board = Collection::from_items(vec![
        OrderableItem::new("A", "todo", 1.0, ""),
        OrderableItem::new("B", "todo", 2.0, ""),
    ]);
    let core = SyncCore::new(board.clone(), MemoryGateway::new(board));
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    core.subscribe(move |change| {
        sink.borrow_mut().push(match change {
            StateChange::Applied { items } => format!("applied {}", items.len()),
            StateChange::Reconciled { items } => format!("reconciled {}", items.len()),
            StateChange::RolledBack { items } => format!("rolled back {}", items.len()),
            StateChange::Refreshed => "refreshed".to_string(),
        });
    });

    core.start_drag(&id("A")).unwrap();
    core.update_target(key("todo"), 1);
    block_on(core.drop_item().unwrap());

    core.gateway().set_failing(true);
    core.start_drag(&id("B")).unwrap();
    core.update_target(key("done"), 0);
    block_on(core.drop_item().unwrap());

    core.refresh(core.gateway().stored().into_items());

    assert_eq!(
        *log.borrow(),
        vec!["applied 1", "applied 1", "rolled back 1", "refreshed"]
    );
}

/// Tiny deterministic generator so the sequence is reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

#[test]
fn ordering_invariant_holds_across_many_drops() {
    let partitions = ["todo", "doing", "done"];
    let board = Collection::from_items(
        (0..12).map(|i| OrderableItem::new(format!("I{:02}", i), partitions[i % 3], i as f64, "")),
    );
    let core = SyncCore::new(board.clone(), MemoryGateway::new(board));
    let mut rng = Lcg(7);

    for round in 0..400 {
        let item = id(&format!("I{:02}", rng.next(12)));
        let target = partitions[rng.next(3)];
        let index = rng.next(8);

        // every fifth commit fails and must leave things as they were
        core.gateway().set_failing(round % 5 == 4);
        let before = core.snapshot();

        core.start_drag(&item).unwrap();
        core.update_target(key(target), index);
        let outcome = core.drop_item().map(block_on);

        if outcome == Some(CommitOutcome::RolledBack) {
            assert_eq!(core.snapshot(), before, "round {}", round);
        }
        for p in partitions {
            let pos = positions(&core, p);
            assert!(
                pos.windows(2).all(|w| w[0] < w[1]),
                "round {}: {} not strictly increasing: {:?}",
                round,
                p,
                pos
            );
        }
    }

    assert_eq!(core.snapshot().len(), 12);
    assert_eq!(core.gateway().stored(), core.snapshot());
}
