//! Convergence tests for the transaction coordinator
//!
//! Replicas commit concurrently and exchange transactions in arbitrary
//! order, with duplicates. Every replica must end with identical fields.

use braid_db::{
    Change, ChangeWave, Coordinator, CoordinatorConfig, DuplexId, FieldPath, Origin, Patch,
    PatchEntry, RemoteOutcome, ReplicaContext, Transaction, TransactionId,
};
use braid_core::RegisterPatch;
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

fn path(field: &str) -> FieldPath {
    FieldPath::new("docs", "d1", field)
}

fn register_tx(store_id: u32, version: u64, field: &str, value: Value) -> Transaction {
    Transaction {
        id: TransactionId::new(),
        store_id,
        version,
        patches: vec![PatchEntry::new(
            &path(field),
            Patch::Register(RegisterPatch {
                id: DuplexId::new(version, store_id),
                value,
            }),
        )],
    }
}

fn snapshot(c: &Coordinator) -> Vec<(FieldPath, Value)> {
    c.registry().fields().map(|(p, f)| (p, f.value())).collect()
}

fn exchange(a: &mut Coordinator, b: &mut Coordinator) {
    let from_a = a.drain_outbox();
    let from_b = b.drain_outbox();
    for tx in &from_b {
        a.apply_remote(tx).unwrap();
    }
    for tx in &from_a {
        b.apply_remote(tx).unwrap();
    }
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_register_lww_either_order() {
    let high = register_tx(1, 5, "title", json!("from store 1"));
    let low = register_tx(2, 3, "title", json!("from store 2"));

    let mut a = Coordinator::with_store_id(7);
    a.apply_remote(&high).unwrap();
    a.apply_remote(&low).unwrap();

    let mut b = Coordinator::with_store_id(8);
    b.apply_remote(&low).unwrap();
    b.apply_remote(&high).unwrap();

    assert_eq!(a.value(&path("title")), Some(json!("from store 1")));
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn test_equal_version_tie_break_on_store_id() {
    let initial = register_tx(0, 0, "count", json!(0));
    let mut one = Coordinator::with_store_id(1);
    let mut two = Coordinator::with_store_id(2);
    one.apply_remote(&initial).unwrap();
    two.apply_remote(&initial).unwrap();

    let local = one.transact(|c| c.set(&path("count"), 5)).unwrap().unwrap();
    let remote = two.transact(|c| c.set(&path("count"), 7)).unwrap().unwrap();
    assert_eq!(local.duplex_id(), DuplexId::new(1, 1));
    assert_eq!(remote.duplex_id(), DuplexId::new(1, 2));

    exchange(&mut one, &mut two);
    assert_eq!(one.value(&path("count")), Some(json!(7)));
    assert_eq!(two.value(&path("count")), Some(json!(7)));
}

#[test]
fn test_concurrent_insert_and_remove() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    a.transact(|c| c.splice_text(&path("body"), 0, 0, "abcde")).unwrap();
    exchange(&mut a, &mut b);

    a.transact(|c| c.splice_text(&path("body"), 2, 0, "X")).unwrap();
    b.transact(|c| c.splice_text(&path("body"), 2, 1, "")).unwrap();
    exchange(&mut a, &mut b);

    assert_eq!(a.text(&path("body")), b.text(&path("body")));
    assert_eq!(a.text(&path("body")).as_deref(), Some("abXde"));
}

#[test]
fn test_concurrent_inserts_at_same_index() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    a.transact(|c| c.splice_list(&path("items"), 0, 0, vec![json!(1), json!(4)]))
        .unwrap();
    exchange(&mut a, &mut b);

    a.transact(|c| c.splice_list(&path("items"), 1, 0, vec![json!("a")]))
        .unwrap();
    b.transact(|c| c.splice_list(&path("items"), 1, 0, vec![json!("b")]))
        .unwrap();
    exchange(&mut a, &mut b);

    let items = a.value(&path("items")).unwrap();
    assert_eq!(Some(items.clone()), b.value(&path("items")));
    let items = items.as_array().unwrap().clone();
    assert_eq!(items.len(), 4);
    assert_eq!(items[0], json!(1));
    assert_eq!(items[3], json!(4));
}

#[test]
fn test_redelivery_is_idempotent() {
    let mut author = Coordinator::with_store_id(1);
    let tx = author
        .transact(|c| {
            c.set(&path("title"), "t")?;
            c.set_key(&path("tags"), "k", true)?;
            c.splice_text(&path("body"), 0, 0, "hi")
        })
        .unwrap()
        .unwrap();

    let mut once = Coordinator::with_store_id(2);
    once.apply_remote(&tx).unwrap();
    assert_eq!(once.apply_remote(&tx).unwrap(), RemoteOutcome::Duplicate);

    // Without the seen-id set the fields themselves still absorb replays.
    let config = CoordinatorConfig {
        track_seen: false,
        ..CoordinatorConfig::default()
    };
    let mut forgetful = Coordinator::new(ReplicaContext::new(3), config);
    for _ in 0..3 {
        let outcome = forgetful.apply_remote(&tx).unwrap();
        assert_eq!(outcome, RemoteOutcome::Applied { fields: 3 });
    }

    assert_eq!(snapshot(&once), snapshot(&author));
    assert_eq!(snapshot(&forgetful), snapshot(&author));
}

#[test]
fn test_transaction_is_one_wave() {
    let mut a = Coordinator::with_store_id(1);
    let tx = a
        .transact(|c| {
            c.set(&path("title"), "Plan")?;
            c.set_key(&path("tags"), "urgent", true)?;
            c.splice_list(&path("items"), 0, 0, vec![json!("milk")])
        })
        .unwrap()
        .unwrap();

    let mut b = Coordinator::with_store_id(2);
    let waves: Arc<Mutex<Vec<ChangeWave>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = waves.clone();
    let observed = Arc::new(Mutex::new(Vec::new()));
    let seen_by_observer = observed.clone();
    b.subscribe(Box::new(move |wave| {
        seen_by_observer.lock().unwrap().push(wave.events.len());
        sink.lock().unwrap().push(wave.clone());
    }));
    b.apply_remote(&tx).unwrap();

    let waves = waves.lock().unwrap();
    assert_eq!(waves.len(), 1);
    assert_eq!(waves[0].transaction_id, tx.id);
    assert_eq!(*observed.lock().unwrap(), vec![3]);
    assert!(matches!(waves[0].get(&path("tags")), Some(Change::Map(_))));
    assert!(matches!(waves[0].get(&path("items")), Some(Change::List(_))));
}

#[test]
fn test_undo_with_concurrent_remote_edit() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);

    a.transact(|c| c.set_key(&path("tags"), "a", 1)).unwrap();
    b.transact(|c| c.set_key(&path("tags"), "b", 2)).unwrap();
    exchange(&mut a, &mut b);
    assert_eq!(a.value(&path("tags")), Some(json!({"a": 1, "b": 2})));

    // Undo is a new forward write, so it never disturbs the other key.
    a.undo().unwrap().unwrap();
    exchange(&mut a, &mut b);
    assert_eq!(a.value(&path("tags")), Some(json!({"b": 2})));
    assert_eq!(b.value(&path("tags")), Some(json!({"b": 2})));

    let redo = a.redo().unwrap().unwrap();
    assert!(redo.version > 2);
    exchange(&mut a, &mut b);
    assert_eq!(a.value(&path("tags")), Some(json!({"a": 1, "b": 2})));
    assert_eq!(snapshot(&a), snapshot(&b));
}

#[test]
fn test_undo_after_concurrent_removal_degrades_gracefully() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    a.transact(|c| c.splice_text(&path("body"), 0, 0, "hello")).unwrap();
    exchange(&mut a, &mut b);

    a.transact(|c| c.splice_text(&path("body"), 5, 0, " world")).unwrap();
    exchange(&mut a, &mut b);
    b.transact(|c| c.splice_text(&path("body"), 5, 6, "!")).unwrap();

    // A undoes its insert without having seen B's removal.
    a.undo().unwrap().unwrap();
    exchange(&mut a, &mut b);

    assert_eq!(a.text(&path("body")), b.text(&path("body")));
    assert_eq!(a.text(&path("body")).as_deref(), Some("hello!"));
}

#[test]
fn test_undo_origin_is_reported() {
    let mut a = Coordinator::with_store_id(1);
    let origins = Arc::new(Mutex::new(Vec::new()));
    let sink = origins.clone();
    a.subscribe(Box::new(move |wave| sink.lock().unwrap().push(wave.origin)));

    a.transact(|c| c.set(&path("title"), "x")).unwrap();
    a.undo().unwrap();
    a.redo().unwrap();

    assert_eq!(
        *origins.lock().unwrap(),
        vec![Origin::Local, Origin::Undo, Origin::Redo]
    );
    assert_eq!(a.value(&path("title")), Some(json!("x")));
}

#[test]
fn test_compaction_after_full_exchange() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    a.transact(|c| c.splice_text(&path("body"), 0, 0, "abcdef")).unwrap();
    exchange(&mut a, &mut b);
    b.transact(|c| c.splice_text(&path("body"), 1, 3, "")).unwrap();
    exchange(&mut a, &mut b);

    let stable = a.version().min(b.version());
    let dropped_a = a.compact(stable).unwrap().entries_dropped;
    let dropped_b = b.compact(stable).unwrap().entries_dropped;
    assert_eq!(dropped_a, 3);
    assert_eq!(dropped_a, dropped_b);

    // Editing continues normally on compacted state.
    a.transact(|c| c.splice_text(&path("body"), 1, 0, "Z")).unwrap();
    b.transact(|c| c.splice_text(&path("body"), 2, 0, "Y")).unwrap();
    exchange(&mut a, &mut b);
    assert_eq!(a.text(&path("body")), b.text(&path("body")));
    assert_eq!(a.text(&path("body")).unwrap().len(), 5);
}

#[test]
fn test_compaction_before_late_concurrent_inserts() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    let mut c = Coordinator::with_store_id(3);

    let base = a.transact(|c| c.splice_text(&path("body"), 0, 0, "ab")).unwrap().unwrap();
    b.apply_remote(&base).unwrap();
    c.apply_remote(&base).unwrap();
    a.drain_outbox();

    // Version 2 everywhere: a removes "b", b and c touch something else.
    let remove = a.transact(|c| c.splice_text(&path("body"), 1, 1, "")).unwrap().unwrap();
    let side_b = b.transact(|c| c.set(&path("n"), 1)).unwrap().unwrap();
    let side_c = c.transact(|c| c.set(&path("m"), 1)).unwrap().unwrap();
    b.apply_remote(&side_c).unwrap();
    c.apply_remote(&side_b).unwrap();

    // Version 3: both insert before hearing about the removal.
    let z = b.transact(|c| c.splice_text(&path("body"), 1, 0, "Z")).unwrap().unwrap();
    let y = c.transact(|c| c.splice_text(&path("body"), 2, 0, "Y")).unwrap().unwrap();
    assert_eq!((z.version, y.version), (3, 3));

    b.apply_remote(&remove).unwrap();
    c.apply_remote(&remove).unwrap();
    a.apply_remote(&side_b).unwrap();
    a.apply_remote(&side_c).unwrap();

    // Everything at version 2 has been applied everywhere.
    assert_eq!(a.compact(2).unwrap().entries_dropped, 1);
    for tx in [&z, &y] {
        a.apply_remote(tx).unwrap();
    }
    b.apply_remote(&y).unwrap();
    c.apply_remote(&z).unwrap();

    assert_eq!(snapshot(&a), snapshot(&b));
    assert_eq!(snapshot(&b), snapshot(&c));
    assert_eq!(a.text(&path("body")).unwrap().chars().count(), 3);
}

#[test]
fn test_concurrent_field_kinds_converge() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    let from_a = a
        .transact(|c| {
            c.set(&path("shared"), 1)?;
            c.set(&path("other"), "a")
        })
        .unwrap()
        .unwrap();
    let from_b = b
        .transact(|c| c.splice_text(&path("shared"), 0, 0, "hi"))
        .unwrap()
        .unwrap();

    exchange(&mut a, &mut b);

    assert_eq!(snapshot(&a), snapshot(&b));
    assert_eq!(b.value(&path("other")), Some(json!("a")));
    assert_eq!(a.value(&path("shared")), Some(json!("hi")));

    // A later write of the losing kind from a third replica takes over.
    let mut c = Coordinator::with_store_id(3);
    c.apply_remote(&from_b).unwrap();
    c.apply_remote(&from_a).unwrap();
    assert_eq!(snapshot(&c), snapshot(&a));
    let newer = register_tx(3, 9, "shared", json!(2));
    for replica in [&mut a, &mut b, &mut c] {
        replica.apply_remote(&newer).unwrap();
        assert_eq!(replica.value(&path("shared")), Some(json!(2)));
    }
}

#[test]
fn test_null_map_value_survives_the_wire() {
    let mut a = Coordinator::with_store_id(1);
    let mut b = Coordinator::with_store_id(2);
    let tx = a
        .transact(|c| {
            c.set_key(&path("tags"), "empty", Value::Null)?;
            c.set_key(&path("tags"), "kept", 1)
        })
        .unwrap()
        .unwrap();

    let decoded = Transaction::from_bytes(&tx.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded, tx);
    b.apply_remote(&decoded).unwrap();

    assert_eq!(a.value(&path("tags")), Some(json!({"empty": null, "kept": 1})));
    assert_eq!(b.value(&path("tags")), a.value(&path("tags")));

    let removal = b
        .transact(|c| c.remove_key(&path("tags"), "empty"))
        .unwrap()
        .unwrap();
    a.apply_remote(&Transaction::from_bytes(&removal.to_bytes().unwrap()).unwrap())
        .unwrap();
    assert_eq!(a.value(&path("tags")), Some(json!({"kept": 1})));
}

// ============================================================================
// Randomized delivery
// ============================================================================

const REPLICAS: usize = 3;

#[derive(Clone, Debug)]
enum Op {
    SetTitle(i64),
    SetTag(String, Option<i64>),
    EditBody(usize, usize, String),
    EditItems(usize, usize, Vec<i64>),
    Undo,
    Redo,
}

#[derive(Clone, Debug)]
enum Step {
    Local(usize, Vec<Op>),
    Sync(usize, usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0i64..50).prop_map(Op::SetTitle),
        ("[a-c]", prop::option::of(0i64..5)).prop_map(|(k, v)| Op::SetTag(k, v)),
        (0usize..10, 0usize..3, "[a-z]{0,4}").prop_map(|(i, r, t)| Op::EditBody(i, r, t)),
        (0usize..6, 0usize..2, prop::collection::vec(0i64..9, 0..3))
            .prop_map(|(i, r, v)| Op::EditItems(i, r, v)),
        Just(Op::Undo),
        Just(Op::Redo),
    ]
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        3 => (0..REPLICAS, prop::collection::vec(op_strategy(), 1..4))
            .prop_map(|(r, ops)| Step::Local(r, ops)),
        1 => (0..REPLICAS, 0..REPLICAS).prop_map(|(from, to)| Step::Sync(from, to)),
    ]
}

fn run_ops(c: &mut Coordinator, ops: &[Op]) {
    let edits: Vec<&Op> = ops
        .iter()
        .filter(|op| !matches!(op, Op::Undo | Op::Redo))
        .collect();
    if !edits.is_empty() {
        c.transact(|c| {
            for op in &edits {
                match op {
                    Op::SetTitle(v) => c.set(&path("title"), *v)?,
                    Op::SetTag(k, Some(v)) => c.set_key(&path("tags"), k, *v)?,
                    Op::SetTag(k, None) => c.remove_key(&path("tags"), k)?,
                    Op::EditBody(i, r, t) => c.splice_text(&path("body"), *i, *r, t)?,
                    Op::EditItems(i, r, v) => {
                        c.splice_list(&path("items"), *i, *r, v.iter().map(|n| json!(n)).collect())?
                    }
                    Op::Undo | Op::Redo => {}
                }
            }
            Ok(())
        })
        .unwrap();
    }
    for op in ops {
        match op {
            Op::Undo => {
                c.undo().unwrap();
            }
            Op::Redo => {
                c.redo().unwrap();
            }
            _ => {}
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn replicas_converge_under_any_delivery(
        steps in prop::collection::vec(step_strategy(), 1..25),
        seed in any::<u64>(),
    ) {
        let mut replicas: Vec<Coordinator> =
            (0..REPLICAS).map(|i| Coordinator::with_store_id(i as u32 + 1)).collect();
        let mut logs: Vec<Vec<Transaction>> = vec![Vec::new(); REPLICAS];
        let mut cursors = [[0usize; REPLICAS]; REPLICAS];

        for step in &steps {
            match step {
                Step::Local(r, ops) => {
                    run_ops(&mut replicas[*r], ops);
                    let committed = replicas[*r].drain_outbox();
                    logs[*r].extend(committed);
                }
                Step::Sync(from, to) => {
                    if from == to {
                        continue;
                    }
                    for tx in &logs[*from][cursors[*to][*from]..] {
                        replicas[*to].apply_remote(tx).unwrap();
                    }
                    cursors[*to][*from] = logs[*from].len();
                }
            }
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let everything: Vec<Transaction> = logs.iter().flatten().cloned().collect();
        for replica in replicas.iter_mut() {
            let mut delivery = everything.clone();
            delivery.extend(everything.iter().step_by(2).cloned());
            delivery.shuffle(&mut rng);
            for tx in &delivery {
                replica.apply_remote(tx).unwrap();
            }
        }

        let expected = snapshot(&replicas[0]);
        for replica in &replicas[1..] {
            prop_assert_eq!(snapshot(replica), expected.clone());
        }
    }
}
