//! End-to-end behavior of the public tree API: the driver-protocol
//! scenarios, duplicate and absent-pair handling, multiset ordering, and
//! the algebraic laws observable through `find`.

use pairtree::{BPlusTree, FixedStr};

type Key = FixedStr<68>;

fn key(s: &str) -> Key {
    Key::new(s).unwrap()
}

fn open_tree(dir: &tempfile::TempDir) -> BPlusTree<Key, i32> {
    BPlusTree::builder(dir.path().join("store"))
        .block_size(16)
        .cache_size(16)
        .open()
        .unwrap()
}

#[test]
fn values_for_one_key_print_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    tree.insert(&key("apple"), &1).unwrap();
    tree.insert(&key("apple"), &2).unwrap();

    assert_eq!(tree.find(&key("apple")).unwrap(), vec![1, 2]);
}

#[test]
fn duplicate_insert_then_single_erase_leaves_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    tree.insert(&key("a"), &5).unwrap();
    tree.insert(&key("a"), &5).unwrap();
    tree.erase(&key("a"), &5).unwrap();

    assert!(tree.find(&key("a")).unwrap().is_empty());
    assert!(tree.is_empty());
}

#[test]
fn present_and_absent_keys() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    tree.insert(&key("b"), &1).unwrap();
    tree.insert(&key("a"), &1).unwrap();
    tree.insert(&key("c"), &1).unwrap();

    assert_eq!(tree.find(&key("b")).unwrap(), vec![1]);
    assert!(tree.find(&key("d")).unwrap().is_empty());
}

#[test]
fn insert_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    for _ in 0..3 {
        tree.insert(&key("x"), &9).unwrap();
    }
    assert_eq!(tree.find(&key("x")).unwrap(), vec![9]);
    tree.check().unwrap();
}

#[test]
fn insert_then_erase_restores_observable_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    let keys = ["alpha", "bravo", "charlie", "delta"];
    for (i, k) in keys.iter().enumerate() {
        tree.insert(&key(k), &(i as i32)).unwrap();
    }
    let before: Vec<Vec<i32>> = keys.iter().map(|k| tree.find(&key(k)).unwrap()).collect();

    tree.insert(&key("echo"), &99).unwrap();
    tree.erase(&key("echo"), &99).unwrap();

    let after: Vec<Vec<i32>> = keys.iter().map(|k| tree.find(&key(k)).unwrap()).collect();
    assert_eq!(before, after);
    assert!(tree.find(&key("echo")).unwrap().is_empty());
}

#[test]
fn find_returns_exactly_the_surviving_values() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    for v in 0..50 {
        tree.insert(&key("k"), &v).unwrap();
    }
    for v in (0..50).step_by(2) {
        tree.erase(&key("k"), &v).unwrap();
    }

    let expected: Vec<i32> = (0..50).filter(|v| v % 2 == 1).collect();
    assert_eq!(tree.find(&key("k")).unwrap(), expected);
}

#[test]
fn find_if_applies_the_predicate() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    for v in 0..30 {
        tree.insert(&key("k"), &v).unwrap();
    }

    let big = tree.find_if(&key("k"), |v| *v >= 25).unwrap();
    assert_eq!(big, vec![25, 26, 27, 28, 29]);

    let none = tree.find_if(&key("k"), |_| false).unwrap();
    assert!(none.is_empty());
}

#[test]
fn values_spanning_multiple_leaves_stay_ordered() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    // Far more values than one 16-slot leaf holds.
    for v in (0..200).rev() {
        tree.insert(&key("hot"), &v).unwrap();
    }
    tree.insert(&key("aaa"), &-1).unwrap();
    tree.insert(&key("zzz"), &-2).unwrap();

    let expected: Vec<i32> = (0..200).collect();
    assert_eq!(tree.find(&key("hot")).unwrap(), expected);
    assert_eq!(tree.find(&key("aaa")).unwrap(), vec![-1]);
    assert_eq!(tree.find(&key("zzz")).unwrap(), vec![-2]);
    tree.check().unwrap();
}

#[test]
fn cursor_starts_at_first_key_not_below() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);

    for k in ["ant", "bee", "cat", "dog", "eel"] {
        tree.insert(&key(k), &1).unwrap();
    }

    let mut cursor = tree.cursor(&key("bx")).unwrap();
    let mut seen = Vec::new();
    while cursor.valid() {
        seen.push(cursor.key().unwrap().as_str().to_string());
        cursor.advance().unwrap();
    }
    assert_eq!(seen, vec!["cat", "dog", "eel"]);
}

#[test]
fn mixed_workload_matches_a_model() {
    let dir = tempfile::tempdir().unwrap();
    let mut tree = open_tree(&dir);
    let mut model: std::collections::BTreeSet<(String, i32)> = Default::default();

    let ops: Vec<(u8, String, i32)> = (0..600)
        .map(|i| {
            let k = format!("key{:02}", i % 37);
            let v = (i * 7 % 23) as i32;
            ((i % 3) as u8, k, v)
        })
        .collect();

    for (op, k, v) in &ops {
        if *op == 2 {
            tree.erase(&key(k), v).unwrap();
            model.remove(&(k.clone(), *v));
        } else {
            tree.insert(&key(k), v).unwrap();
            model.insert((k.clone(), *v));
        }
    }

    for i in 0..37 {
        let k = format!("key{:02}", i);
        let expected: Vec<i32> = model
            .iter()
            .filter(|(mk, _)| *mk == k)
            .map(|(_, v)| *v)
            .collect();
        assert_eq!(tree.find(&key(&k)).unwrap(), expected, "key {}", k);
    }
    tree.check().unwrap();
}
