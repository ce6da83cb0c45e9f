//! Close/reopen behavior: observable state must survive a clean shutdown
//! byte for byte, including the free list and the root image in the
//! sidecar.

use pairtree::BPlusTree;

fn path(dir: &tempfile::TempDir) -> std::path::PathBuf {
    dir.path().join("store")
}

fn open_tree(dir: &tempfile::TempDir) -> BPlusTree<u64, u32> {
    BPlusTree::builder(path(dir))
        .block_size(16)
        .cache_size(16)
        .open()
        .unwrap()
}

#[test]
fn thousand_pairs_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();

    let before: Vec<Vec<u32>> = {
        let mut tree = open_tree(&dir);
        for i in 0..1000u64 {
            tree.insert(&(i % 250), &(i as u32)).unwrap();
        }
        let snapshot = (0..250u64).map(|k| tree.find(&k).unwrap()).collect();
        tree.close().unwrap();
        snapshot
    };

    let tree = open_tree(&dir);
    tree.check().unwrap();
    for k in 0..250u64 {
        assert_eq!(tree.find(&k).unwrap(), before[k as usize], "key {}", k);
    }
}

#[test]
fn fresh_store_reopens_empty() {
    let dir = tempfile::tempdir().unwrap();
    {
        let tree = open_tree(&dir);
        assert!(tree.is_empty());
        tree.close().unwrap();
    }

    let tree = open_tree(&dir);
    assert!(tree.is_empty());
    assert!(tree.find(&0).unwrap().is_empty());
}

#[test]
fn erases_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut tree = open_tree(&dir);
        for i in 0..200u64 {
            tree.insert(&i, &1).unwrap();
        }
        for i in (0..200u64).step_by(2) {
            tree.erase(&i, &1).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = open_tree(&dir);
    tree.check().unwrap();
    for i in 0..200u64 {
        let expected: Vec<u32> = if i % 2 == 0 { vec![] } else { vec![1] };
        assert_eq!(tree.find(&i).unwrap(), expected);
    }
}

#[test]
fn free_list_survives_reopen_and_is_reused() {
    let dir = tempfile::tempdir().unwrap();
    let pages = {
        let mut tree = open_tree(&dir);
        for i in 0..500u64 {
            tree.insert(&i, &0).unwrap();
        }
        for i in 0..500u64 {
            tree.erase(&i, &0).unwrap();
        }
        let pages = tree.page_count();
        tree.close().unwrap();
        pages
    };

    let mut tree = open_tree(&dir);
    assert_eq!(tree.page_count(), pages);

    // Refilling must reuse recycled pages instead of growing the file.
    for i in 0..500u64 {
        tree.insert(&i, &0).unwrap();
    }
    assert_eq!(tree.page_count(), pages);
    tree.check().unwrap();
}

#[test]
fn emptied_store_reopens_as_fresh() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut tree = open_tree(&dir);
        for i in 0..100u64 {
            tree.insert(&i, &7).unwrap();
        }
        for i in 0..100u64 {
            tree.erase(&i, &7).unwrap();
        }
        assert!(tree.is_empty());
        tree.close().unwrap();
    }

    // A store emptied by erases must accept inserts like a new one.
    let mut tree = open_tree(&dir);
    assert!(tree.is_empty());
    tree.insert(&5, &50).unwrap();
    assert_eq!(tree.find(&5).unwrap(), vec![50]);
    tree.check().unwrap();
}

#[test]
fn drop_without_close_still_flushes() {
    let dir = tempfile::tempdir().unwrap();
    {
        let mut tree = open_tree(&dir);
        tree.insert(&1, &11).unwrap();
        // Dropped without an explicit close.
    }

    let tree = open_tree(&dir);
    assert_eq!(tree.find(&1).unwrap(), vec![11]);
}

#[test]
fn multiple_close_open_cycles_accumulate() {
    let dir = tempfile::tempdir().unwrap();

    for round in 0..5u64 {
        let mut tree = open_tree(&dir);
        for i in 0..50u64 {
            tree.insert(&(round * 50 + i), &(round as u32)).unwrap();
        }
        tree.close().unwrap();
    }

    let tree = open_tree(&dir);
    tree.check().unwrap();
    for round in 0..5u64 {
        for i in 0..50u64 {
            assert_eq!(tree.find(&(round * 50 + i)).unwrap(), vec![round as u32]);
        }
    }
}
