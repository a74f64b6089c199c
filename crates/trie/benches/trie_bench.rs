//! Benchmarks for tree insertion, lookup, and compaction.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use cairn_trie::{MemStore, NodeCache, Tree};

fn key(i: u32) -> Vec<u8> {
    format!("bench/key/{i:08}").into_bytes()
}

fn val(i: u32) -> Vec<u8> {
    format!("value-{i:08}-{:016x}", u64::from(i).wrapping_mul(0x9e37_79b9_7f4a_7c15)).into_bytes()
}

fn populated(n: u32) -> Tree {
    let mut tree: Tree = Tree::empty();
    for i in 0..n {
        tree.add(key(i), val(i)).unwrap();
    }
    tree
}

fn bench_add(c: &mut Criterion) {
    c.bench_function("add_10k", |b| {
        b.iter(|| {
            let mut tree: Tree = Tree::empty();
            for i in 0..10_000 {
                tree.add(key(i), val(i)).unwrap();
            }
            black_box(tree)
        })
    });
}

fn bench_find(c: &mut Criterion) {
    let tree = populated(10_000);
    let mut store = MemStore::new();
    let cache = NodeCache::new(8 * 1024 * 1024);

    c.bench_function("find_in_memory", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            black_box(tree.try_find(&key(i), &mut store, &cache).unwrap())
        })
    });

    let mut compacted = tree.clone();
    compacted.compact(&mut store, &cache, 4096).unwrap();
    c.bench_function("find_through_remotes", |b| {
        let mut i = 0u32;
        b.iter(|| {
            i = (i + 7919) % 10_000;
            black_box(compacted.try_find(&key(i), &mut store, &cache).unwrap())
        })
    });
}

fn bench_compact(c: &mut Criterion) {
    c.bench_function("compact_10k", |b| {
        b.iter_with_setup(
            || (populated(10_000), MemStore::new(), NodeCache::new(8 * 1024 * 1024)),
            |(mut tree, mut store, cache)| {
                tree.compact(&mut store, &cache, 4096).unwrap();
                black_box(tree)
            },
        )
    });
}

criterion_group!(benches, bench_add, bench_find, bench_compact);
criterion_main!(benches);
