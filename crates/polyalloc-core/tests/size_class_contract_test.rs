use polyalloc_core::{
    AllocPolicy, CLASSES, FALLBACK, FixedPool, LocalRouter, MappingError, SizeClassMap,
    SystemPolicy, Tracked,
};

type Router = LocalRouter<FixedPool, Tracked<SystemPolicy>>;

#[test]
fn reference_classification_at_base_eight() {
    let map = SizeClassMap::with_base_size(8).unwrap();
    let cases = [(1, 0), (8, 0), (9, 1), (33, 5), (256, 31), (257, 32)];
    for (size, class) in cases {
        assert_eq!(map.classify(size), class, "size {size}");
    }
    assert_eq!(FALLBACK, CLASSES);
}

#[test]
fn classification_is_monotonic_for_every_base() {
    for base in [1usize, 4, 8, 16, 24, 64] {
        let map = SizeClassMap::with_base_size(base).unwrap();
        let mut prev = 0;
        for size in 1..=(map.max_fixed_size() + 4 * base) {
            let class = map.classify(size);
            assert!(class >= prev, "base {base}, size {size}: {class} < {prev}");
            if class != FALLBACK {
                assert!(map.class_size(class).unwrap() >= size);
            }
            prev = class;
        }
    }
}

#[test]
fn router_serves_every_size_with_intact_contents() {
    let map = SizeClassMap::with_base_size(8).unwrap();
    let router = Router::with_own_family(map);
    let sizes: Vec<usize> = (1..=map.max_fixed_size() + 64).collect();

    let blocks: Vec<_> = sizes
        .iter()
        .map(|&size| {
            let ptr = router.alloc(size).unwrap();
            // SAFETY: fresh block of `size` bytes.
            unsafe { ptr.as_ptr().write_bytes((size % 251) as u8, size) };
            (ptr, size)
        })
        .collect();

    for &(ptr, size) in &blocks {
        for off in [0, size / 2, size - 1] {
            // SAFETY: block still live.
            assert_eq!(unsafe { *ptr.as_ptr().add(off) }, (size % 251) as u8);
        }
    }
    assert_eq!(router.fallback().stats().live_blocks, 64);

    for (ptr, size) in blocks {
        // SAFETY: allocated above with this size.
        unsafe { router.free(ptr, size) };
    }
    assert!(router.fallback().stats().is_balanced());
    for (_, pool) in router.family().iter() {
        assert_eq!(pool.stats().outstanding(), 0);
    }

    router.clear();
    assert!(router.family().iter().all(|(_, pool)| pool.stats().chunks == 0));
}

static SPARSE: [usize; CLASSES] = {
    let mut table = [FALLBACK; CLASSES];
    let mut i = 0;
    while i < 8 {
        table[i] = 7;
        i += 1;
    }
    table
};

#[test]
fn custom_table_routes_to_its_own_classes() {
    let map = SizeClassMap::new(16, &SPARSE).unwrap();
    assert_eq!(map.classes().collect::<Vec<_>>(), vec![7]);

    let router = Router::with_own_family(map);
    assert_eq!(router.family().len(), 1);
    let small = router.alloc(1).unwrap();
    let top = router.alloc(128).unwrap();
    let over = router.alloc(129).unwrap();
    assert_eq!(router.family().pool(7).unwrap().stats().carved, 2);
    assert_eq!(router.fallback().stats().live_blocks, 1);
    // SAFETY: allocated above with these sizes.
    unsafe {
        router.free(small, 1);
        router.free(top, 128);
        router.free(over, 129);
    }
}

static DESCENDING: [usize; CLASSES] = {
    let mut table = [FALLBACK; CLASSES];
    table[0] = 3;
    table[1] = 2;
    table
};

#[test]
fn invalid_tables_are_rejected() {
    assert_eq!(
        SizeClassMap::new(8, &DESCENDING),
        Err(MappingError::Decreasing {
            index: 1,
            prev: 3,
            next: 2
        })
    );
    assert!(SizeClassMap::with_base_size(0).is_err());
}
