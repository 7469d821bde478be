//! Property tests for key canonicalization through the public cache API.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use memocache_test_utils::assertions::assert_key_bounded;
use memocache_test_utils::generators::{
    arb_filter_map, arb_key_policy, arb_max_hash_key_len, arb_namespace, arb_user_query,
};
use memocache_test_utils::{HashBucket, KeyCanonicalizer, KeyPolicy, MemoCache, MemoryStore};
use proptest::prelude::*;

fn canonicalizer(policy: KeyPolicy) -> KeyCanonicalizer {
    KeyCanonicalizer::new(policy).expect("generated policy should be valid")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Property: equal namespace and arguments give identical keys, even
    /// across independently built canonicalizers.
    #[test]
    fn prop_keys_are_deterministic(
        policy in arb_key_policy(),
        args in arb_user_query(),
    ) {
        let first = canonicalizer(policy.clone()).canonicalize(&args).expect("canonicalize");
        let second = canonicalizer(policy).canonicalize(&args).expect("canonicalize");
        prop_assert_eq!(first, second);
    }

    /// Property: the key body never exceeds max(L, hex_len) and is exactly
    /// hex_len when hashed.
    #[test]
    fn prop_key_length_is_bounded(
        namespace in arb_namespace(),
        max in arb_max_hash_key_len(),
        args in arb_user_query(),
    ) {
        let keys = canonicalizer(KeyPolicy::new(namespace.clone()).with_max_hash_key_len(max));
        let key = keys.canonicalize(&args).expect("canonicalize");
        assert_key_bounded(&key, &namespace, max);

        let raw = canonicalizer(KeyPolicy::new(namespace.clone()))
            .canonicalize(&args)
            .expect("canonicalize");
        let raw_body_len = raw.len() - namespace.len();
        if max > 0 && raw_body_len > max {
            prop_assert_eq!(
                key.len() - namespace.len(),
                HashBucket::for_limit(max).hex_len()
            );
        } else {
            prop_assert_eq!(key, raw);
        }
    }

    /// Property: map arguments are independent of insertion order.
    #[test]
    fn prop_map_order_is_irrelevant(
        namespace in arb_namespace(),
        filters in arb_filter_map(),
    ) {
        let keys = canonicalizer(KeyPolicy::new(namespace));

        let forward: HashMap<String, i64> = filters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        let mut backward: HashMap<String, i64> = HashMap::new();
        for (k, v) in filters.iter().rev() {
            backward.insert(k.clone(), *v);
        }

        let a = keys.canonicalize(&(&forward,)).expect("canonicalize");
        let b = keys.canonicalize(&(&backward,)).expect("canonicalize");
        let c = keys.canonicalize(&(&filters,)).expect("canonicalize");
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(&a, &c);
    }

    /// Property: distinct argument tuples give distinct unhashed keys.
    #[test]
    fn prop_distinct_args_distinct_keys(
        namespace in arb_namespace(),
        a in arb_user_query(),
        b in arb_user_query(),
    ) {
        prop_assume!(a != b);
        let keys = canonicalizer(KeyPolicy::new(namespace));
        prop_assert_ne!(
            keys.canonicalize(&a).expect("canonicalize"),
            keys.canonicalize(&b).expect("canonicalize")
        );
    }
}

#[test]
fn test_cache_keys_match_canonicalizer() {
    let cache = MemoCache::builder("search")
        .store(Arc::new(MemoryStore::new()))
        .max_hash_key_len(32)
        .build()
        .expect("cache should build");
    let keys = canonicalizer(KeyPolicy::new("search").with_max_hash_key_len(32));

    let mut filters = BTreeMap::new();
    filters.insert("status".to_string(), 1i64);
    filters.insert("owner".to_string(), 42i64);
    let args = ("orders", &filters, 25u32);

    assert_eq!(
        cache.key_for(&args).expect("key"),
        keys.canonicalize(&args).expect("key")
    );
}

#[test]
fn test_arity_and_order_are_part_of_identity() {
    let keys = canonicalizer(KeyPolicy::new("f"));
    let pair = keys.canonicalize(&(1, 2)).expect("key");
    let swapped = keys.canonicalize(&(2, 1)).expect("key");
    let triple = keys.canonicalize(&(1, 2, 0)).expect("key");
    let single = keys.canonicalize(&(12,)).expect("key");

    assert_ne!(pair, swapped);
    assert_ne!(pair, triple);
    assert_ne!(pair, single);
}

#[test]
fn test_string_and_number_do_not_collide() {
    let keys = canonicalizer(KeyPolicy::new("f"));
    assert_ne!(
        keys.canonicalize(&("1",)).expect("key"),
        keys.canonicalize(&(1,)).expect("key")
    );
}
