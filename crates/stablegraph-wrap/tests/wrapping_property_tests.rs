use proptest::prelude::*;
use stablegraph_store::{GraphStore, MemoryStore, PropertyContainer};
use stablegraph_wrap::{ContextConfig, GraphContext, PropertyValue, Resolution, WrappedNode};
use std::collections::HashSet;

fn tag_strategy() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[x-z]{1,3}", 1..20)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn lazy_hits_preserve_order_and_count(tags in tag_strategy(), wanted in "[x-z]{1,3}") {
        let store = MemoryStore::new();
        let ctx = GraphContext::new(store.clone(), ContextConfig::default());
        let index = ctx.node_index("tags").unwrap();

        let mut expected = Vec::new();
        for tag in &tags {
            let node = ctx.create_node().unwrap();
            index.add(&node, "tag", tag.as_str()).unwrap();
            if *tag == wanted {
                expected.push(node);
            }
        }

        let hits = index.get("tag", wanted.as_str()).unwrap();
        prop_assert_eq!(hits.size(), expected.len());
        let seen: Vec<WrappedNode<MemoryStore>> = hits.collect();
        prop_assert_eq!(seen, expected);
        prop_assert_eq!(store.open_cursors(), 0);
    }

    #[test]
    fn lookup_wrappers_survive_repeated_promotion(
        values in prop::collection::vec(any::<i64>(), 1..12),
        promotions in 1usize..4,
    ) {
        let store = MemoryStore::new();
        let ctx = GraphContext::with_resolution(store.clone(), Resolution::Lookup);
        let nodes: Vec<_> = values
            .iter()
            .map(|value| {
                let node = ctx.create_node().unwrap();
                node.set_property("value", *value).unwrap();
                node
            })
            .collect();
        let before: HashSet<_> = nodes.iter().cloned().collect();

        let mut current = store;
        for _ in 0..promotions {
            current = current.failover();
            ctx.replace_store(current.clone()).unwrap();
        }

        for (node, value) in nodes.iter().zip(&values) {
            prop_assert_eq!(node.property("value").unwrap(), Some(PropertyValue::Int(*value)));
            let fresh = ctx.node_by_id(node.id()).unwrap();
            prop_assert!(before.contains(&fresh));
            prop_assert_eq!(
                ctx.unwrap(node).unwrap().property("value").unwrap(),
                Some(PropertyValue::Int(*value))
            );
        }
        prop_assert_eq!(current.instance_id(), ctx.store().unwrap().instance_id());
    }
}
