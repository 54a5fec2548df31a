//! Offset store properties

use lagwatch::store::OffsetStore;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

proptest! {
    #[test]
    fn prop_final_offset_is_last_commit(
        commits in proptest::collection::vec((0usize..3, 0i32..3, any::<u64>()), 1..200),
    ) {
        let groups = ["a", "b", "c"];
        let store = OffsetStore::default();
        let mut expected = HashMap::new();
        for (group, partition, offset) in &commits {
            store.record_consumer_offset(groups[*group], "t", *partition, *offset);
            expected.insert((groups[*group], *partition), *offset);
        }

        for ((group, partition), offset) in expected {
            prop_assert_eq!(store.consumer_offset(group, "t", partition), Some(offset));
        }
    }

    #[test]
    fn prop_high_water_notifies_only_on_change(
        offsets in proptest::collection::vec(0u64..4, 1..50),
    ) {
        let store = OffsetStore::default();
        store.enable_notifications();
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = fired.clone();
        store.on_topic_update("t", move |update| sink.lock().push(update.offset));

        let mut expected = Vec::new();
        let mut previous = None;
        for offset in &offsets {
            store.record_topic_offset("t", 0, *offset);
            if previous != Some(*offset) {
                expected.push(*offset);
            }
            previous = Some(*offset);
        }

        prop_assert_eq!(&*fired.lock(), &expected);
        prop_assert_eq!(store.topic_offset("t", 0), offsets.last().copied());
    }
}

#[test]
fn test_concurrent_writers_keep_per_key_order() {
    let store = Arc::new(OffsetStore::default());
    let handles: Vec<_> = (0..4)
        .map(|writer| {
            let store = store.clone();
            thread::spawn(move || {
                let group = format!("group-{}", writer);
                for offset in 0..=1_000u64 {
                    store.record_consumer_offset(&group, "t", (offset % 4) as i32, offset);
                    store.record_topic_offset("t", writer, offset);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for writer in 0..4 {
        let group = format!("group-{}", writer);
        assert_eq!(store.consumer_offset(&group, "t", 0), Some(1_000));
        assert_eq!(store.consumer_offset(&group, "t", 3), Some(999));
        assert_eq!(store.topic_offset("t", writer), Some(1_000));
    }
    assert_eq!(store.known_consumers().len(), 4);
}
