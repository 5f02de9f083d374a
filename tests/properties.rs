//! Exactly-once release and generation isolation under random operation
//! sequences.

mod helpers;

use helpers::*;
use holdfast::prelude::*;
use holdfast::RetainedResource;
use proptest::prelude::*;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Op {
    Create,
    Retain(usize),
    Free(usize),
    ReleaseAll(usize),
    CancelLast,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Create),
        3 => (0usize..8).prop_map(Op::Retain),
        2 => (0usize..8).prop_map(Op::Free),
        1 => (0usize..8).prop_map(Op::ReleaseAll),
        1 => Just(Op::CancelLast),
    ]
}

struct Tracked {
    count: Arc<AtomicUsize>,
    generation: u64,
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn every_resource_released_exactly_once(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let (engine, holdfast) = mock_holdfast();
        let mut live: Vec<NativeHandle> = Vec::new();
        let mut tracked: Vec<Tracked> = Vec::new();
        let mut cancelled: Vec<(Arc<AtomicUsize>, Arc<dyn RetainedResource>)> = Vec::new();
        let mut last_id = None;

        for op in ops {
            match op {
                Op::Create => {
                    let handle = holdfast
                        .create_callback_stream(44_100, 2, 0, |_, buf| StreamStatus::Written(buf.len()))
                        .unwrap();
                    prop_assert!(!live.contains(&handle));
                    live.push(handle);
                }
                Op::Retain(i) if !live.is_empty() => {
                    let handle = live[i % live.len()];
                    let (count, resource) = Counted::new();
                    let id = holdfast.bridge().retain(handle, resource).unwrap();
                    tracked.push(Tracked { count, generation: id.generation().get() });
                    last_id = Some((id, tracked.len() - 1));
                }
                Op::Free(i) if !live.is_empty() => {
                    let handle = live.swap_remove(i % live.len());
                    holdfast.free(handle).unwrap();
                    prop_assert!(!holdfast.registry().is_live(handle));
                }
                Op::ReleaseAll(i) if !live.is_empty() => {
                    // Early release; the later free notification must not repeat it
                    let handle = live[i % live.len()];
                    holdfast.registry().release_all(handle);
                }
                Op::CancelLast => {
                    if let Some((id, index)) = last_id.take() {
                        if let Some(resource) = holdfast.registry().cancel(&id) {
                            let count = Arc::clone(&tracked[index].count);
                            cancelled.push((count, resource));
                        }
                    }
                }
                _ => {}
            }

            for t in &tracked {
                prop_assert!(releases(&t.count) <= 1, "generation {} released twice", t.generation);
            }
        }

        engine.free_all();
        prop_assert!(holdfast.registry().is_empty());

        for t in &tracked {
            let was_cancelled = cancelled.iter().any(|(c, _)| Arc::ptr_eq(c, &t.count));
            let expected = if was_cancelled { 0 } else { 1 };
            prop_assert_eq!(releases(&t.count), expected);
        }

        // Cancelled resources belong to the caller again
        for (count, resource) in &cancelled {
            resource.release();
            prop_assert_eq!(releases(count), 1);
        }
    }

    #[test]
    fn freed_generation_never_touches_reused_value(rounds in 1usize..20) {
        let (engine, holdfast) = mock_holdfast();
        let mut previous: Vec<Arc<AtomicUsize>> = Vec::new();

        for _ in 0..rounds {
            let handle = holdfast
                .create_callback_stream(44_100, 1, 0, |_, buf| StreamStatus::End(buf.len()))
                .unwrap();
            prop_assert_eq!(handle, NativeHandle(1));

            let (count, resource) = Counted::new();
            holdfast.bridge().retain(handle, resource).unwrap();
            prop_assert_eq!(holdfast.registry().resource_count(handle), 2);

            engine.destroy(handle);
            prop_assert_eq!(releases(&count), 1);
            for old in &previous {
                prop_assert_eq!(releases(old), 1);
            }
            previous.push(count);
        }
    }
}
