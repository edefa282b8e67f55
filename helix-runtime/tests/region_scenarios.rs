//! End-to-end region scenarios.
//!
//! Each test drives the runtime the way compiled programs do: enter a
//! region, allocate, spawn, and exit, checking the observable contract.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use helix_runtime::recovery;
use helix_runtime::{
    region_min, region_min_all, run_root, with_region, with_region_config, FatPtr, Region, RegionScoped,
    RuntimeConfig, RuntimeError, RuntimeResult,
};

fn config_with_capacity(bytes: usize) -> RuntimeConfig {
    RuntimeConfig::builder()
        .initial_frame_capacity(bytes)
        .build()
        .unwrap()
}

#[test]
fn small_first_frame_grows_by_doubling() {
    let region = Region::enter_with(&config_with_capacity(8));

    let first = region.alloc(10).unwrap();
    let second = region.alloc(10).unwrap();
    unsafe {
        std::ptr::write_bytes(first.as_ptr(), 1, 10);
        std::ptr::write_bytes(second.as_ptr(), 2, 10);
    }

    let caps = region.frame_capacities();
    assert_eq!(caps.len(), 2);
    assert!(caps[1] >= 10, "first frame holds the first request");
    assert_eq!(caps[0], caps[1] * 2);

    let first = unsafe { std::slice::from_raw_parts(first.as_ptr(), 10) };
    assert!(first.iter().all(|&b| b == 1));
    region.exit().unwrap();
}

#[test]
fn join_of_depth_zero_and_one_is_outer() {
    thread::spawn(|| {
        let outer = Region::enter();
        assert_eq!(outer.depth(), 0);
        let inner = Region::enter();
        assert_eq!(inner.depth(), 1);

        assert_eq!(region_min(outer.handle(), inner.handle()), outer.handle());
        assert_eq!(region_min(&inner, &outer).handle(), outer.handle());

        inner.exit().unwrap();
        outer.exit().unwrap();
    })
    .join()
    .unwrap();
}

#[test]
fn exit_blocks_until_sleeping_tasks_finish() {
    let region = Region::enter();
    let done = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    for _ in 0..2 {
        let done = done.clone();
        region
            .spawn(
                move |_, _: ()| {
                    thread::sleep(Duration::from_millis(50));
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                },
                (),
            )
            .unwrap();
    }
    assert_eq!(region.outstanding_tasks(), 2);

    region.exit().unwrap();
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(done.load(Ordering::SeqCst), 2);
}

#[test]
fn captured_slots_readable_after_task_join() {
    let parent = Region::enter();
    let slots = parent.alloc_array(2, 0u64).unwrap();

    let joined = with_region(|spawner| {
        for i in 0..2i64 {
            spawner.spawn(
                move |_, slot: FatPtr<u64>| {
                    thread::sleep(Duration::from_millis(30));
                    unsafe { slot.write(i as u64 + 1) }
                },
                slots.get(i)?,
            )?;
        }
        Ok(())
    });
    joined.unwrap();

    assert_eq!(unsafe { slots.to_vec() }, Ok(vec![1, 2]));
    parent.exit().unwrap();
}

#[test]
fn index_five_fails_and_four_succeeds() {
    let result = run_root(|region| {
        let array = region.alloc_slice(&[1i32, 2, 3, 4, 5])?;
        assert_eq!(unsafe { array.load(4) }?, 5);
        unsafe { array.load(5) }
    });

    let report = result.unwrap_err();
    assert_eq!(report.kind(), "index_out_of_bounds");
    assert!(report.message().contains("index 5"));
}

#[test]
fn use_after_exit_is_detected() {
    let escaped = with_region(|region| region.alloc_value(9u16)).unwrap();
    assert!(!escaped.is_live());
    let err = unsafe { escaped.read() }.unwrap_err();
    assert!(matches!(err, RuntimeError::UseAfterExit { .. }));
}

#[test]
fn nested_tasks_are_joined_by_their_own_region() {
    let counter = Arc::new(AtomicUsize::new(0));
    let depths = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let region = Region::enter();
    let base = region.depth();
    let (c, d) = (counter.clone(), depths.clone());
    region
        .spawn(
            move |child, _: ()| {
                d.lock().push(child.depth());
                let (c2, d2) = (c.clone(), d.clone());
                child.spawn(
                    move |grandchild, _: ()| {
                        thread::sleep(Duration::from_millis(20));
                        d2.lock().push(grandchild.depth());
                        c2.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    },
                    (),
                )?;
                c.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            (),
        )
        .unwrap();
    region.exit().unwrap();

    assert_eq!(counter.load(Ordering::SeqCst), 2);
    let mut depths = depths.lock().clone();
    depths.sort_unstable();
    assert_eq!(depths, vec![base + 1, base + 2]);
}

#[test]
fn task_failure_raised_after_all_joins() {
    let finished = Arc::new(AtomicUsize::new(0));
    let region = Region::enter();

    let f = finished.clone();
    region
        .spawn(
            move |child, _: ()| {
                f.fetch_add(1, Ordering::SeqCst);
                Err(child.panic("task gave up"))
            },
            (),
        )
        .unwrap();
    let f = finished.clone();
    region
        .spawn(
            move |_, _: ()| {
                thread::sleep(Duration::from_millis(40));
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            (),
        )
        .unwrap();

    let err = region.exit().unwrap_err();
    assert_eq!(finished.load(Ordering::SeqCst), 2);
    assert_eq!(
        err,
        RuntimeError::TaskFailed {
            failed: 1,
            total: 2,
            first: "task gave up".into(),
        }
    );
}

#[test]
fn task_panic_becomes_task_failure() {
    let result: RuntimeResult<()> = with_region(|region| {
        region.spawn(|_, _: ()| -> RuntimeResult<()> { panic!("worker crashed") }, ())?;
        Ok(())
    });
    match result {
        Err(RuntimeError::TaskFailed { failed, first, .. }) => {
            assert_eq!(failed, 1);
            assert!(first.contains("worker crashed"));
        }
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn panic_in_body_still_joins_tasks() {
    let finished = Arc::new(AtomicUsize::new(0));
    let f = finished.clone();
    let result: RuntimeResult<()> = with_region(|region| {
        region.spawn(
            move |_, _: ()| {
                thread::sleep(Duration::from_millis(30));
                f.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
            (),
        )?;
        Err(region.panic("body failed"))
    });

    assert_eq!(finished.load(Ordering::SeqCst), 1);
    assert_eq!(
        result,
        Err(RuntimeError::Explicit {
            message: "body failed".into()
        })
    );
}

#[test]
fn allocation_limit_reaches_root() {
    let config = RuntimeConfig::builder()
        .initial_frame_capacity(1024)
        .max_region_bytes(4096)
        .build()
        .unwrap();

    let result = with_region_config(&config, |region| -> RuntimeResult<()> {
        loop {
            region.alloc(1000)?;
        }
    });
    let err = result.unwrap_err();
    assert!(matches!(err, RuntimeError::AllocationFailed { requested: 1000, .. }));
    assert_eq!(recovery::active_count(), 0);
}

#[test]
fn merge_point_fold_picks_outermost() {
    with_region(|a| {
        with_region(|b| {
            with_region(|c| {
                let va = a.alloc_value(1u8)?;
                let vb = b.alloc_value(2u8)?;
                let vc = c.alloc_value(3u8)?;
                let merged = region_min_all([vc, va, vb]).map(|v| v.region());
                assert_eq!(merged, Some(a.handle()));
                Ok(())
            })
        })
    })
    .unwrap();
}
