/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

use std::sync::Arc;

use jit::{
    CodeKind, CodeLocation, FinishedCompilation, JitCode, JitCodeRef, JitCompartment, JitRuntime,
    ScriptId, StubKey, Tracer,
};

struct RecordingTracer {
    traced: Vec<JitCodeRef>,
}

impl Tracer for RecordingTracer {
    fn trace_code(&mut self, code: &JitCodeRef) {
        self.traced.push(code.clone());
    }
}

fn compartment() -> JitCompartment {
    JitCompartment::new(Arc::new(JitRuntime::new()))
}

fn dummy_code(size: usize) -> JitCodeRef {
    JitCode::new(vec![0; size].into_boxed_slice(), CodeKind::Baseline)
}

#[test]
fn stub_code_is_shared_by_key() {
    let mut compartment = compartment();
    let code = dummy_code(32);
    compartment.put_stub_code(StubKey(1), &code);

    let shared = compartment
        .stub_code(StubKey(1))
        .expect("mapped stub code must be found");
    assert!(Arc::ptr_eq(&shared, &code));
    assert!(compartment.stub_code(StubKey(2)).is_none());
    assert_eq!(compartment.stub_code_count(), 1);
}

#[test]
fn stub_code_insert_is_first_writer_wins() {
    let mut compartment = compartment();
    let first = dummy_code(32);
    compartment.put_stub_code(StubKey(1), &first);

    let second = dummy_code(32);
    let err = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        compartment.put_stub_code(StubKey(1), &second);
    }))
    .err()
    .and_then(|panic| panic.downcast_ref::<String>().cloned())
    .expect("second insert for a live key must panic");
    assert!(err.contains("registered twice"));

    let shared = compartment
        .stub_code(StubKey(1))
        .expect("the key must still be mapped");
    assert!(Arc::ptr_eq(&shared, &first), "the first insert is kept");
}

#[test]
fn collected_stub_entries_can_be_regenerated() {
    let mut compartment = compartment();
    let first = dummy_code(32);
    compartment.put_stub_code(StubKey(1), &first);
    drop(first);

    assert!(
        compartment.stub_code(StubKey(1)).is_none(),
        "the map must not keep stub code alive"
    );

    let second = dummy_code(32);
    compartment.put_stub_code(StubKey(1), &second);
    let shared = compartment
        .stub_code(StubKey(1))
        .expect("regenerated stub code must be found");
    assert!(Arc::ptr_eq(&shared, &second));
}

#[test]
fn purging_optimized_stubs_keeps_the_code_map() {
    let mut compartment = compartment();
    compartment
        .optimized_stub_space_mut()
        .alloc(48)
        .expect("stub allocation failed");
    let code = dummy_code(32);
    compartment.put_stub_code(StubKey(1), &code);

    compartment.purge_optimized_stubs();
    assert_eq!(compartment.optimized_stub_space().used_bytes(), 0);
    assert_eq!(compartment.optimized_stub_space().size_of_excluding_this(), 0);

    let shared = compartment
        .stub_code(StubKey(1))
        .expect("purging stub records must not touch the code map");
    assert!(Arc::ptr_eq(&shared, &code));
}

#[test]
fn sweep_drops_only_dead_entries() {
    let mut compartment = compartment();
    let live = dummy_code(32);
    compartment.put_stub_code(StubKey(1), &live);
    let dead = dummy_code(32);
    compartment.put_stub_code(StubKey(2), &dead);
    drop(dead);
    assert_eq!(compartment.stub_code_count(), 2);

    compartment.sweep();
    assert_eq!(compartment.stub_code_count(), 1);
    assert!(compartment.stub_code(StubKey(1)).is_some());
    assert!(compartment.stub_code(StubKey(2)).is_none());
}

#[test]
fn mark_traces_the_concat_stub_and_clears_the_inbox() {
    let mut compartment = compartment();
    let concat = compartment
        .ensure_string_concat_stub(|| Ok(dummy_code(32)))
        .expect("stub generation failed");
    compartment.push_finished_compilation(FinishedCompilation {
        script: ScriptId(1),
    });

    let mut tracer = RecordingTracer { traced: Vec::new() };
    compartment.mark(&mut tracer);
    assert_eq!(tracer.traced.len(), 1);
    assert!(Arc::ptr_eq(&tracer.traced[0], &concat));
    assert!(
        !compartment.has_finished_compilations(),
        "pending off-thread results do not survive a collection"
    );
    compartment.sweep();
}

#[test]
#[should_panic(expected = "active collection")]
fn barrier_toggle_is_forbidden_during_collection() {
    let mut compartment = compartment();
    let mut tracer = RecordingTracer { traced: Vec::new() };
    compartment.mark(&mut tracer);
    compartment.toggle_baseline_stub_barriers(true);
}

#[test]
fn barrier_toggle_flips_the_mode() {
    let mut compartment = compartment();
    assert!(!compartment.barriers_enabled());
    compartment.toggle_baseline_stub_barriers(true);
    assert!(compartment.barriers_enabled());
    compartment.toggle_baseline_stub_barriers(true);
    assert!(compartment.barriers_enabled());
    compartment.toggle_baseline_stub_barriers(false);
    assert!(!compartment.barriers_enabled());

    let mut tracer = RecordingTracer { traced: Vec::new() };
    compartment.mark(&mut tracer);
    compartment.sweep();
    compartment.toggle_baseline_stub_barriers(true);
    assert!(compartment.barriers_enabled());
}

#[test]
fn baseline_return_addrs_initialize_once() {
    let mut compartment = compartment();
    let code = dummy_code(64);
    compartment.init_baseline_call_return_addr(CodeLocation::new(&code, 12));
    compartment.init_baseline_get_prop_return_addr(CodeLocation::new(&code, 24));
    compartment.init_baseline_set_prop_return_addr(CodeLocation::new(&code, 36));

    assert_eq!(compartment.baseline_call_return_addr().offset(), 12);
    assert_eq!(compartment.baseline_get_prop_return_addr().offset(), 24);
    assert_eq!(compartment.baseline_set_prop_return_addr().offset(), 36);
    let resolved = compartment
        .baseline_call_return_addr()
        .code()
        .expect("the stub is still alive");
    assert!(Arc::ptr_eq(&resolved, &code));
}

#[test]
#[should_panic(expected = "initialized twice")]
fn baseline_return_addr_double_init_panics() {
    let mut compartment = compartment();
    let code = dummy_code(64);
    compartment.init_baseline_call_return_addr(CodeLocation::new(&code, 12));
    compartment.init_baseline_call_return_addr(CodeLocation::new(&code, 16));
}

#[test]
#[should_panic(expected = "not initialized")]
fn baseline_return_addr_lookup_before_init_panics() {
    let compartment = compartment();
    compartment.baseline_get_prop_return_addr();
}

#[test]
fn sweep_drops_dead_return_addr_markers() {
    let mut compartment = compartment();
    let code = dummy_code(64);
    compartment.init_baseline_call_return_addr(CodeLocation::new(&code, 12));
    drop(code);

    compartment.sweep();
    let replacement = dummy_code(64);
    compartment.init_baseline_call_return_addr(CodeLocation::new(&replacement, 20));
    assert_eq!(compartment.baseline_call_return_addr().offset(), 20);
}

#[test]
fn string_concat_stub_is_memoized() {
    let mut compartment = compartment();
    let mut generated = 0;
    let first = compartment
        .ensure_string_concat_stub(|| {
            generated += 1;
            Ok(dummy_code(32))
        })
        .expect("stub generation failed");
    let second = compartment
        .ensure_string_concat_stub(|| {
            generated += 1;
            Ok(dummy_code(32))
        })
        .expect("stub generation failed");
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(generated, 1);

    drop(first);
    drop(second);
    compartment.sweep();
    compartment
        .ensure_string_concat_stub(|| {
            generated += 1;
            Ok(dummy_code(32))
        })
        .expect("stub generation failed");
    assert_eq!(generated, 2, "a collected stub is regenerated on demand");
}

#[test]
fn finished_compilations_drain_in_order() {
    let mut compartment = compartment();
    assert!(!compartment.has_finished_compilations());
    compartment.push_finished_compilation(FinishedCompilation {
        script: ScriptId(4),
    });
    compartment.push_finished_compilation(FinishedCompilation {
        script: ScriptId(9),
    });
    assert!(compartment.has_finished_compilations());

    let drained = compartment.take_finished_compilations();
    assert_eq!(
        drained,
        vec![
            FinishedCompilation { script: ScriptId(4) },
            FinishedCompilation { script: ScriptId(9) },
        ]
    );
    assert!(!compartment.has_finished_compilations());
    assert!(compartment.take_finished_compilations().is_empty());
}
