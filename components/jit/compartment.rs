/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-compartment JIT state.
//!
//! A compartment is used from one thread at a time, so nothing here locks;
//! callers serialize through `&mut`. The stub-code map and the optimized
//! stub arena are deliberately separate stores: mapped code objects are
//! GC-owned and held weakly, while stub records live in the arena, so
//! purging the arena never invalidates a map entry.

use std::sync::{Arc, Weak};

use log::debug;
use rustc_hash::FxHashMap;

use crate::code::{CodeLocation, JitCodeRef, Tracer, WeakCodeRef};
use crate::runtime::JitRuntime;
use crate::stub_space::OptimizedStubSpace;

use heap_traits::OutOfMemory;

/// Identity of a stub's shape: a hash over the stub kind and its inputs.
/// Stubs with equal keys can share one block of code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct StubKey(pub u32);

/// Identity of a script, for the off-thread compilation inbox.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ScriptId(pub u32);

/// A helper-thread compilation result awaiting main-thread attachment.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FinishedCompilation {
    pub script: ScriptId,
}

pub struct JitCompartment {
    runtime: Arc<JitRuntime>,
    /// Stub code shared by call sites with the same shape. Weak: the map
    /// never keeps stub code alive across a collection.
    stub_codes: FxHashMap<StubKey, WeakCodeRef>,
    /// Return points inside the shared baseline stubs, recorded once when
    /// each stub is generated and used to recognize re-entry frames.
    baseline_call_return_addr: Option<CodeLocation>,
    baseline_get_prop_return_addr: Option<CodeLocation>,
    baseline_set_prop_return_addr: Option<CodeLocation>,
    optimized_stub_space: OptimizedStubSpace,
    /// Cached string-concatenation stub, held weakly.
    string_concat_stub: Option<WeakCodeRef>,
    finished_off_thread_compilations: Vec<FinishedCompilation>,
    barriers_enabled: bool,
    /// Set across mark/sweep; barrier toggling is forbidden while it holds.
    collecting: bool,
}

impl JitCompartment {
    pub fn new(runtime: Arc<JitRuntime>) -> JitCompartment {
        JitCompartment {
            runtime,
            stub_codes: FxHashMap::default(),
            baseline_call_return_addr: None,
            baseline_get_prop_return_addr: None,
            baseline_set_prop_return_addr: None,
            optimized_stub_space: OptimizedStubSpace::new(),
            string_concat_stub: None,
            finished_off_thread_compilations: Vec::new(),
            barriers_enabled: false,
            collecting: false,
        }
    }

    pub fn runtime(&self) -> &Arc<JitRuntime> {
        &self.runtime
    }

    /// Look up shared stub code. `None` for keys never inserted and for
    /// keys whose code has been collected since.
    pub fn stub_code(&self, key: StubKey) -> Option<JitCodeRef> {
        self.stub_codes.get(&key).and_then(Weak::upgrade)
    }

    /// Record the code for a stub key. One generator wins per key: a second
    /// insert for a live key is a bug in the caller's serialization and
    /// fatal. Re-inserting over a collected entry is fine.
    pub fn put_stub_code(&mut self, key: StubKey, code: &JitCodeRef) {
        let live = self
            .stub_codes
            .get(&key)
            .is_some_and(|entry| entry.strong_count() > 0);
        assert!(!live, "stub code registered twice for {key:?}");
        self.stub_codes.insert(key, Arc::downgrade(code));
    }

    pub fn stub_code_count(&self) -> usize {
        self.stub_codes.len()
    }

    pub fn init_baseline_call_return_addr(&mut self, addr: CodeLocation) {
        assert!(
            self.baseline_call_return_addr.is_none(),
            "baseline call return address initialized twice"
        );
        self.baseline_call_return_addr = Some(addr);
    }

    pub fn baseline_call_return_addr(&self) -> &CodeLocation {
        self.baseline_call_return_addr
            .as_ref()
            .expect("baseline call return address not initialized")
    }

    pub fn init_baseline_get_prop_return_addr(&mut self, addr: CodeLocation) {
        assert!(
            self.baseline_get_prop_return_addr.is_none(),
            "baseline get-prop return address initialized twice"
        );
        self.baseline_get_prop_return_addr = Some(addr);
    }

    pub fn baseline_get_prop_return_addr(&self) -> &CodeLocation {
        self.baseline_get_prop_return_addr
            .as_ref()
            .expect("baseline get-prop return address not initialized")
    }

    pub fn init_baseline_set_prop_return_addr(&mut self, addr: CodeLocation) {
        assert!(
            self.baseline_set_prop_return_addr.is_none(),
            "baseline set-prop return address initialized twice"
        );
        self.baseline_set_prop_return_addr = Some(addr);
    }

    pub fn baseline_set_prop_return_addr(&self) -> &CodeLocation {
        self.baseline_set_prop_return_addr
            .as_ref()
            .expect("baseline set-prop return address not initialized")
    }

    /// The cached string-concatenation stub, generating it on first use.
    pub fn ensure_string_concat_stub<F>(&mut self, make: F) -> Result<JitCodeRef, OutOfMemory>
    where
        F: FnOnce() -> Result<JitCodeRef, OutOfMemory>,
    {
        if let Some(code) = self.string_concat_stub.as_ref().and_then(Weak::upgrade) {
            return Ok(code);
        }
        let code = make()?;
        self.string_concat_stub = Some(Arc::downgrade(&code));
        Ok(code)
    }

    /// GC mark hook. Keeps the string-concatenation stub alive across the
    /// collection, drops pending off-thread results (their scripts may be
    /// about to go away), and releases the runtime's OSR scratch buffer.
    /// Never allocates.
    pub fn mark(&mut self, tracer: &mut dyn Tracer) {
        self.collecting = true;
        self.finished_off_thread_compilations.clear();
        self.runtime.free_osr_temp();
        if let Some(stub) = self.string_concat_stub.as_ref().and_then(Weak::upgrade) {
            tracer.trace_code(&stub);
        }
    }

    /// GC sweep hook. Drops every map entry whose code was collected, plus
    /// dead re-entry markers and a dead concat stub. Never allocates.
    pub fn sweep(&mut self) {
        let before = self.stub_codes.len();
        self.stub_codes
            .retain(|_, entry| entry.strong_count() > 0);
        let swept = before - self.stub_codes.len();
        if swept > 0 {
            debug!("swept {swept} dead stub code entries");
        }
        if self
            .string_concat_stub
            .as_ref()
            .is_some_and(|stub| stub.strong_count() == 0)
        {
            self.string_concat_stub = None;
        }
        for addr in [
            &mut self.baseline_call_return_addr,
            &mut self.baseline_get_prop_return_addr,
            &mut self.baseline_set_prop_return_addr,
        ] {
            if addr.as_ref().is_some_and(|loc| loc.code().is_none()) {
                *addr = None;
            }
        }
        self.collecting = false;
    }

    /// Flip the barrier mode baked into generated baseline stubs. Must not
    /// run while a collection phase is active on this compartment.
    pub fn toggle_baseline_stub_barriers(&mut self, enabled: bool) {
        assert!(
            !self.collecting,
            "toggled stub barriers during an active collection"
        );
        if self.barriers_enabled != enabled {
            self.barriers_enabled = enabled;
            debug!("baseline stub barriers {}", if enabled { "on" } else { "off" });
        }
    }

    pub fn barriers_enabled(&self) -> bool {
        self.barriers_enabled
    }

    pub fn optimized_stub_space(&self) -> &OptimizedStubSpace {
        &self.optimized_stub_space
    }

    pub fn optimized_stub_space_mut(&mut self) -> &mut OptimizedStubSpace {
        &mut self.optimized_stub_space
    }

    /// Free all optimized stubs. Part of discarding the compartment's JIT
    /// code; every call site into the stubs must already be invalidated.
    /// Map entries are untouched: their code is GC-owned, not arena-owned.
    pub fn purge_optimized_stubs(&mut self) {
        self.optimized_stub_space.purge();
    }

    /// Called by a helper thread's completion path (under the runtime's
    /// compilation serialization) to queue a result for attachment.
    pub fn push_finished_compilation(&mut self, compilation: FinishedCompilation) {
        self.finished_off_thread_compilations.push(compilation);
    }

    /// Drain the inbox for main-thread attachment.
    pub fn take_finished_compilations(&mut self) -> Vec<FinishedCompilation> {
        std::mem::take(&mut self.finished_off_thread_compilations)
    }

    pub fn has_finished_compilations(&self) -> bool {
        !self.finished_off_thread_compilations.is_empty()
    }
}
