/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The per-runtime registry of generated code.
//!
//! One `JitRuntime` exists per runtime. It owns the trampolines shared by
//! every compartment, memoizes VM-call wrapper code by function identity,
//! and keeps the registry of patchable loop backedges together with the
//! protection flag used for fault-based interrupts. Backedge patching and
//! protection toggling are serialized by a single lock; everything else is
//! populated once during initialization and read-only afterwards.

use std::ptr::NonNull;

use heap_traits::OutOfMemory;
use log::debug;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::code::{BackedgeTarget, CodeLocation, JitCodeRef, PatchableBackedge};

/// Identity of a VM function callable from generated code.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct VMFunctionId(pub u32);

/// A bailout frame size class. Classes are dense, starting at 0; the target
/// decides how many there are.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct FrameSizeClass(pub u32);

/// Handle to a registered patchable backedge.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct BackedgeId(u64);

/// The trampolines a [`TrampolineBuilder`] knows how to generate.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrampolineKind {
    ExceptionTail,
    BailoutTail,
    BailoutTable(FrameSizeClass),
    BailoutHandler,
    Invalidator,
    EnterJit,
    EnterBaseline,
    ValuePreBarrier,
    ShapePreBarrier,
    DebugTrapHandler,
}

/// The seam to the code generator. The registry caches and looks up code; it
/// never generates any itself.
pub trait TrampolineBuilder {
    /// Number of distinct bailout frame size classes on the target.
    fn frame_size_class_count(&self) -> u32;

    fn build(&mut self, kind: TrampolineKind) -> Result<JitCodeRef, OutOfMemory>;

    /// The arguments rectifier also reports the offset of its return point,
    /// which frame walking uses to recognize rectifier frames.
    fn build_arguments_rectifier(&mut self) -> Result<(JitCodeRef, usize), OutOfMemory>;
}

/// A boxed engine value, opaque to this crate.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Value(pub u64);

/// The callee a JIT entry targets: a function or script, tagged in the low
/// bits by the calling-convention glue.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CalleeToken(pub usize);

/// Opaque handle to an engine object.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ObjectHandle(pub usize);

/// The fixed argument record the calling-convention glue passes to the
/// enter trampolines. `args` may be padded beyond `num_actual_args` to
/// satisfy the callee's formal count.
pub struct EnterJitData<'a> {
    pub callee: CalleeToken,
    pub args: &'a [Value],
    pub num_actual_args: u32,
    pub osr_frame: Option<NonNull<u8>>,
    pub osr_num_stack_values: u32,
    pub scope_chain: ObjectHandle,
    pub constructing: bool,
    pub result: &'a mut Value,
}

struct BackedgeEntry {
    edge: PatchableBackedge,
    target: BackedgeTarget,
}

struct PatchState {
    backedges: FxHashMap<u64, BackedgeEntry>,
    next_backedge_id: u64,
    code_protected: bool,
}

pub struct JitRuntime {
    /// Shared exception handler tail.
    exception_tail: Option<JitCodeRef>,
    /// Shared post-bailout tail.
    bailout_tail: Option<JitCodeRef>,
    /// Bailout tables, one per frame size class.
    bailout_tables: SmallVec<[JitCodeRef; 4]>,
    /// Generic bailout handler for frames without a table entry.
    bailout_handler: Option<JitCodeRef>,
    /// Argument-count rectifier, with the offset of its return point.
    arguments_rectifier: Option<JitCodeRef>,
    arguments_rectifier_return_offset: usize,
    /// Thunk that invalidates the calling frame's code.
    invalidator: Option<JitCodeRef>,
    /// Entry points into optimized and baseline code.
    enter_jit: Option<JitCodeRef>,
    enter_baseline: Option<JitCodeRef>,
    /// Incremental-GC pre-barrier thunks.
    value_pre_barrier: Option<JitCodeRef>,
    shape_pre_barrier: Option<JitCodeRef>,
    /// Lazily generated debugger trap handler.
    debug_trap_handler: Mutex<Option<JitCodeRef>>,
    /// VM-call wrapper code, memoized by function identity.
    vm_wrappers: RwLock<FxHashMap<VMFunctionId, JitCodeRef>>,
    /// Scratch buffer for on-stack-replacement entries.
    osr_temp: Mutex<Vec<u8>>,
    /// Backedge registry and protection flag, under the patch lock.
    patching: Mutex<PatchState>,
}

impl JitRuntime {
    pub fn new() -> JitRuntime {
        JitRuntime {
            exception_tail: None,
            bailout_tail: None,
            bailout_tables: SmallVec::new(),
            bailout_handler: None,
            arguments_rectifier: None,
            arguments_rectifier_return_offset: 0,
            invalidator: None,
            enter_jit: None,
            enter_baseline: None,
            value_pre_barrier: None,
            shape_pre_barrier: None,
            debug_trap_handler: Mutex::new(None),
            vm_wrappers: RwLock::new(FxHashMap::default()),
            osr_temp: Mutex::new(Vec::new()),
            patching: Mutex::new(PatchState {
                backedges: FxHashMap::default(),
                next_backedge_id: 0,
                code_protected: false,
            }),
        }
    }

    /// Generate every eager trampoline. Runs exactly once, before the
    /// runtime is shared.
    pub fn initialize(&mut self, builder: &mut dyn TrampolineBuilder) -> Result<(), OutOfMemory> {
        assert!(
            self.exception_tail.is_none(),
            "JIT runtime trampolines generated twice"
        );
        debug!("generating JIT runtime trampolines");
        self.exception_tail = Some(builder.build(TrampolineKind::ExceptionTail)?);
        self.bailout_tail = Some(builder.build(TrampolineKind::BailoutTail)?);
        for class in 0..builder.frame_size_class_count() {
            let table = builder.build(TrampolineKind::BailoutTable(FrameSizeClass(class)))?;
            self.bailout_tables.push(table);
        }
        self.bailout_handler = Some(builder.build(TrampolineKind::BailoutHandler)?);
        self.invalidator = Some(builder.build(TrampolineKind::Invalidator)?);
        let (rectifier, return_offset) = builder.build_arguments_rectifier()?;
        self.arguments_rectifier = Some(rectifier);
        self.arguments_rectifier_return_offset = return_offset;
        self.enter_jit = Some(builder.build(TrampolineKind::EnterJit)?);
        self.enter_baseline = Some(builder.build(TrampolineKind::EnterBaseline)?);
        self.value_pre_barrier = Some(builder.build(TrampolineKind::ValuePreBarrier)?);
        self.shape_pre_barrier = Some(builder.build(TrampolineKind::ShapePreBarrier)?);
        Ok(())
    }

    fn slot(slot: &Option<JitCodeRef>, name: &str) -> JitCodeRef {
        match slot {
            Some(code) => code.clone(),
            None => panic!("{name} trampoline requested before initialization"),
        }
    }

    pub fn exception_tail(&self) -> JitCodeRef {
        JitRuntime::slot(&self.exception_tail, "exception tail")
    }

    pub fn bailout_tail(&self) -> JitCodeRef {
        JitRuntime::slot(&self.bailout_tail, "bailout tail")
    }

    pub fn bailout_table(&self, class: FrameSizeClass) -> JitCodeRef {
        let index = class.0 as usize;
        assert!(
            index < self.bailout_tables.len(),
            "no bailout table for frame size class {index}"
        );
        self.bailout_tables[index].clone()
    }

    pub fn bailout_handler(&self) -> JitCodeRef {
        JitRuntime::slot(&self.bailout_handler, "bailout handler")
    }

    pub fn arguments_rectifier(&self) -> JitCodeRef {
        JitRuntime::slot(&self.arguments_rectifier, "arguments rectifier")
    }

    /// The rectifier's return point, for frame walking.
    pub fn arguments_rectifier_return_addr(&self) -> CodeLocation {
        CodeLocation::new(
            &self.arguments_rectifier(),
            self.arguments_rectifier_return_offset,
        )
    }

    pub fn invalidator(&self) -> JitCodeRef {
        JitRuntime::slot(&self.invalidator, "invalidator")
    }

    pub fn enter_jit(&self) -> JitCodeRef {
        JitRuntime::slot(&self.enter_jit, "enter JIT")
    }

    pub fn enter_baseline(&self) -> JitCodeRef {
        JitRuntime::slot(&self.enter_baseline, "enter baseline")
    }

    pub fn value_pre_barrier(&self) -> JitCodeRef {
        JitRuntime::slot(&self.value_pre_barrier, "value pre-barrier")
    }

    pub fn shape_pre_barrier(&self) -> JitCodeRef {
        JitRuntime::slot(&self.shape_pre_barrier, "shape pre-barrier")
    }

    /// The debugger trap handler, generated on first request.
    pub fn debug_trap_handler(
        &self,
        builder: &mut dyn TrampolineBuilder,
    ) -> Result<JitCodeRef, OutOfMemory> {
        let mut slot = self.debug_trap_handler.lock();
        if let Some(code) = slot.as_ref() {
            return Ok(code.clone());
        }
        let code = builder.build(TrampolineKind::DebugTrapHandler)?;
        *slot = Some(code.clone());
        Ok(code)
    }

    /// The memoized wrapper for a VM function, if one has been generated.
    /// Generation is the caller's responsibility.
    pub fn vm_wrapper(&self, id: VMFunctionId) -> Option<JitCodeRef> {
        self.vm_wrappers.read().get(&id).cloned()
    }

    /// One generator wins per function: a second registration is a bug in
    /// the caller's serialization and fatal, and the first wrapper stays
    /// mapped.
    pub fn set_vm_wrapper(&self, id: VMFunctionId, code: JitCodeRef) {
        let mut wrappers = self.vm_wrappers.write();
        assert!(
            !wrappers.contains_key(&id),
            "VM wrapper generated twice for {id:?}"
        );
        wrappers.insert(id, code);
    }

    /// Grow (if needed) and return the OSR scratch buffer. The pointer is
    /// valid until the next call to this function or to
    /// [`free_osr_temp`](JitRuntime::free_osr_temp).
    pub fn allocate_osr_temp(&self, size: usize) -> Result<NonNull<u8>, OutOfMemory> {
        let mut buf = self.osr_temp.lock();
        let len = buf.len();
        if len < size {
            buf.try_reserve_exact(size - len)?;
            buf.resize(size, 0);
        }
        // Vec pointers are never null.
        Ok(NonNull::new(buf.as_mut_ptr()).unwrap_or(NonNull::dangling()))
    }

    pub fn free_osr_temp(&self) {
        *self.osr_temp.lock() = Vec::new();
    }

    /// Register a backedge. New backedges target their loop header.
    pub fn add_patchable_backedge(&self, edge: PatchableBackedge) -> BackedgeId {
        let mut state = self.patching.lock();
        let id = state.next_backedge_id;
        state.next_backedge_id += 1;
        state.backedges.insert(
            id,
            BackedgeEntry {
                edge,
                target: BackedgeTarget::LoopHeader,
            },
        );
        BackedgeId(id)
    }

    /// Unregister a backedge. Owners do this before finalizing the owning
    /// code; the registry must never hold an edge into dead code.
    pub fn remove_patchable_backedge(&self, id: BackedgeId) {
        let mut state = self.patching.lock();
        let removed = state.backedges.remove(&id.0);
        assert!(
            removed.is_some(),
            "unregistered a backedge that was never registered"
        );
    }

    /// Repoint every registered backedge at `target`.
    pub fn patch_backedges(&self, target: BackedgeTarget) {
        let mut state = self.patching.lock();
        JitRuntime::patch_all(&mut state, target);
    }

    fn patch_all(state: &mut PatchState, target: BackedgeTarget) {
        for entry in state.backedges.values_mut() {
            assert!(
                entry.edge.backedge.code().is_some(),
                "patched a backedge whose owning code was finalized"
            );
            entry.target = target;
        }
        debug!(
            "patched {} loop backedges to {:?}",
            state.backedges.len(),
            target
        );
    }

    pub fn backedge_target(&self, id: BackedgeId) -> Option<BackedgeTarget> {
        self.patching
            .lock()
            .backedges
            .get(&id.0)
            .map(|entry| entry.target)
    }

    pub fn backedge_count(&self) -> usize {
        self.patching.lock().backedges.len()
    }

    /// Fence all generated code so that the next entry into it faults.
    pub fn ensure_code_protected(&self) {
        let mut state = self.patching.lock();
        if !state.code_protected {
            state.code_protected = true;
            debug!("generated code protected for fault-based interrupts");
        }
    }

    /// Lift the fence. If an interrupt is pending, arm every backedge's
    /// interrupt check on the way out so running loops notice it.
    pub fn ensure_code_accessible(&self, interrupt_requested: bool) {
        let mut state = self.patching.lock();
        if state.code_protected {
            state.code_protected = false;
            debug!("generated code made accessible");
        }
        if interrupt_requested {
            JitRuntime::patch_all(&mut state, BackedgeTarget::InterruptCheck);
        }
    }

    pub fn code_protected(&self) -> bool {
        self.patching.lock().code_protected
    }

    /// Fault recovery: if `addr` is inside registry-owned code and the fence
    /// is up, lift it, arm the interrupt checks, and report the fault
    /// handled.
    pub fn handle_access_violation(&self, addr: usize) -> bool {
        let mut state = self.patching.lock();
        if !state.code_protected || !self.owns_code_address(addr) {
            return false;
        }
        state.code_protected = false;
        JitRuntime::patch_all(&mut state, BackedgeTarget::InterruptCheck);
        debug!("access violation at {addr:#x} attributed to protected code");
        true
    }

    fn owns_code_address(&self, addr: usize) -> bool {
        let slots = [
            &self.exception_tail,
            &self.bailout_tail,
            &self.bailout_handler,
            &self.arguments_rectifier,
            &self.invalidator,
            &self.enter_jit,
            &self.enter_baseline,
            &self.value_pre_barrier,
            &self.shape_pre_barrier,
        ];
        if slots
            .iter()
            .any(|slot| slot.as_ref().is_some_and(|code| code.contains_address(addr)))
        {
            return true;
        }
        if self
            .bailout_tables
            .iter()
            .any(|code| code.contains_address(addr))
        {
            return true;
        }
        if self
            .debug_trap_handler
            .lock()
            .as_ref()
            .is_some_and(|code| code.contains_address(addr))
        {
            return true;
        }
        self.vm_wrappers
            .read()
            .values()
            .any(|code| code.contains_address(addr))
    }
}

impl Default for JitRuntime {
    fn default() -> JitRuntime {
        JitRuntime::new()
    }
}
