/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

#![deny(unsafe_code)]

//! The memory model of Kestrel's JIT: who owns generated code and stub
//! metadata, how it is looked up, and when it is released.
//!
//! [`runtime::JitRuntime`] is the per-runtime registry of shared trampolines
//! and VM-call wrappers, and owns the patchable-backedge machinery used for
//! fault-based interrupts. [`compartment::JitCompartment`] is the
//! per-isolation-unit cache of shared stub code and the arena its optimized
//! stub records live in. Code generation itself happens elsewhere and
//! arrives through the [`runtime::TrampolineBuilder`] seam.

pub mod code;
pub mod compartment;
pub mod runtime;
pub mod stub_space;

pub use code::{
    BackedgeTarget, CodeKind, CodeLocation, JitCode, JitCodeRef, PatchableBackedge, Tracer,
    WeakCodeRef,
};
pub use compartment::{FinishedCompilation, JitCompartment, ScriptId, StubKey};
pub use runtime::{
    BackedgeId, EnterJitData, FrameSizeClass, JitRuntime, TrampolineBuilder, TrampolineKind,
    VMFunctionId,
};
pub use stub_space::{FallbackStubSpace, OptimizedStubSpace, StubSpace};
