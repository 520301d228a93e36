/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Per-kind cell contracts.
//!
//! A heap hands cells to a visitor as a [`CellRef`], a closed tagged set with
//! one variant per [`CellKind`](crate::CellKind). Each variant carries a
//! trait object exposing exactly the attributes the accounting pass reads:
//! which compartment the cell belongs to (for compartment-attributed kinds)
//! and how many malloc-heap bytes hang off it. The bytes of the cell itself
//! come from the arena, not from these traits.

use std::sync::Arc;

use crate::{BufferId, CellKind, CompartmentId, SourceId};

/// The class split the accounting pass applies to objects.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ObjectClass {
    Ordinary,
    Function,
    DenseArray,
    CrossCompartmentWrapper,
    ArrayBuffer,
    TypedArray,
    DataView,
}

impl ObjectClass {
    /// Typed arrays and data views are windows onto an array buffer; they
    /// never own the buffer's bytes.
    pub fn is_buffer_view(self) -> bool {
        matches!(self, ObjectClass::TypedArray | ObjectClass::DataView)
    }
}

/// The buffer-view capability shared by typed arrays and data views.
///
/// A view holds a weak link to its buffer (an id resolved by lookup, never an
/// owning reference), so buffer bytes are attributed once, to the buffer.
pub trait BufferView {
    fn byte_offset(&self) -> usize;
    fn byte_length(&self) -> usize;
    fn buffer(&self) -> BufferId;
}

pub trait ObjectCell {
    fn compartment(&self) -> CompartmentId;
    fn class(&self) -> ObjectClass;
    /// Malloc-heap bytes of the object's out-of-line slots.
    fn slots_malloc_bytes(&self) -> usize {
        0
    }
    /// Malloc-heap bytes of the object's elements (including array buffer
    /// contents, for buffers). Views must report 0 here.
    fn elements_malloc_bytes(&self) -> usize {
        0
    }
    /// The buffer-view capability, present exactly when
    /// `class().is_buffer_view()`.
    fn as_buffer_view(&self) -> Option<&dyn BufferView> {
        None
    }
}

pub trait StringCell {
    /// A cheap shared handle to the character data. Cells with equal
    /// contents aggregate into one accounting entry.
    fn chars(&self) -> Arc<str>;
    /// Short strings store their characters inline in the cell.
    fn is_short(&self) -> bool;
    /// Malloc-heap bytes of out-of-line character storage; always 0 for
    /// short strings.
    fn chars_malloc_bytes(&self) -> usize;
}

pub trait ShapeCell {
    fn compartment(&self) -> CompartmentId;
    fn in_dictionary(&self) -> bool;
    /// For tree shapes: whether the shape lineage is parented by the global.
    fn global_parented(&self) -> bool;
    fn table_malloc_bytes(&self) -> usize {
        0
    }
    fn kids_malloc_bytes(&self) -> usize {
        0
    }
}

pub trait BaseShapeCell {
    fn compartment(&self) -> CompartmentId;
}

pub trait ScriptCell {
    fn compartment(&self) -> CompartmentId;
    fn data_malloc_bytes(&self) -> usize {
        0
    }
    fn type_script_malloc_bytes(&self) -> usize {
        0
    }
    fn baseline_data_bytes(&self) -> usize {
        0
    }
    fn baseline_fallback_stubs_bytes(&self) -> usize {
        0
    }
    fn ion_data_bytes(&self) -> usize {
        0
    }
    fn source(&self) -> SourceId;
    /// Bytes of the underlying source record; counted once per [`SourceId`]
    /// no matter how many scripts share it.
    fn source_bytes(&self) -> usize {
        0
    }
}

pub trait LazyScriptCell {
    fn malloc_bytes(&self) -> usize {
        0
    }
}

pub trait TypeObjectCell {
    fn malloc_bytes(&self) -> usize {
        0
    }
}

/// A live cell, dispatched by kind.
///
/// Generated-code cells carry no payload: the cell header is accounted from
/// the arena and the code bytes themselves belong to the executable
/// allocator, not the GC heap.
pub enum CellRef<'a> {
    Object(&'a dyn ObjectCell),
    String(&'a dyn StringCell),
    Shape(&'a dyn ShapeCell),
    BaseShape(&'a dyn BaseShapeCell),
    Script(&'a dyn ScriptCell),
    LazyScript(&'a dyn LazyScriptCell),
    JitCode,
    TypeObject(&'a dyn TypeObjectCell),
}

impl CellRef<'_> {
    pub fn kind(&self) -> CellKind {
        match self {
            CellRef::Object(_) => CellKind::Object,
            CellRef::String(_) => CellKind::String,
            CellRef::Shape(_) => CellKind::Shape,
            CellRef::BaseShape(_) => CellKind::BaseShape,
            CellRef::Script(_) => CellKind::Script,
            CellRef::LazyScript(_) => CellKind::LazyScript,
            CellRef::JitCode => CellKind::JitCode,
            CellRef::TypeObject(_) => CellKind::TypeObject,
        }
    }
}
