use std::cell::RefCell;
use std::rc::Rc;

use crate::error::*;
use crate::instruction::{resolve_labels, Instruction};
use crate::memory::LinearMemory;
use crate::types::FunctionType;
use crate::value::{ValType, Value};

/// A host import: receives the instance memory (when one exists) and the
/// call arguments; returns result values in order, or a trap to abort.
pub type HostFunction =
    Rc<dyn Fn(Option<&RefCell<LinearMemory>>, &[Value]) -> Result<Option<Vec<Value>>, Error>>;

/// A funcref table. Unset entries are "undefined elements".
pub struct Table {
    elements: Vec<Option<u32>>,
    maximum: u32,
}

impl Table {
    pub fn new(initial: u32, maximum: u32) -> Self {
        Self { elements: vec![None; initial as usize], maximum }
    }

    pub fn size(&self) -> u32 { self.elements.len() as u32 }
    pub fn max(&self) -> u32 { self.maximum }

    pub fn set(&mut self, idx: u32, func_id: u32) -> Result<(), &'static str> {
        match self.elements.get_mut(idx as usize) {
            Some(slot) => { *slot = Some(func_id); Ok(()) }
            None => Err(UNDEF_ELEM),
        }
    }

    /// Resolve the function index stored at `idx`.
    pub fn func_ref(&self, idx: u32) -> Result<u32, &'static str> {
        match self.elements.get(idx as usize) {
            Some(Some(func_id)) => Ok(*func_id),
            _ => Err(UNDEF_ELEM),
        }
    }
}

pub struct Global {
    pub ty: ValType,
    pub mutable: bool,
    pub value: Value,
}

pub enum FunctionKind {
    /// A module-defined function: declared (non-param) locals and the
    /// pre-decoded, label-resolved body.
    Local { locals: Vec<ValType>, body: Rc<[Instruction]> },
    /// An imported host function.
    Host(HostFunction),
}

pub struct Function {
    pub type_idx: u32,
    pub kind: FunctionKind,
}

/// Everything a machine executes against: types, functions, tables, the
/// linear memory and globals. Assembled by [`InstanceBuilder`] from decoder
/// output; the machine treats it as an opaque provider.
pub struct Instance {
    types: Vec<FunctionType>,
    functions: Vec<Function>,
    tables: Vec<Table>,
    memory: Option<Rc<RefCell<LinearMemory>>>,
    globals: Vec<Global>,
}

impl Instance {
    pub fn builder() -> InstanceBuilder {
        InstanceBuilder::default()
    }

    pub fn function(&self, func_id: u32) -> Result<&Function, Error> {
        self.functions.get(func_id as usize).ok_or_else(|| Error::engine(UNKNOWN_FUNC))
    }

    pub fn ty(&self, type_idx: u32) -> Result<&FunctionType, Error> {
        self.types.get(type_idx as usize).ok_or_else(|| Error::engine(UNKNOWN_TYPE))
    }

    /// The declared type of a function.
    pub fn function_type(&self, func_id: u32) -> Result<&FunctionType, Error> {
        self.ty(self.function(func_id)?.type_idx)
    }

    pub fn table(&self, table_idx: u32) -> Result<&Table, Error> {
        self.tables.get(table_idx as usize).ok_or_else(|| Error::engine(UNKNOWN_TABLE))
    }

    pub fn memory(&self) -> Result<&Rc<RefCell<LinearMemory>>, Error> {
        self.memory.as_ref().ok_or_else(|| Error::engine(NO_MEMORY))
    }

    pub fn memory_handle(&self) -> Option<&Rc<RefCell<LinearMemory>>> {
        self.memory.as_ref()
    }

    pub fn global(&self, idx: u32) -> Result<Value, Error> {
        self.globals.get(idx as usize).map(|g| g.value).ok_or_else(|| Error::engine(UNKNOWN_GLOBAL))
    }

    pub fn global_mutability(&self, idx: u32) -> Result<bool, Error> {
        self.globals.get(idx as usize).map(|g| g.mutable).ok_or_else(|| Error::engine(UNKNOWN_GLOBAL))
    }

    pub fn set_global(&mut self, idx: u32, value: Value) -> Result<(), Error> {
        let global = self.globals.get_mut(idx as usize).ok_or_else(|| Error::engine(UNKNOWN_GLOBAL))?;
        if !global.mutable {
            return Err(Error::engine(GLOBAL_IS_IMMUTABLE));
        }
        global.value = value;
        Ok(())
    }
}

enum BuilderFunction {
    Local { type_idx: u32, locals: Vec<ValType>, body: Vec<Instruction> },
    Host { type_idx: u32, handle: HostFunction },
}

/// Assembles an [`Instance`] the way a decoder/linker would, resolving
/// branch labels and applying element and data segments.
#[derive(Default)]
pub struct InstanceBuilder {
    types: Vec<FunctionType>,
    functions: Vec<BuilderFunction>,
    table: Option<(u32, u32)>,
    elems: Vec<(u32, Vec<u32>)>,
    memory: Option<(u32, u32)>,
    data: Vec<(u32, Vec<u8>)>,
    passive: Vec<Vec<u8>>,
    globals: Vec<Global>,
}

impl InstanceBuilder {
    pub fn ty(mut self, params: Vec<ValType>, results: Vec<ValType>) -> Self {
        self.types.push(FunctionType::new(params, results));
        self
    }

    /// A module-defined function. `locals` are the declared locals beyond
    /// the parameters; `body` must end with the function-level END.
    pub fn func(mut self, type_idx: u32, locals: Vec<ValType>, body: Vec<Instruction>) -> Self {
        self.functions.push(BuilderFunction::Local { type_idx, locals, body });
        self
    }

    pub fn host_func<F>(mut self, type_idx: u32, f: F) -> Self
    where
        F: Fn(Option<&RefCell<LinearMemory>>, &[Value]) -> Result<Option<Vec<Value>>, Error> + 'static,
    {
        self.functions.push(BuilderFunction::Host { type_idx, handle: Rc::new(f) });
        self
    }

    pub fn memory(mut self, initial: u32, maximum: u32) -> Self {
        self.memory = Some((initial, maximum));
        self
    }

    /// An active data segment, written into memory at build time.
    pub fn data(mut self, offset: u32, bytes: Vec<u8>) -> Self {
        self.data.push((offset, bytes));
        self
    }

    /// A passive data segment, materialized on demand by MEMORY_INIT.
    /// Segments are indexed in registration order.
    pub fn passive_segment(mut self, bytes: Vec<u8>) -> Self {
        self.passive.push(bytes);
        self
    }

    pub fn table(mut self, initial: u32, maximum: u32) -> Self {
        self.table = Some((initial, maximum));
        self
    }

    /// An element segment: function indices placed into the table starting
    /// at `offset`.
    pub fn elem(mut self, offset: u32, func_ids: Vec<u32>) -> Self {
        self.elems.push((offset, func_ids));
        self
    }

    pub fn global(mut self, ty: ValType, mutable: bool, value: Value) -> Self {
        self.globals.push(Global { ty, mutable, value });
        self
    }

    pub fn build(self) -> Result<Instance, Error> {
        let mut functions = Vec::with_capacity(self.functions.len());
        for function in self.functions {
            match function {
                BuilderFunction::Local { type_idx, locals, mut body } => {
                    if type_idx as usize >= self.types.len() {
                        return Err(Error::engine(UNKNOWN_TYPE));
                    }
                    resolve_labels(&mut body)?;
                    functions.push(Function {
                        type_idx,
                        kind: FunctionKind::Local { locals, body: body.into() },
                    });
                }
                BuilderFunction::Host { type_idx, handle } => {
                    if type_idx as usize >= self.types.len() {
                        return Err(Error::engine(UNKNOWN_TYPE));
                    }
                    functions.push(Function { type_idx, kind: FunctionKind::Host(handle) });
                }
            }
        }

        let memory = match self.memory {
            Some((initial, maximum)) => {
                let mut memory = LinearMemory::new(initial, maximum);
                for bytes in self.passive {
                    memory.add_passive_segment(bytes);
                }
                for (offset, bytes) in self.data {
                    memory.write_bytes(offset, &bytes).map_err(|_| Error::engine(DATA_SEG_DNF))?;
                }
                Some(Rc::new(RefCell::new(memory)))
            }
            None => {
                if !self.data.is_empty() || !self.passive.is_empty() {
                    return Err(Error::engine(NO_MEMORY));
                }
                None
            }
        };

        let mut tables = Vec::new();
        if let Some((initial, maximum)) = self.table {
            let mut table = Table::new(initial, maximum);
            for (offset, func_ids) in self.elems {
                for (i, func_id) in func_ids.into_iter().enumerate() {
                    if func_id as usize >= functions.len() {
                        return Err(Error::engine(UNKNOWN_FUNC));
                    }
                    table
                        .set(offset + i as u32, func_id)
                        .map_err(|_| Error::engine(ELEM_SEG_DNF))?;
                }
            }
            tables.push(table);
        } else if !self.elems.is_empty() {
            return Err(Error::engine(UNKNOWN_TABLE));
        }

        Ok(Instance {
            types: self.types,
            functions,
            tables,
            memory,
            globals: self.globals,
        })
    }
}
