//! Modules and globals.
//!
//! A module owns its functions and globals in arenas addressed by
//! [`FuncId`] and [`GlobalId`]. Globals are the only mutable state the
//! analysis models across function boundaries: integer scalars and
//! one-dimensional integer arrays, optionally with constant initializers.

use std::fmt;

use crate::ir::{ConstInt, FuncId, Function, MetadataMap, Type};

/// Unique identifier of a global within a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalId(usize);

impl GlobalId {
    /// Creates a global id from an index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

/// A global's initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalInit {
    /// No initializer; the global may hold anything.
    None,
    /// A constant integer scalar.
    Scalar(ConstInt),
    /// Per-element constants for an integer array.
    Array(Vec<ConstInt>),
}

/// A module-scope variable.
#[derive(Debug, Clone)]
pub struct Global {
    name: String,
    ty: Type,
    init: GlobalInit,
    metadata: MetadataMap,
}

impl Global {
    /// Creates a global of `ty` with the given initializer.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: Type, init: GlobalInit) -> Self {
        Self {
            name: name.into(),
            ty,
            init,
            metadata: MetadataMap::new(),
        }
    }

    /// Returns the global's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the value type.
    #[must_use]
    pub const fn ty(&self) -> Type {
        self.ty
    }

    /// Returns the initializer.
    #[must_use]
    pub const fn init(&self) -> &GlobalInit {
        &self.init
    }

    /// Returns the attached metadata.
    #[must_use]
    pub const fn metadata(&self) -> &MetadataMap {
        &self.metadata
    }

    /// Returns the attached metadata for writing.
    pub fn metadata_mut(&mut self) -> &mut MetadataMap {
        &mut self.metadata
    }
}

/// A compiled module: functions plus globals.
#[derive(Debug, Clone, Default)]
pub struct Module {
    name: String,
    functions: Vec<Function>,
    globals: Vec<Global>,
}

impl Module {
    /// Creates an empty module.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Returns the module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Adds a function, returning its id.
    pub fn add_function(&mut self, func: Function) -> FuncId {
        self.functions.push(func);
        FuncId::new(self.functions.len() - 1)
    }

    /// Returns a function by id.
    #[must_use]
    pub fn function(&self, id: FuncId) -> Option<&Function> {
        self.functions.get(id.index())
    }

    /// Returns a function by id, for writing.
    pub fn function_mut(&mut self, id: FuncId) -> Option<&mut Function> {
        self.functions.get_mut(id.index())
    }

    /// Iterates functions with their ids.
    pub fn functions(&self) -> impl Iterator<Item = (FuncId, &Function)> {
        self.functions
            .iter()
            .enumerate()
            .map(|(i, func)| (FuncId::new(i), func))
    }

    /// Returns the ids of all functions.
    #[must_use]
    pub fn func_ids(&self) -> Vec<FuncId> {
        (0..self.functions.len()).map(FuncId::new).collect()
    }

    /// Returns the number of functions.
    #[must_use]
    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Finds a function by exact name.
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<FuncId> {
        self.functions
            .iter()
            .position(|func| func.name() == name)
            .map(FuncId::new)
    }

    /// Finds a declaration by name, inserting a nullary one of return type
    /// `ret` if absent.
    ///
    /// This is how synthesized source-argument callees enter the module.
    pub fn get_or_insert_declaration(&mut self, name: &str, ret: Type) -> FuncId {
        if let Some(id) = self.function_by_name(name) {
            return id;
        }
        self.add_function(Function::declaration(name, Vec::new(), ret))
    }

    /// Adds a global, returning its id.
    pub fn add_global(&mut self, global: Global) -> GlobalId {
        self.globals.push(global);
        GlobalId::new(self.globals.len() - 1)
    }

    /// Returns a global by id.
    #[must_use]
    pub fn global(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(id.index())
    }

    /// Returns a global by id, for writing.
    pub fn global_mut(&mut self, id: GlobalId) -> Option<&mut Global> {
        self.globals.get_mut(id.index())
    }

    /// Iterates globals with their ids.
    pub fn globals(&self) -> impl Iterator<Item = (GlobalId, &Global)> {
        self.globals
            .iter()
            .enumerate()
            .map(|(i, g)| (GlobalId::new(i), g))
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "; module {}", self.name)?;
        for (_, global) in self.globals() {
            writeln!(f, "@{} = global {}{}", global.name(), global.ty(), global.metadata())?;
        }
        for (_, func) in self.functions() {
            write!(f, "{func}")?;
        }
        Ok(())
    }
}
