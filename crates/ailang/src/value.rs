//! Runtime values, environments, and recursion cells.
//!
//! Environments form a persistent scope chain of reference-counted frames:
//! closures capture their defining environment by reference, so a captured
//! frame outlives the scope that created it. The evaluator never mutates a
//! parent frame through a child.

use std::{cell::RefCell, fmt, rc::Rc};

use indexmap::IndexMap;

use crate::anf::Expr;

/// A runtime value.
#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Bool(bool),
    Unit,
    Char(char),
    List(Rc<Vec<Value>>),
    Tuple(Rc<Vec<Value>>),
    /// Record fields keep insertion order for display; lookups are by name.
    Record(Rc<IndexMap<String, Value>>),
    /// A constructor application: `Some(1)`, `None`.
    Ctor {
        name: Rc<str>,
        fields: Rc<Vec<Value>>,
    },
    Closure(Rc<Closure>),
    /// A built-in operation value (effect op or dictionary method).
    Builtin(Rc<BuiltinVal>),
    Dict(Rc<DictValue>),
    /// Indirection through a recursion cell; dereferenced at read time.
    Indirect(Rc<RecCell>),
}

impl fmt::Display for Value {
    /// Source-like rendering, identical to the `Show` dictionary.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::prim::show_value(self))
    }
}

impl Value {
    #[must_use]
    pub fn str(s: impl AsRef<str>) -> Self {
        Self::Str(Rc::from(s.as_ref()))
    }

    #[must_use]
    pub fn list(items: Vec<Self>) -> Self {
        Self::List(Rc::new(items))
    }

    /// A short name for the value's runtime type, used in diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Int(_) => "Int",
            Self::Float(_) => "Float",
            Self::Str(_) => "String",
            Self::Bool(_) => "Bool",
            Self::Unit => "Unit",
            Self::Char(_) => "Char",
            Self::List(_) => "List",
            Self::Tuple(_) => "Tuple",
            Self::Record(_) => "Record",
            Self::Ctor { .. } => "Constructor",
            Self::Closure(_) => "Closure",
            Self::Builtin(_) => "Builtin",
            Self::Dict(_) => "Dictionary",
            Self::Indirect(_) => "Indirect",
        }
    }
}

/// A user function closed over its defining environment.
#[derive(Debug)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Rc<Expr>,
    pub env: Env,
    /// Binding name when known, for diagnostics.
    pub name: Option<String>,
    /// Arguments already supplied by partial application.
    pub applied: Vec<Value>,
}

/// A built-in function value. Effectful operations dispatch through the
/// frozen builtin registry, which owns their capability requirements.
#[derive(Debug, Clone)]
pub struct BuiltinVal {
    pub name: String,
    pub arity: usize,
    pub kind: BuiltinKind,
}

/// What a builtin value dispatches to.
#[derive(Debug, Clone)]
pub enum BuiltinKind {
    /// Pure primitive: dictionary methods and helpers.
    Prim(fn(&[Value]) -> Result<Value, PrimError>),
    /// Effectful operation, dispatched through the effect runtime by name.
    Effect { module: String, name: String },
    /// Data constructor of an algebraic type; arity lives on the
    /// enclosing builtin value.
    Ctor { name: String },
}

/// Error raised by a primitive implementation, carrying the report code.
#[derive(Debug, Clone)]
pub struct PrimError {
    pub code: &'static str,
    pub message: String,
}

impl PrimError {
    #[must_use]
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for PrimError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// A linked dictionary: the methods of one `(class, type-head)` instance
/// plus the keys of the superclass dictionaries it provides.
///
/// Methods live behind a `RefCell` because user-instance methods are
/// closures that only exist once their module initializes; the linker
/// creates the dictionary, module init fills the remaining slots.
#[derive(Debug)]
pub struct DictValue {
    pub class: String,
    pub head: String,
    methods: RefCell<IndexMap<String, Value>>,
    pub provides: Vec<String>,
}

impl DictValue {
    #[must_use]
    pub fn new(class: String, head: String, provides: Vec<String>) -> Self {
        Self {
            class,
            head,
            methods: RefCell::new(IndexMap::new()),
            provides,
        }
    }

    pub fn set_method(&self, name: impl Into<String>, value: Value) {
        self.methods.borrow_mut().insert(name.into(), value);
    }

    #[must_use]
    pub fn method(&self, name: &str) -> Option<Value> {
        self.methods.borrow().get(name).cloned()
    }
}

/// A two-flag recursion cell realizing `letrec` without nil traps.
///
/// `initialized` is set once the binding's value is stored; `visiting` is
/// set while a non-lambda right-hand side is being evaluated, so a
/// self-referential read during initialization is a diagnosable user error
/// rather than a crash.
#[derive(Debug)]
pub struct RecCell {
    pub name: String,
    value: RefCell<Option<Value>>,
    visiting: RefCell<bool>,
}

impl RecCell {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: RefCell::new(None),
            visiting: RefCell::new(false),
        }
    }

    pub fn store(&self, value: Value) {
        *self.value.borrow_mut() = Some(value);
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.value.borrow().is_some()
    }

    pub fn set_visiting(&self, visiting: bool) {
        *self.visiting.borrow_mut() = visiting;
    }

    #[must_use]
    pub fn is_visiting(&self) -> bool {
        *self.visiting.borrow()
    }

    /// Reads the cell. `Ok` once initialized; `Err(true)` when the cell is
    /// mid-initialization (user error), `Err(false)` when it was never
    /// scheduled (internal bug).
    pub fn read(&self) -> Result<Value, bool> {
        match self.value.borrow().as_ref() {
            Some(value) => Ok(value.clone()),
            None => Err(self.is_visiting()),
        }
    }
}

/// A persistent environment frame.
#[derive(Debug, Clone)]
pub struct Env(Rc<EnvFrame>);

#[derive(Debug)]
struct EnvFrame {
    bindings: RefCell<ahash::AHashMap<String, Value>>,
    parent: Option<Env>,
}

impl Env {
    /// A fresh root environment.
    #[must_use]
    pub fn root() -> Self {
        Self(Rc::new(EnvFrame {
            bindings: RefCell::new(ahash::AHashMap::new()),
            parent: None,
        }))
    }

    /// A child frame sharing this environment as parent.
    #[must_use]
    pub fn child(&self) -> Self {
        Self(Rc::new(EnvFrame {
            bindings: RefCell::new(ahash::AHashMap::new()),
            parent: Some(self.clone()),
        }))
    }

    /// Defines a name in this frame, shadowing outer bindings.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.0.bindings.borrow_mut().insert(name.into(), value);
    }

    /// Looks a name up through the scope chain.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut frame = Some(self);
        while let Some(env) = frame {
            if let Some(value) = env.0.bindings.borrow().get(name) {
                return Some(value.clone());
            }
            frame = env.0.parent.as_ref();
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn child_frames_shadow_without_mutating_parent() {
        let root = Env::root();
        root.define("x", Value::Int(1));
        let child = root.child();
        child.define("x", Value::Int(2));
        assert!(matches!(child.lookup("x"), Some(Value::Int(2))));
        assert!(matches!(root.lookup("x"), Some(Value::Int(1))));
    }

    #[test]
    fn rec_cell_flags() {
        let cell = RecCell::new("x");
        assert!(matches!(cell.read(), Err(false)));
        cell.set_visiting(true);
        assert!(matches!(cell.read(), Err(true)));
        cell.store(Value::Int(3));
        cell.set_visiting(false);
        assert!(matches!(cell.read(), Ok(Value::Int(3))));
    }
}
