//! Surface AST produced by the parser.
//!
//! Every node carries a [`Span`] into the normalized source; stable ids
//! (SIDs) are derived from file path plus byte range when declarations are
//! lowered. The surface tree is immutable once built.

use crate::source::Span;

/// A literal value shared between the surface and core trees.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Unit,
}

/// Binary operators as written in source. Resolution to class methods
/// happens during elaboration and op-lowering, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnOp {
    Neg,
    Not,
}

/// An expression with its source span.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self { kind, span }
    }
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Lit(Literal),
    Var(String),
    Unary {
        op: UnOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `\x y. body` — sugar for nested single-parameter lambdas.
    Lambda {
        params: Vec<String>,
        body: Box<Expr>,
    },
    /// Anonymous `func(x: T, ...) -> U ! {E} { body }` literal.
    FuncLit {
        params: Vec<Param>,
        ret: Option<TypeExpr>,
        effects: Vec<String>,
        body: Box<Expr>,
    },
    App {
        func: Box<Expr>,
        args: Vec<Expr>,
    },
    Let {
        name: String,
        annotation: Option<TypeExpr>,
        value: Box<Expr>,
        /// `let x = e in body`; `None` for a statement-position binding
        /// inside a block, where the rest of the block is the body.
        body: Option<Box<Expr>>,
    },
    LetRec {
        bindings: Vec<(String, Expr)>,
        body: Box<Expr>,
    },
    If {
        cond: Box<Expr>,
        then: Box<Expr>,
        els: Box<Expr>,
    },
    Match {
        scrutinee: Box<Expr>,
        arms: Vec<MatchArm>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    Record(Vec<(String, Expr)>),
    FieldAccess {
        base: Box<Expr>,
        field: String,
    },
    /// `{base | f: v, g: w}`
    RecordUpdate {
        base: Box<Expr>,
        fields: Vec<(String, Expr)>,
    },
    /// `{e1; e2; ...; en}` — value is the final expression.
    Block(Vec<Expr>),
    /// `ch <- v` — parsed for compatibility, rejected during desugaring.
    Send {
        channel: Box<Expr>,
        value: Box<Expr>,
    },
    /// `<- ch` — parsed for compatibility, rejected during desugaring.
    Recv(Box<Expr>),
    /// `` `e `` — parsed for compatibility, rejected during desugaring.
    Quasiquote(Box<Expr>),
    /// Placeholder inserted by parser error recovery.
    Error,
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct Pattern {
    pub kind: PatternKind,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    Wildcard,
    Var(String),
    Lit(Literal),
    Ctor {
        name: String,
        args: Vec<Pattern>,
    },
    Tuple(Vec<Pattern>),
    /// `[a, b, ...rest]`; `rest` of `Some("_")` drops the tail binding.
    List {
        items: Vec<Pattern>,
        rest: Option<String>,
    },
    /// `{x, y, ...}` — `open` allows extra fields.
    Record {
        fields: Vec<(String, Pattern)>,
        open: bool,
    },
    /// `p as name`
    Binding {
        pattern: Box<Pattern>,
        name: String,
    },
}

/// A function parameter with optional annotation.
#[derive(Debug, Clone)]
pub struct Param {
    pub name: String,
    pub annotation: Option<TypeExpr>,
    pub span: Span,
}

/// A type as written in source.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeExpr {
    /// `Int`, `Bool`, or a user type name (uppercase initial).
    Con(String),
    /// `a` — lowercase initial.
    Var(String),
    App {
        ctor: String,
        args: Vec<TypeExpr>,
    },
    List(Box<TypeExpr>),
    Tuple(Vec<TypeExpr>),
    Record(Vec<(String, TypeExpr)>),
    Func {
        params: Vec<TypeExpr>,
        ret: Box<TypeExpr>,
        effects: Vec<String>,
    },
    Unit,
}

/// `module path/to/name`
#[derive(Debug, Clone)]
pub struct ModuleDecl {
    pub path: String,
    pub span: Span,
}

/// `import std/io (println, readLine)`
#[derive(Debug, Clone)]
pub struct ImportDecl {
    pub path: String,
    /// Selective symbol list, or `None` for a whole-module import.
    pub symbols: Option<Vec<String>>,
    pub span: Span,
}

/// `[export] func name(params) -> Ret ! {Effects} { body }`
#[derive(Debug, Clone)]
pub struct FuncDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub ret: Option<TypeExpr>,
    pub effects: Vec<String>,
    pub body: Expr,
    pub is_export: bool,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct CtorDecl {
    pub name: String,
    pub fields: Vec<TypeExpr>,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum TypeBody {
    Alias(TypeExpr),
    Sum(Vec<CtorDecl>),
    Record(Vec<(String, TypeExpr)>),
}

/// `[export] type Name[a, b] = ...`
#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: TypeBody,
    pub is_export: bool,
    pub span: Span,
}

/// `class Name[a] { method signatures }`
#[derive(Debug, Clone)]
pub struct ClassDecl {
    pub name: String,
    pub param: String,
    pub methods: Vec<(String, TypeExpr)>,
    pub span: Span,
}

/// `instance Class[Head] { func method(..) { .. } }`
#[derive(Debug, Clone)]
pub struct InstanceDecl {
    pub class: String,
    pub head: TypeExpr,
    pub methods: Vec<FuncDecl>,
    pub span: Span,
}

/// `test "name" { body }` / `property "name" { body }` — parsed for the
/// external harness; the core pipeline records but does not execute them.
#[derive(Debug, Clone)]
pub struct TestDecl {
    pub name: String,
    pub is_property: bool,
    pub body: Expr,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub enum Decl {
    Func(FuncDecl),
    Type(TypeDecl),
    Class(ClassDecl),
    Instance(InstanceDecl),
    Test(TestDecl),
}

/// A parsed source file: module header, imports, declarations, and
/// top-level statements in source order.
#[derive(Debug, Clone)]
pub struct File {
    pub module: Option<ModuleDecl>,
    pub imports: Vec<ImportDecl>,
    pub decls: Vec<Decl>,
    pub statements: Vec<Expr>,
}

impl File {
    /// Names exported by this file's declarations, in source order.
    #[must_use]
    pub fn export_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for decl in &self.decls {
            match decl {
                Decl::Func(f) if f.is_export => names.push(f.name.as_str()),
                Decl::Type(t) if t.is_export => {
                    names.push(t.name.as_str());
                    if let TypeBody::Sum(ctors) = &t.body {
                        names.extend(ctors.iter().map(|c| c.name.as_str()));
                    }
                }
                _ => {}
            }
        }
        names
    }
}
