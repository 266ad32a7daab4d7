//! Core IR: a normalized λ-calculus in A-Normal Form.
//!
//! Operands of applications and intrinsics are atoms (variables or
//! literals); the elaborator let-binds anything larger. Every node carries a
//! numeric id (used by the solver's resolved-constraint table), its source
//! span, and declarations additionally carry per-declaration metadata.

use std::fmt;

use crate::{
    diagnostic::{Phase, Report},
    source::{Sid, Span},
    surface::{Literal, TypeExpr},
};

/// Identifies a core node within one module. Assigned densely by the
/// elaborator; the inference engine keys its per-node tables on this.
pub type NodeId = u32;

/// Overloaded and primitive operations awaiting dictionary lowering.
///
/// Operators desugar to `Intrinsic` nodes carrying one of these; after
/// dictionary elaboration only `Not` remains (it is monomorphic on `Bool`
/// and needs no dictionary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IntrinsicOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Concat,
    Not,
}

#[derive(Debug, Clone)]
pub struct Expr {
    pub id: NodeId,
    pub span: Span,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Var(String),
    Lit(Literal),
    Lambda {
        params: Vec<String>,
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
        body: Box<Expr>,
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
    Record(Vec<(String, Expr)>),
    RecordAccess {
        base: Box<Expr>,
        field: String,
    },
    RecordUpdate {
        base: Box<Expr>,
        fields: Vec<(String, Expr)>,
    },
    List(Vec<Expr>),
    Tuple(Vec<Expr>),
    /// An overloaded operation awaiting dictionary lowering, or a resolved
    /// monomorphic primitive (`Not`).
    Intrinsic {
        op: IntrinsicOp,
        args: Vec<Expr>,
    },
    /// Reference to a linked dictionary by canonical key.
    DictRef {
        key: String,
    },
    /// `DictApp(dict, method, args)` — dictionary method invocation.
    DictApp {
        dict: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    /// Reference to another module's export.
    GlobalRef {
        module: String,
        name: String,
    },
}

impl Expr {
    /// Atoms are legal operands in ANF position.
    #[must_use]
    pub fn is_atom(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Var(_) | ExprKind::Lit(_) | ExprKind::GlobalRef { .. } | ExprKind::DictRef { .. }
        )
    }
}

#[derive(Debug, Clone)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Expr,
}

/// Core patterns. Same shape as surface patterns; the interpreter matches
/// them directly (no decision-tree compilation).
#[derive(Debug, Clone)]
pub struct Pattern {
    pub span: Span,
    pub kind: PatternKind,
}

#[derive(Debug, Clone)]
pub enum PatternKind {
    Wildcard,
    Var(String),
    Lit(Literal),
    Ctor { name: String, args: Vec<Pattern> },
    Tuple(Vec<Pattern>),
    List { items: Vec<Pattern>, rest: Option<String> },
    Record { fields: Vec<(String, Pattern)>, open: bool },
    Binding { pattern: Box<Pattern>, name: String },
}

/// Per-declaration metadata extracted during elaboration.
#[derive(Debug, Clone)]
pub struct Meta {
    pub is_export: bool,
    /// A function is pure iff its declared effect row is empty.
    pub is_pure: bool,
    pub sid: Sid,
}

/// A top-level declaration lowered to core form.
#[derive(Debug, Clone)]
pub struct Decl {
    pub name: String,
    pub expr: Expr,
    pub meta: Meta,
    /// Full declared type when every parameter and the return type are
    /// annotated.
    pub annotation: Option<TypeExpr>,
    /// Individual parameter annotations; used when `annotation` is absent.
    pub param_annotations: Vec<Option<TypeExpr>>,
    pub effects: Vec<String>,
}

/// A type alias (`type Ints = [Int]`) in core form.
#[derive(Debug, Clone)]
pub struct AliasDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: TypeExpr,
    pub is_export: bool,
}

/// An algebraic data type declaration in core form.
#[derive(Debug, Clone)]
pub struct AdtDef {
    pub name: String,
    pub params: Vec<String>,
    pub ctors: Vec<CtorDef>,
    pub is_export: bool,
}

#[derive(Debug, Clone)]
pub struct CtorDef {
    pub adt: String,
    pub name: String,
    pub fields: Vec<TypeExpr>,
}

/// A user instance declaration lowered to core: method bodies become
/// ordinary core expressions evaluated during module initialization.
#[derive(Debug, Clone)]
pub struct InstanceDef {
    pub class: String,
    /// Outermost constructor name of the instance head type.
    pub head: String,
    pub methods: Vec<(String, Expr)>,
    pub span: Span,
}

/// A whole module lowered to core.
#[derive(Debug, Clone)]
pub struct Program {
    /// Module identity (repo-relative, forward slashes, no extension).
    pub module: String,
    pub imports: Vec<ProgramImport>,
    pub adts: Vec<AdtDef>,
    pub aliases: Vec<AliasDef>,
    pub decls: Vec<Decl>,
    pub instances: Vec<InstanceDef>,
    /// Top-level statements, evaluated in order during module init.
    pub statements: Vec<Stmt>,
    /// Declared tests, surfaced to the evaluation harness.
    pub tests: Vec<TestMeta>,
}

/// A top-level statement: an expression, optionally bound to a module-level
/// name (`let x = e` in statement position).
#[derive(Debug, Clone)]
pub struct Stmt {
    pub binder: Option<String>,
    pub expr: Expr,
}

/// A `test`/`property` declaration, recorded for the external harness.
/// The core pipeline does not execute tests.
#[derive(Debug, Clone)]
pub struct TestMeta {
    pub name: String,
    pub property: bool,
    pub sid: Sid,
}

#[derive(Debug, Clone)]
pub struct ProgramImport {
    pub module: String,
    pub symbols: Option<Vec<String>>,
}

impl fmt::Display for IntrinsicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Neg => "neg",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Concat => "++",
            Self::Not => "!",
        };
        f.write_str(symbol)
    }
}

/// Verifies the ANF discipline over a lowered module: every operand of
/// `App`, `Intrinsic`, and `DictApp` must be atomic. Violations are
/// compiler bugs surfaced as `ELB006`.
#[must_use]
pub fn verify_anf(file: &str, program: &Program) -> Vec<Report> {
    let mut reports = Vec::new();
    for decl in &program.decls {
        verify_expr(file, &decl.expr, &mut reports);
    }
    for instance in &program.instances {
        for (_, body) in &instance.methods {
            verify_expr(file, body, &mut reports);
        }
    }
    for statement in &program.statements {
        verify_expr(file, &statement.expr, &mut reports);
    }
    reports
}

fn verify_operands(file: &str, parent: &Expr, args: &[Expr], reports: &mut Vec<Report>) {
    for arg in args {
        if !arg.is_atom() {
            reports.push(
                Report::new(
                    Phase::Elaborate,
                    "ELB006",
                    "non-atomic operand in normalized core".to_owned(),
                )
                .with_span(file, parent.span),
            );
        }
    }
}

fn verify_expr(file: &str, expr: &Expr, reports: &mut Vec<Report>) {
    match &expr.kind {
        ExprKind::Var(_) | ExprKind::Lit(_) | ExprKind::DictRef { .. } | ExprKind::GlobalRef { .. } => {}
        ExprKind::Lambda { body, .. } => verify_expr(file, body, reports),
        ExprKind::App { func, args } => {
            if !func.is_atom() {
                reports.push(
                    Report::new(Phase::Elaborate, "ELB006", "non-atomic callee in normalized core".to_owned())
                        .with_span(file, expr.span),
                );
            }
            verify_operands(file, expr, args, reports);
            verify_expr(file, func, reports);
            for arg in args {
                verify_expr(file, arg, reports);
            }
        }
        ExprKind::Intrinsic { args, .. } => {
            verify_operands(file, expr, args, reports);
            for arg in args {
                verify_expr(file, arg, reports);
            }
        }
        ExprKind::DictApp { dict, args, .. } => {
            verify_operands(file, expr, args, reports);
            verify_expr(file, dict, reports);
            for arg in args {
                verify_expr(file, arg, reports);
            }
        }
        ExprKind::Let { value, body, .. } => {
            verify_expr(file, value, reports);
            verify_expr(file, body, reports);
        }
        ExprKind::LetRec { bindings, body } => {
            for (_, value) in bindings {
                verify_expr(file, value, reports);
            }
            verify_expr(file, body, reports);
        }
        ExprKind::If { cond, then, els } => {
            verify_expr(file, cond, reports);
            verify_expr(file, then, reports);
            verify_expr(file, els, reports);
        }
        ExprKind::Match { scrutinee, arms } => {
            verify_expr(file, scrutinee, reports);
            for arm in arms {
                if let Some(guard) = &arm.guard {
                    verify_expr(file, guard, reports);
                }
                verify_expr(file, &arm.body, reports);
            }
        }
        ExprKind::Record(fields) | ExprKind::RecordUpdate { fields, .. } => {
            for (_, value) in fields {
                verify_expr(file, value, reports);
            }
            if let ExprKind::RecordUpdate { base, .. } = &expr.kind {
                verify_expr(file, base, reports);
            }
        }
        ExprKind::RecordAccess { base, .. } => verify_expr(file, base, reports),
        ExprKind::List(elems) | ExprKind::Tuple(elems) => {
            for elem in elems {
                verify_expr(file, elem, reports);
            }
        }
    }
}
