//! Lowers the surface AST into the core IR in A-Normal Form.
//!
//! Desugaring rules:
//! - operators become `Intrinsic` placeholders for dictionary lowering,
//!   except `&&`/`||` which become `If` (short-circuit);
//! - multi-parameter backslash lambdas curry into nested single-parameter
//!   lambdas; `func` declarations and literals keep their parameter lists;
//! - blocks become nested lets, `let`-bound lambdas become `LetRec`;
//! - non-atomic operands of applications and intrinsics are let-bound to
//!   fresh temporaries (`$tN`, unreachable from source syntax).

use crate::{
    anf::{self, AdtDef, AliasDef, CtorDef, InstanceDef, IntrinsicOp, Meta, NodeId, Program, ProgramImport, Stmt},
    diagnostic::{Phase, PhaseResult, Report},
    source::{Sid, Span},
    surface::{BinOp, Decl, Expr, ExprKind, File, FuncDecl, Literal, Pattern, PatternKind, TypeBody, TypeExpr, UnOp},
};

/// Lowers a parsed file to a core [`Program`], treating each import path
/// as its own identity (correct for `std/*` and project-absolute imports;
/// the loader-driven pipeline passes resolved identities instead).
pub fn elaborate(file_name: &str, identity: &str, file: &File) -> PhaseResult<Program> {
    let resolved: Vec<(String, Option<Vec<String>>)> = file
        .imports
        .iter()
        .map(|i| (i.path.clone(), i.symbols.clone()))
        .collect();
    elaborate_with_warnings(file_name, identity, file, &resolved).map(|(program, _)| program)
}

/// Lowers a file and returns warnings separately.
///
/// `resolved_imports` pairs each import (in file order) with its resolved
/// module identity — relative paths like `./util` resolve to identities
/// like `nested/util`, and global references must use the latter.
pub fn elaborate_with_warnings(
    file_name: &str,
    identity: &str,
    file: &File,
    resolved_imports: &[(String, Option<Vec<String>>)],
) -> PhaseResult<(Program, Vec<Report>)> {
    let mut ctx = Elaborator {
        file_name,
        identity,
        next_id: 0,
        next_temp: 0,
        reports: Vec::new(),
        adts: Vec::new(),
        scopes: Vec::new(),
        import_map: ahash::AHashMap::new(),
    };
    let program = ctx.lower_file(file, resolved_imports);
    let mut reports = ctx.reports;
    reports.extend(anf::verify_anf(file_name, &program));
    if reports.iter().any(Report::is_error) {
        Err(reports)
    } else {
        Ok((program, reports))
    }
}

struct Elaborator<'a> {
    file_name: &'a str,
    identity: &'a str,
    next_id: NodeId,
    next_temp: u32,
    reports: Vec<Report>,
    adts: Vec<AdtDef>,
    /// Lexical scope stack; names bound here stay `Var` nodes.
    scopes: Vec<std::collections::HashSet<String>>,
    /// Selectively imported symbol → providing module. Unshadowed uses
    /// lower to `GlobalRef`.
    import_map: ahash::AHashMap<String, String>,
}

impl Elaborator<'_> {
    fn fresh_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn push_scope(&mut self) {
        self.scopes.push(std::collections::HashSet::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().rev().any(|scope| scope.contains(name))
    }

    fn fresh_temp(&mut self) -> String {
        let name = format!("$t{}", self.next_temp);
        self.next_temp += 1;
        name
    }

    fn mk(&mut self, span: Span, kind: anf::ExprKind) -> anf::Expr {
        anf::Expr {
            id: self.fresh_id(),
            span,
            kind,
        }
    }

    fn error(&mut self, code: &str, span: Span, message: String) {
        self.reports
            .push(Report::new(Phase::Desugar, code, message).with_span(self.file_name, span));
    }

    fn lower_file(&mut self, file: &File, resolved_imports: &[(String, Option<Vec<String>>)]) -> Program {
        // ADTs first: constructor patterns are checked for exhaustiveness
        // against the module's own type declarations.
        let mut aliases = Vec::new();
        for decl in &file.decls {
            if let Decl::Type(t) = decl {
                match &t.body {
                    TypeBody::Sum(ctors) => {
                        self.adts.push(AdtDef {
                            name: t.name.clone(),
                            params: t.params.clone(),
                            ctors: ctors
                                .iter()
                                .map(|c| CtorDef {
                                    adt: t.name.clone(),
                                    name: c.name.clone(),
                                    fields: c.fields.clone(),
                                })
                                .collect(),
                            is_export: t.is_export,
                        });
                    }
                    TypeBody::Alias(body) => aliases.push(AliasDef {
                        name: t.name.clone(),
                        params: t.params.clone(),
                        body: body.clone(),
                        is_export: t.is_export,
                    }),
                    TypeBody::Record(fields) => aliases.push(AliasDef {
                        name: t.name.clone(),
                        params: t.params.clone(),
                        body: TypeExpr::Record(fields.clone()),
                        is_export: t.is_export,
                    }),
                }
            }
        }

        for (module, symbols) in resolved_imports {
            if let Some(symbols) = symbols {
                for symbol in symbols {
                    self.import_map.insert(symbol.clone(), module.clone());
                }
            }
        }

        // the file-level scope: declarations and this module's constructors
        self.push_scope();
        for decl in &file.decls {
            if let Decl::Func(f) = decl {
                self.declare(&f.name);
            }
        }
        let ctor_names: Vec<String> = self
            .adts
            .iter()
            .flat_map(|adt| adt.ctors.iter().map(|c| c.name.clone()))
            .collect();
        for name in ctor_names {
            self.declare(&name);
        }

        let mut decls = Vec::new();
        let mut instances = Vec::new();
        let mut tests = Vec::new();
        for decl in &file.decls {
            match decl {
                Decl::Func(f) => decls.push(self.lower_func_decl(f)),
                Decl::Type(_) => {}
                Decl::Class(_) => {
                    // class declarations describe methods for documentation
                    // and user instances; no runtime artifact is produced
                }
                Decl::Instance(instance) => {
                    // when the class is declared in this file, instance
                    // methods must match its signatures by name
                    if let Some(Decl::Class(class)) = file.decls.iter().find(
                        |d| matches!(d, Decl::Class(c) if c.name == instance.class),
                    ) {
                        for method in &instance.methods {
                            if !class.methods.iter().any(|(name, _)| *name == method.name) {
                                self.error(
                                    "DSG001",
                                    method.span,
                                    format!(
                                        "class {}[{}] declares no method `{}`",
                                        class.name, class.param, method.name
                                    ),
                                );
                            }
                        }
                    }
                    let head = type_head_name(&instance.head);
                    let methods = instance
                        .methods
                        .iter()
                        .map(|m| (m.name.clone(), self.lower_func_body(m)))
                        .collect();
                    instances.push(InstanceDef {
                        class: instance.class.clone(),
                        head,
                        methods,
                        span: instance.span,
                    });
                }
                Decl::Test(t) => {
                    // test bodies are lowered for validation but not kept;
                    // execution belongs to the external harness
                    let _ = self.lower_expr(&t.body);
                    tests.push(anf::TestMeta {
                        name: t.name.clone(),
                        property: t.is_property,
                        sid: Sid::new(self.identity, t.span),
                    });
                }
            }
        }

        let statements = self.lower_statements(&file.statements);
        self.pop_scope();

        Program {
            module: self.identity.to_owned(),
            imports: resolved_imports
                .iter()
                .map(|(module, symbols)| ProgramImport {
                    module: module.clone(),
                    symbols: symbols.clone(),
                })
                .collect(),
            adts: std::mem::take(&mut self.adts),
            aliases,
            decls,
            instances,
            statements,
            tests,
        }
    }

    fn lower_func_decl(&mut self, decl: &FuncDecl) -> anf::Decl {
        let expr = self.lower_func_body(decl);
        let annotation = func_annotation(decl);
        anf::Decl {
            name: decl.name.clone(),
            expr,
            meta: Meta {
                is_export: decl.is_export,
                is_pure: decl.effects.is_empty(),
                sid: Sid::new(self.identity, decl.span),
            },
            annotation,
            param_annotations: decl.params.iter().map(|p| p.annotation.clone()).collect(),
            effects: decl.effects.clone(),
        }
    }

    /// `func f(a, b) { body }` lowers to a single lambda with the full
    /// parameter list; zero-parameter functions become zero-ary lambdas.
    fn lower_func_body(&mut self, decl: &FuncDecl) -> anf::Expr {
        self.push_scope();
        let mut seen = std::collections::HashSet::new();
        for param in &decl.params {
            if !seen.insert(param.name.as_str()) {
                self.error(
                    "DSG003",
                    param.span,
                    format!("parameter `{}` is bound more than once", param.name),
                );
            }
            self.declare(&param.name);
        }
        let body = self.lower_expr(&decl.body);
        self.pop_scope();
        self.mk(
            decl.span,
            anf::ExprKind::Lambda {
                params: decl.params.iter().map(|p| p.name.clone()).collect(),
                body: Box::new(body),
            },
        )
    }

    fn lower_statements(&mut self, statements: &[Expr]) -> Vec<Stmt> {
        let mut lowered = Vec::new();
        for statement in statements {
            match &statement.kind {
                ExprKind::Let {
                    name,
                    annotation,
                    value,
                    body: None,
                } => {
                    let mut value = self.lower_expr(value);
                    if let Some(ty) = annotation {
                        value = self.annotate(value, ty.clone());
                    }
                    self.declare(name);
                    lowered.push(Stmt {
                        binder: Some(name.clone()),
                        expr: value,
                    });
                }
                _ => {
                    let expr = self.lower_expr(statement);
                    lowered.push(Stmt { binder: None, expr });
                }
            }
        }
        lowered
    }

    /// Wraps a value in an annotated no-op let so the annotation reaches
    /// the inference engine.
    fn annotate(&mut self, value: anf::Expr, ty: TypeExpr) -> anf::Expr {
        let span = value.span;
        let temp = self.fresh_temp();
        let var = self.mk(span, anf::ExprKind::Var(temp.clone()));
        self.mk(
            span,
            anf::ExprKind::Let {
                name: temp,
                annotation: Some(ty),
                value: Box::new(value),
                body: Box::new(var),
            },
        )
    }

    fn lower_expr(&mut self, expr: &Expr) -> anf::Expr {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Lit(lit) => self.mk(span, anf::ExprKind::Lit(lit.clone())),
            ExprKind::Var(name) => {
                if name == "_" {
                    self.error("DSG001", span, "`_` is not a value".to_owned());
                }
                if !self.is_local(name) {
                    if let Some(module) = self.import_map.get(name) {
                        let kind = anf::ExprKind::GlobalRef {
                            module: module.clone(),
                            name: name.clone(),
                        };
                        return self.mk(span, kind);
                    }
                }
                self.mk(span, anf::ExprKind::Var(name.clone()))
            }
            ExprKind::Unary { op, expr: operand } => {
                let intrinsic = match op {
                    UnOp::Neg => IntrinsicOp::Neg,
                    UnOp::Not => IntrinsicOp::Not,
                };
                self.lower_intrinsic(span, intrinsic, &[&**operand])
            }
            ExprKind::Binary { op, lhs, rhs } => match op {
                BinOp::And => {
                    let cond = self.lower_expr(lhs);
                    let then = self.lower_expr(rhs);
                    let els = self.mk(span, anf::ExprKind::Lit(Literal::Bool(false)));
                    self.mk(
                        span,
                        anf::ExprKind::If {
                            cond: Box::new(cond),
                            then: Box::new(then),
                            els: Box::new(els),
                        },
                    )
                }
                BinOp::Or => {
                    let cond = self.lower_expr(lhs);
                    let then = self.mk(span, anf::ExprKind::Lit(Literal::Bool(true)));
                    let els = self.lower_expr(rhs);
                    self.mk(
                        span,
                        anf::ExprKind::If {
                            cond: Box::new(cond),
                            then: Box::new(then),
                            els: Box::new(els),
                        },
                    )
                }
                other => {
                    let intrinsic = binop_intrinsic(*other);
                    self.lower_intrinsic(span, intrinsic, &[&**lhs, &**rhs])
                }
            },
            ExprKind::Lambda { params, body } => {
                // multi-parameter backslash lambdas curry
                self.push_scope();
                for param in params {
                    self.declare(param);
                }
                let mut lowered = self.lower_expr(body);
                self.pop_scope();
                for param in params.iter().rev() {
                    lowered = self.mk(
                        span,
                        anf::ExprKind::Lambda {
                            params: vec![param.clone()],
                            body: Box::new(lowered),
                        },
                    );
                }
                lowered
            }
            ExprKind::FuncLit { params, body, .. } => {
                self.push_scope();
                for param in params {
                    self.declare(&param.name);
                }
                let lowered = self.lower_expr(body);
                self.pop_scope();
                self.mk(
                    span,
                    anf::ExprKind::Lambda {
                        params: params.iter().map(|p| p.name.clone()).collect(),
                        body: Box::new(lowered),
                    },
                )
            }
            ExprKind::App { func, args } => {
                let mut binds = Vec::new();
                let func_atom = self.lower_atom(func, &mut binds);
                let arg_atoms: Vec<_> = args.iter().map(|a| self.lower_atom(a, &mut binds)).collect();
                let app = self.mk(
                    span,
                    anf::ExprKind::App {
                        func: Box::new(func_atom),
                        args: arg_atoms,
                    },
                );
                self.wrap_binds(binds, app)
            }
            ExprKind::Let {
                name,
                annotation,
                value,
                body,
            } => {
                let Some(body) = body else {
                    self.error("DSG001", span, "`let` without `in` is only allowed inside a block".to_owned());
                    return self.mk(span, anf::ExprKind::Lit(Literal::Unit));
                };
                // a recursive function may reference its own name
                let recursive = matches!(value.kind, ExprKind::Lambda { .. } | ExprKind::FuncLit { .. });
                self.push_scope();
                if recursive {
                    self.declare(name);
                }
                let value_core = self.lower_expr(value);
                self.declare(name);
                let body_core = self.lower_expr(body);
                self.pop_scope();
                self.bind(span, name, annotation.clone(), value_core, body_core)
            }
            ExprKind::LetRec { bindings, body } => {
                self.push_scope();
                for (name, _) in bindings {
                    self.declare(name);
                }
                let lowered: Vec<_> = bindings
                    .iter()
                    .map(|(name, value)| (name.clone(), self.lower_expr(value)))
                    .collect();
                let body_core = self.lower_expr(body);
                self.pop_scope();
                self.mk(
                    span,
                    anf::ExprKind::LetRec {
                        bindings: lowered,
                        body: Box::new(body_core),
                    },
                )
            }
            ExprKind::If { cond, then, els } => {
                let cond = self.lower_expr(cond);
                let then = self.lower_expr(then);
                let els = self.lower_expr(els);
                self.mk(
                    span,
                    anf::ExprKind::If {
                        cond: Box::new(cond),
                        then: Box::new(then),
                        els: Box::new(els),
                    },
                )
            }
            ExprKind::Match { scrutinee, arms } => {
                let scrutinee_core = self.lower_expr(scrutinee);
                // arms after the first unguarded irrefutable pattern can
                // never run
                if let Some(position) = arms
                    .iter()
                    .position(|arm| arm.guard.is_none() && surface_pattern_is_irrefutable(&arm.pattern))
                {
                    for unreachable in &arms[position + 1..] {
                        self.reports.push(
                            Report::warning(Phase::Elaborate, "ELB005", "match arm is unreachable".to_owned())
                                .with_span(self.file_name, unreachable.span),
                        );
                    }
                }
                let lowered: Vec<_> = arms
                    .iter()
                    .map(|arm| {
                        self.push_scope();
                        let mut binders = Vec::new();
                        collect_pattern_binders(&arm.pattern, &mut binders);
                        for binder in &binders {
                            self.declare(binder);
                        }
                        let arm = anf::MatchArm {
                            pattern: lower_pattern(&arm.pattern),
                            guard: arm.guard.as_ref().map(|g| self.lower_expr(g)),
                            body: self.lower_expr(&arm.body),
                        };
                        self.pop_scope();
                        arm
                    })
                    .collect();
                self.check_exhaustiveness(span, &lowered);
                self.mk(
                    span,
                    anf::ExprKind::Match {
                        scrutinee: Box::new(scrutinee_core),
                        arms: lowered,
                    },
                )
            }
            ExprKind::List(elems) => {
                let elems = elems.iter().map(|e| self.lower_expr(e)).collect();
                self.mk(span, anf::ExprKind::List(elems))
            }
            ExprKind::Tuple(elems) => {
                let elems = elems.iter().map(|e| self.lower_expr(e)).collect();
                self.mk(span, anf::ExprKind::Tuple(elems))
            }
            ExprKind::Record(fields) => {
                let fields = fields.iter().map(|(n, e)| (n.clone(), self.lower_expr(e))).collect();
                self.mk(span, anf::ExprKind::Record(fields))
            }
            ExprKind::FieldAccess { base, field } => {
                let base = self.lower_expr(base);
                self.mk(
                    span,
                    anf::ExprKind::RecordAccess {
                        base: Box::new(base),
                        field: field.clone(),
                    },
                )
            }
            ExprKind::RecordUpdate { base, fields } => {
                let base = self.lower_expr(base);
                let fields = fields.iter().map(|(n, e)| (n.clone(), self.lower_expr(e))).collect();
                self.mk(
                    span,
                    anf::ExprKind::RecordUpdate {
                        base: Box::new(base),
                        fields,
                    },
                )
            }
            ExprKind::Block(items) => self.lower_block(span, items),
            ExprKind::Send { .. } | ExprKind::Recv(_) => {
                self.error("DSG002", span, "channel operations are not supported".to_owned());
                self.mk(span, anf::ExprKind::Lit(Literal::Unit))
            }
            ExprKind::Quasiquote(_) => {
                self.error("DSG002", span, "quasiquote is not supported".to_owned());
                self.mk(span, anf::ExprKind::Lit(Literal::Unit))
            }
            ExprKind::Error => {
                self.error("DSG001", span, "cannot lower a source tree containing parse errors".to_owned());
                self.mk(span, anf::ExprKind::Lit(Literal::Unit))
            }
        }
    }

    /// Binds `name = value` over `body`, promoting lambda values to
    /// `LetRec` so self-reference works.
    fn bind(
        &mut self,
        span: Span,
        name: &str,
        annotation: Option<TypeExpr>,
        value: anf::Expr,
        body: anf::Expr,
    ) -> anf::Expr {
        if matches!(value.kind, anf::ExprKind::Lambda { .. }) {
            self.mk(
                span,
                anf::ExprKind::LetRec {
                    bindings: vec![(name.to_owned(), value)],
                    body: Box::new(body),
                },
            )
        } else {
            self.mk(
                span,
                anf::ExprKind::Let {
                    name: name.to_owned(),
                    annotation,
                    value: Box::new(value),
                    body: Box::new(body),
                },
            )
        }
    }

    /// `{e1; …; en}` → nested lets; the final expression is the value.
    /// Consecutive `let`-bound lambdas merge into one `LetRec` group so
    /// mutual recursion inside a block works.
    fn lower_block(&mut self, span: Span, items: &[Expr]) -> anf::Expr {
        self.push_scope();
        let lowered = self.lower_seq(span, items);
        self.pop_scope();
        lowered
    }

    fn lower_seq(&mut self, span: Span, items: &[Expr]) -> anf::Expr {
        let Some((first, rest)) = items.split_first() else {
            return self.mk(span, anf::ExprKind::Lit(Literal::Unit));
        };
        // final item: its value is the block's value; a trailing
        // binder-let yields Unit
        if rest.is_empty() {
            return match &first.kind {
                ExprKind::Let {
                    name,
                    annotation,
                    value,
                    body: None,
                } => {
                    self.declare(name);
                    let value_core = self.lower_expr(value);
                    let unit = self.mk(first.span, anf::ExprKind::Lit(Literal::Unit));
                    self.bind(first.span, name, annotation.clone(), value_core, unit)
                }
                _ => self.lower_expr(first),
            };
        }
        match &first.kind {
            ExprKind::Let {
                name,
                annotation,
                value,
                body: None,
            } => {
                if is_function_literal(value) {
                    // greedily collect the run of adjacent function lets:
                    // one LetRec group supports mutual recursion
                    let mut group_items = vec![(name, value, first.span)];
                    let mut remaining = rest;
                    while let [next, tail @ ..] = remaining {
                        let ExprKind::Let {
                            name,
                            value,
                            body: None,
                            ..
                        } = &next.kind
                        else {
                            break;
                        };
                        if !is_function_literal(value) {
                            break;
                        }
                        group_items.push((name, value, next.span));
                        remaining = tail;
                    }
                    for (name, _, _) in &group_items {
                        self.declare(name);
                    }
                    let bindings: Vec<(String, anf::Expr)> = group_items
                        .iter()
                        .map(|(name, value, _)| ((*name).clone(), self.lower_expr(value)))
                        .collect();
                    let body = self.lower_seq(span, remaining);
                    self.mk(
                        first.span,
                        anf::ExprKind::LetRec {
                            bindings,
                            body: Box::new(body),
                        },
                    )
                } else {
                    let value_core = self.lower_expr(value);
                    self.declare(name);
                    let body = self.lower_seq(span, rest);
                    self.mk(
                        first.span,
                        anf::ExprKind::Let {
                            name: name.clone(),
                            annotation: annotation.clone(),
                            value: Box::new(value_core),
                            body: Box::new(body),
                        },
                    )
                }
            }
            _ => {
                let value = self.lower_expr(first);
                let binder = self.fresh_temp();
                let body = self.lower_seq(span, rest);
                self.mk(
                    first.span,
                    anf::ExprKind::Let {
                        name: binder,
                        annotation: None,
                        value: Box::new(value),
                        body: Box::new(body),
                    },
                )
            }
        }
    }

    fn lower_intrinsic(&mut self, span: Span, op: IntrinsicOp, operands: &[&Expr]) -> anf::Expr {
        let mut binds = Vec::new();
        let args: Vec<_> = operands.iter().map(|e| self.lower_atom(e, &mut binds)).collect();
        let intrinsic = self.mk(span, anf::ExprKind::Intrinsic { op, args });
        self.wrap_binds(binds, intrinsic)
    }

    /// Lowers an expression to an atom, let-binding it to a fresh
    /// temporary when it is not one already.
    fn lower_atom(&mut self, expr: &Expr, binds: &mut Vec<(String, anf::Expr)>) -> anf::Expr {
        let lowered = self.lower_expr(expr);
        if lowered.is_atom() {
            lowered
        } else {
            let temp = self.fresh_temp();
            let span = lowered.span;
            binds.push((temp.clone(), lowered));
            self.mk(span, anf::ExprKind::Var(temp))
        }
    }

    fn wrap_binds(&mut self, binds: Vec<(String, anf::Expr)>, body: anf::Expr) -> anf::Expr {
        let mut result = body;
        for (name, value) in binds.into_iter().rev() {
            let span = value.span;
            result = self.mk(
                span,
                anf::ExprKind::Let {
                    name,
                    annotation: None,
                    value: Box::new(value),
                    body: Box::new(result),
                },
            );
        }
        result
    }

    /// Best-effort exhaustiveness warning (`ELB004`). Only warns when the
    /// arms demonstrably miss a case: a known ADT with uncovered
    /// constructors, booleans missing a case, or literal-only arms.
    fn check_exhaustiveness(&mut self, span: Span, arms: &[anf::MatchArm]) {
        let has_catch_all = arms
            .iter()
            .any(|arm| arm.guard.is_none() && pattern_is_irrefutable(&arm.pattern));
        if has_catch_all {
            return;
        }
        let unguarded: Vec<_> = arms.iter().filter(|a| a.guard.is_none()).collect();
        // constructor coverage against the module's own ADTs
        let ctor_names: Vec<&str> = unguarded
            .iter()
            .filter_map(|arm| match &arm.pattern.kind {
                anf::PatternKind::Ctor { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        if !ctor_names.is_empty() {
            if let Some(adt) = self
                .adts
                .iter()
                .find(|adt| adt.ctors.iter().any(|c| c.name == ctor_names[0]))
            {
                let missing: Vec<_> = adt
                    .ctors
                    .iter()
                    .filter(|c| !ctor_names.contains(&c.name.as_str()))
                    .map(|c| c.name.clone())
                    .collect();
                if !missing.is_empty() {
                    self.reports.push(
                        Report::warning(
                            Phase::Elaborate,
                            "ELB004",
                            format!("match may be non-exhaustive; unhandled: {}", missing.join(", ")),
                        )
                        .with_span(self.file_name, span),
                    );
                }
                return;
            }
        }
        // boolean coverage
        let bools: Vec<bool> = unguarded
            .iter()
            .filter_map(|arm| match &arm.pattern.kind {
                anf::PatternKind::Lit(Literal::Bool(b)) => Some(*b),
                _ => None,
            })
            .collect();
        if !bools.is_empty() {
            if bools.contains(&true) && bools.contains(&false) {
                return;
            }
            self.reports.push(
                Report::warning(Phase::Elaborate, "ELB004", "match may be non-exhaustive".to_owned())
                    .with_span(self.file_name, span),
            );
            return;
        }
        // `[]` plus `[x, ...xs]` covers all lists
        let covers_empty = unguarded.iter().any(|arm| {
            matches!(&arm.pattern.kind, anf::PatternKind::List { items, rest: None } if items.is_empty())
        });
        let covers_cons = unguarded.iter().any(|arm| {
            matches!(
                &arm.pattern.kind,
                anf::PatternKind::List { items, rest: Some(_) }
                    if items.len() == 1 && pattern_is_irrefutable(&items[0])
            )
        });
        if covers_empty && covers_cons {
            return;
        }
        if unguarded
            .iter()
            .all(|arm| matches!(&arm.pattern.kind, anf::PatternKind::Lit(_) | anf::PatternKind::List { .. }))
        {
            self.reports.push(
                Report::warning(Phase::Elaborate, "ELB004", "match may be non-exhaustive".to_owned())
                    .with_span(self.file_name, span),
            );
        }
    }
}

fn is_function_literal(expr: &Expr) -> bool {
    matches!(expr.kind, ExprKind::Lambda { .. } | ExprKind::FuncLit { .. })
}

fn collect_pattern_binders(pattern: &Pattern, out: &mut Vec<String>) {
    match &pattern.kind {
        PatternKind::Wildcard | PatternKind::Lit(_) => {}
        PatternKind::Var(name) => out.push(name.clone()),
        PatternKind::Ctor { args, .. } | PatternKind::Tuple(args) => {
            for arg in args {
                collect_pattern_binders(arg, out);
            }
        }
        PatternKind::List { items, rest } => {
            for item in items {
                collect_pattern_binders(item, out);
            }
            if let Some(rest) = rest {
                if rest != "_" {
                    out.push(rest.clone());
                }
            }
        }
        PatternKind::Record { fields, .. } => {
            for (_, sub) in fields {
                collect_pattern_binders(sub, out);
            }
        }
        PatternKind::Binding { pattern, name } => {
            out.push(name.clone());
            collect_pattern_binders(pattern, out);
        }
    }
}

fn surface_pattern_is_irrefutable(pattern: &Pattern) -> bool {
    match &pattern.kind {
        PatternKind::Wildcard | PatternKind::Var(_) => true,
        PatternKind::Binding { pattern, .. } => surface_pattern_is_irrefutable(pattern),
        PatternKind::Tuple(elems) => elems.iter().all(surface_pattern_is_irrefutable),
        _ => false,
    }
}

fn pattern_is_irrefutable(pattern: &anf::Pattern) -> bool {
    match &pattern.kind {
        anf::PatternKind::Wildcard | anf::PatternKind::Var(_) => true,
        anf::PatternKind::Binding { pattern, .. } => pattern_is_irrefutable(pattern),
        anf::PatternKind::Tuple(elems) => elems.iter().all(pattern_is_irrefutable),
        _ => false,
    }
}

fn lower_pattern(pattern: &Pattern) -> anf::Pattern {
    let kind = match &pattern.kind {
        PatternKind::Wildcard => anf::PatternKind::Wildcard,
        PatternKind::Var(name) => anf::PatternKind::Var(name.clone()),
        PatternKind::Lit(lit) => anf::PatternKind::Lit(lit.clone()),
        PatternKind::Ctor { name, args } => anf::PatternKind::Ctor {
            name: name.clone(),
            args: args.iter().map(lower_pattern).collect(),
        },
        PatternKind::Tuple(elems) => anf::PatternKind::Tuple(elems.iter().map(lower_pattern).collect()),
        PatternKind::List { items, rest } => anf::PatternKind::List {
            items: items.iter().map(lower_pattern).collect(),
            rest: rest.clone(),
        },
        PatternKind::Record { fields, open } => anf::PatternKind::Record {
            fields: fields.iter().map(|(n, p)| (n.clone(), lower_pattern(p))).collect(),
            open: *open,
        },
        PatternKind::Binding { pattern, name } => anf::PatternKind::Binding {
            pattern: Box::new(lower_pattern(pattern)),
            name: name.clone(),
        },
    };
    anf::Pattern {
        span: pattern.span,
        kind,
    }
}

fn binop_intrinsic(op: BinOp) -> IntrinsicOp {
    match op {
        BinOp::Add => IntrinsicOp::Add,
        BinOp::Sub => IntrinsicOp::Sub,
        BinOp::Mul => IntrinsicOp::Mul,
        BinOp::Div => IntrinsicOp::Div,
        BinOp::Mod => IntrinsicOp::Mod,
        BinOp::Concat => IntrinsicOp::Concat,
        BinOp::Eq => IntrinsicOp::Eq,
        BinOp::Ne => IntrinsicOp::Ne,
        BinOp::Lt => IntrinsicOp::Lt,
        BinOp::Le => IntrinsicOp::Le,
        BinOp::Gt => IntrinsicOp::Gt,
        BinOp::Ge => IntrinsicOp::Ge,
        BinOp::And | BinOp::Or => unreachable!("short-circuit operators desugar to If"),
    }
}

/// Builds a function type annotation when every parameter is annotated and
/// a return type is present; partial annotations yield `None` and the
/// inference engine fills the gaps.
fn func_annotation(decl: &FuncDecl) -> Option<TypeExpr> {
    let ret = decl.ret.clone()?;
    let params: Option<Vec<TypeExpr>> = decl.params.iter().map(|p| p.annotation.clone()).collect();
    Some(TypeExpr::Func {
        params: params?,
        ret: Box::new(ret),
        effects: decl.effects.clone(),
    })
}

/// Outermost constructor name of a type expression, for instance heads
/// and dictionary keys.
#[must_use]
pub fn type_head_name(ty: &TypeExpr) -> String {
    match ty {
        TypeExpr::Con(name) => name.clone(),
        TypeExpr::Var(name) => name.clone(),
        TypeExpr::App { ctor, .. } => ctor.clone(),
        TypeExpr::List(_) => "List".to_owned(),
        TypeExpr::Tuple(_) => "Tuple".to_owned(),
        TypeExpr::Record(_) => "Record".to_owned(),
        TypeExpr::Func { .. } => "Func".to_owned(),
        TypeExpr::Unit => "Unit".to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_text;

    fn lower(source: &str) -> Program {
        let (file, reports) = parse_text("test.ail", source);
        assert!(reports.iter().all(|r| !r.is_error()), "parse failed: {reports:?}");
        elaborate("test.ail", "test", &file).expect("elaboration failed")
    }

    fn first_decl(program: &Program) -> &anf::Expr {
        &program.decls[0].expr
    }

    #[test]
    fn operator_becomes_intrinsic_with_atomic_args() {
        let program = lower("func add3(x: Int) -> Int { x + 1 + 2 }");
        let errors = anf::verify_anf("test.ail", &program);
        assert!(errors.is_empty(), "{errors:?}");
    }

    #[test]
    fn nested_call_operands_are_let_bound() {
        let program = lower("func f(n: Int) -> Int { g(h(n), 1) }");
        // the outer application must receive atoms only
        let anf::ExprKind::Lambda { body, .. } = &first_decl(&program).kind else {
            panic!("expected lambda")
        };
        let anf::ExprKind::Let { value, body: inner, .. } = &body.kind else {
            panic!("expected let-bound temp, got {:?}", body.kind)
        };
        assert!(matches!(value.kind, anf::ExprKind::App { .. }));
        let anf::ExprKind::App { func, args } = &inner.kind else {
            panic!("expected app")
        };
        assert!(func.is_atom());
        assert!(args.iter().all(anf::Expr::is_atom));
    }

    #[test]
    fn short_circuit_desugars_to_if() {
        let program = lower("func f(a: Bool, b: Bool) -> Bool { a && b }");
        let anf::ExprKind::Lambda { body, .. } = &first_decl(&program).kind else {
            panic!()
        };
        assert!(matches!(body.kind, anf::ExprKind::If { .. }));
    }

    #[test]
    fn multi_param_backslash_lambda_curries() {
        let program = lower(r"func f() -> Int { (\x y. x)(1, 2) }");
        // outermost lambda is the decl; inside, the lambda literal currys
        let errors = anf::verify_anf("test.ail", &program);
        assert!(errors.is_empty());
    }

    #[test]
    fn let_bound_lambda_becomes_letrec() {
        let program = lower(r"func f() -> Int { let g = \n. n in g(1) }");
        let anf::ExprKind::Lambda { body, .. } = &first_decl(&program).kind else {
            panic!()
        };
        assert!(matches!(body.kind, anf::ExprKind::LetRec { .. }));
    }

    #[test]
    fn block_sequences_into_lets() {
        let program = lower("func f() -> Int { let x = 1; x + 1 }");
        let errors = anf::verify_anf("test.ail", &program);
        assert!(errors.is_empty());
    }

    #[test]
    fn purity_derived_from_effect_row() {
        let program = lower("export func pure1() -> Int { 1 }\nexport func eff() -> Int ! {IO} { 1 }");
        assert!(program.decls[0].meta.is_pure);
        assert!(!program.decls[1].meta.is_pure);
        assert!(program.decls[0].meta.is_export);
    }

    #[test]
    fn send_is_rejected() {
        let (file, _) = parse_text("test.ail", "func f() -> Int { ch <- 1; 0 }");
        let result = elaborate("test.ail", "test", &file);
        let reports = result.expect_err("send must be rejected");
        assert!(reports.iter().any(|r| r.code == "DSG002"));
    }

    #[test]
    fn quasiquote_is_rejected() {
        let (file, _) = parse_text("test.ail", "func f() -> Int { `g(1) }");
        let result = elaborate("test.ail", "test", &file);
        let reports = result.expect_err("quasiquote must be rejected");
        assert!(reports.iter().any(|r| r.code == "DSG002"));
    }

    #[test]
    fn missing_adt_ctor_warns_elb004() {
        let source = "type Color = Red | Green | Blue\nfunc f(c: Color) -> Int { match c { Red => 1, Green => 2 } }";
        let (file, _) = parse_text("test.ail", source);
        let (_, warnings) = elaborate_with_warnings("test.ail", "test", &file, &[]).unwrap();
        assert!(warnings.iter().any(|r| r.code == "ELB004" && !r.is_error()));
    }

    #[test]
    fn full_adt_coverage_does_not_warn() {
        let source = "type Color = Red | Green\nfunc f(c: Color) -> Int { match c { Red => 1, Green => 2 } }";
        let (file, _) = parse_text("test.ail", source);
        let (_, warnings) = elaborate_with_warnings("test.ail", "test", &file, &[]).unwrap();
        assert!(!warnings.iter().any(|r| r.code == "ELB004"));
    }

    #[test]
    fn list_nil_cons_coverage_does_not_warn() {
        let source = "func len(xs: [Int]) -> Int { match xs { [] => 0, [x, ...rest] => 1 + len(rest) } }";
        let (file, _) = parse_text("test.ail", source);
        let (_, warnings) = elaborate_with_warnings("test.ail", "test", &file, &[]).unwrap();
        assert!(!warnings.iter().any(|r| r.code == "ELB004"));
    }
}
