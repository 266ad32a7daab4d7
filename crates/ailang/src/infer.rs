//! Type inference: algorithm W extended with qualified types, row
//! polymorphism over records, effect rows, and principled defaulting.
//!
//! Inference walks the core IR. Overloaded intrinsics generate class
//! constraints keyed by their node id; after unification a resolution pass
//! checks instances, runs the defaulting fixpoint (`Num` → `Int`,
//! `Fractional` → `Float`), and publishes a resolved-constraint table that
//! op-lowering consumes. Declarations are generalized per strongly
//! connected component of the call graph, so mutual recursion types
//! correctly while helpers stay polymorphic for later declarations.

use std::collections::{BTreeMap, BTreeSet};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    anf::{Expr, ExprKind, IntrinsicOp, NodeId, Pattern, PatternKind, Program},
    dict::{InstanceRegistry, ResolvedConstraint, class_def},
    diagnostic::{Phase, PhaseResult, Report},
    source::Span,
    surface::{Literal, TypeExpr},
    types::{ClassConstraint, Kind, Row, Scheme, Subst, TyVar, Type, from_type_expr},
};

/// Effects performed by evaluating an expression.
pub type Effects = BTreeSet<String>;

/// A constructor known to the type checker.
#[derive(Debug, Clone)]
pub struct CtorInfo {
    pub adt: String,
    pub params: Vec<String>,
    /// Field types, possibly containing `Var` over `params`.
    pub fields: Vec<Type>,
}

impl CtorInfo {
    #[must_use]
    pub fn arity(&self) -> usize {
        self.fields.len()
    }
}

/// Types visible to a module from outside: builtin and imported value
/// schemes, qualified globals, and constructors from dependencies.
#[derive(Debug, Default, Clone)]
pub struct ExternalTypes {
    pub names: AHashMap<String, Scheme>,
    pub globals: AHashMap<(String, String), Scheme>,
    pub ctors: AHashMap<String, CtorInfo>,
}

/// Everything the solver publishes for one module.
#[derive(Debug)]
pub struct ModuleTypes {
    /// Generalized, canonical scheme per declaration, in source order.
    pub decl_schemes: IndexMap<String, Scheme>,
    /// Per-intrinsic resolved constraint heads, consumed by op-lowering.
    pub resolved: AHashMap<NodeId, ResolvedConstraint>,
    /// Non-fatal reports (defaulting notes surface through `TC007` only).
    pub warnings: Vec<Report>,
}

/// Scope-stacked environment of schemes.
#[derive(Debug)]
struct TypeEnv {
    scopes: Vec<AHashMap<String, Scheme>>,
}

impl TypeEnv {
    fn new(base: AHashMap<String, Scheme>) -> Self {
        Self { scopes: vec![base] }
    }

    fn push(&mut self) {
        self.scopes.push(AHashMap::new());
    }

    fn pop(&mut self) {
        self.scopes.pop();
    }

    fn insert(&mut self, name: impl Into<String>, scheme: Scheme) {
        self.scopes
            .last_mut()
            .expect("env always has a scope")
            .insert(name.into(), scheme);
    }

    fn lookup(&self, name: &str) -> Option<&Scheme> {
        self.scopes.iter().rev().find_map(|scope| scope.get(name))
    }

    /// Free variables of every scheme in scope, under the substitution.
    fn free_vars(&self, subst: &Subst) -> BTreeSet<String> {
        self.free_vars_except(subst, &BTreeSet::new())
    }

    /// Like [`Self::free_vars`], but ignores the named bindings — used at a
    /// recursive-group boundary where the group's own monomorphic
    /// pre-bindings must not block their own generalization.
    fn free_vars_except(&self, subst: &Subst, exclude: &BTreeSet<String>) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for scope in &self.scopes {
            for (name, scheme) in scope {
                if exclude.contains(name) {
                    continue;
                }
                let applied = subst.apply(&scheme.ty);
                for var in applied.free_vars() {
                    if !scheme.vars.contains(&var) {
                        out.insert(var.name);
                    }
                }
            }
        }
        out
    }
}

/// A deferred class constraint.
#[derive(Debug, Clone)]
struct Pending {
    class: String,
    ty: Type,
    /// Intrinsic node that generated the constraint, when any.
    node: Option<NodeId>,
    span: Span,
}

/// Infers types for a whole module.
pub fn infer_module(
    file: &str,
    program: &Program,
    registry: &InstanceRegistry,
    externals: &ExternalTypes,
) -> PhaseResult<ModuleTypes> {
    let mut ctx = Infer {
        file,
        counter: 0,
        subst: Subst::default(),
        pending: Vec::new(),
        resolved: AHashMap::new(),
        reports: Vec::new(),
        registry,
        ctors: AHashMap::new(),
        adt_arities: AHashMap::new(),
        aliases: AHashMap::new(),
        globals: externals.globals.clone(),
        quantified: BTreeSet::new(),
        defaulting_trace: Vec::new(),
    };
    ctx.index_adts(program, externals);

    let mut env = TypeEnv::new(externals.names.clone());
    // constructors are callable values
    let ctor_names: Vec<String> = ctx.ctors.keys().cloned().collect();
    for name in ctor_names {
        let scheme = ctx.ctor_scheme(&name);
        env.insert(name, scheme);
    }

    let decl_order = decl_sccs(program);

    // pre-bind every declaration, then generalize per SCC. Annotated
    // declarations pre-bind with their annotation so callers inside the
    // same recursive group see the declared effects and types.
    let mut decl_vars: AHashMap<String, Type> = AHashMap::new();
    for decl in &program.decls {
        let ty = match &decl.annotation {
            Some(annotation) => {
                let mut vars = AHashMap::new();
                ctx.annotation_type(annotation, decl.expr.span, &mut vars)
            }
            None => ctx.fresh_star(),
        };
        env.insert(decl.name.clone(), Scheme::mono(ty.clone()));
        decl_vars.insert(decl.name.clone(), ty);
    }
    // module-level `let` statements bind names declarations may read;
    // pre-bind them monomorphically too
    let mut stmt_vars: AHashMap<String, Type> = AHashMap::new();
    for statement in &program.statements {
        if let Some(binder) = &statement.binder {
            let var = ctx.fresh_star();
            env.insert(binder.clone(), Scheme::mono(var.clone()));
            stmt_vars.insert(binder.clone(), var);
        }
    }

    let mut decl_schemes: IndexMap<String, Scheme> = IndexMap::new();
    for group in &decl_order {
        for index in group {
            let decl = &program.decls[*index];
            let declared = decl_vars[&decl.name].clone();
            let inferred = ctx.infer_decl(&mut env, decl);
            ctx.unify(&declared, &inferred, decl.expr.span);
        }
        // group boundary: generalize every member, ignoring the group's
        // own monomorphic pre-bindings
        let group_names: BTreeSet<String> = group.iter().map(|i| program.decls[*i].name.clone()).collect();
        for index in group {
            let decl = &program.decls[*index];
            let ty = ctx.subst.apply(&decl_vars[&decl.name]);
            let scheme = ctx.generalize_excluding(&env, &group_names, ty);
            env.insert(decl.name.clone(), scheme);
        }
    }

    // instance method bodies participate in the same constraint pool
    for instance in &program.instances {
        for (_, body) in &instance.methods {
            let _ = ctx.infer_expr(&mut env, body);
        }
    }

    // top-level statements run under the generalized declarations
    for statement in &program.statements {
        let (ty, _effects) = ctx.infer_expr(&mut env, &statement.expr);
        if let Some(binder) = &statement.binder {
            if let Some(var) = stmt_vars.get(binder) {
                ctx.unify(var, &ty, statement.expr.span);
            }
        }
    }

    ctx.resolve_constraints();

    // publish final schemes after defaulting flowed back into the subst
    for decl in &program.decls {
        let ty = ctx.subst.apply(&decl_vars[&decl.name]);
        let scheme = ctx.generalize(&env, ty);
        decl_schemes.insert(decl.name.clone(), scheme.canonicalize());
    }

    let (errors, warnings): (Vec<_>, Vec<_>) = ctx.reports.into_iter().partition(Report::is_error);
    if errors.is_empty() {
        Ok(ModuleTypes {
            decl_schemes,
            resolved: ctx.resolved,
            warnings,
        })
    } else {
        Err(errors)
    }
}

struct Infer<'a> {
    file: &'a str,
    counter: u32,
    subst: Subst,
    pending: Vec<Pending>,
    resolved: AHashMap<NodeId, ResolvedConstraint>,
    reports: Vec<Report>,
    registry: &'a InstanceRegistry,
    ctors: AHashMap<String, CtorInfo>,
    adt_arities: AHashMap<String, usize>,
    aliases: AHashMap<String, (Vec<String>, TypeExpr)>,
    globals: AHashMap<(String, String), Scheme>,
    /// Variables quantified by some generalization. Constraints over these
    /// stay polymorphic: they are served by the dynamic fallback instance
    /// rather than defaulted.
    quantified: BTreeSet<String>,
    defaulting_trace: Vec<String>,
}

impl Infer<'_> {
    // ── plumbing ───────────────────────────────────────────────────────

    fn fresh_star(&mut self) -> Type {
        let name = format!("t{}", self.counter);
        self.counter += 1;
        Type::Var(TyVar::star(name))
    }

    fn fresh_row_var(&mut self, kind: Kind) -> TyVar {
        let prefix = if kind == Kind::EffectRow { "e" } else { "r" };
        let name = format!("{prefix}{}", self.counter);
        self.counter += 1;
        TyVar { name, kind }
    }

    fn error(&mut self, code: &str, span: Span, message: String) {
        self.reports
            .push(Report::new(Phase::Typecheck, code, message).with_span(self.file, span));
    }

    fn index_adts(&mut self, program: &Program, externals: &ExternalTypes) {
        self.ctors = externals.ctors.clone();
        for alias in &program.aliases {
            self.aliases
                .insert(alias.name.clone(), (alias.params.clone(), alias.body.clone()));
        }
        for adt in &program.adts {
            self.adt_arities.insert(adt.name.clone(), adt.params.len());
            for ctor in &adt.ctors {
                let fields = ctor
                    .fields
                    .iter()
                    .map(|f| {
                        let mut lookup = |name: &str| Type::Var(TyVar::star(name));
                        from_type_expr(f, &mut lookup)
                    })
                    .collect();
                self.ctors.insert(
                    ctor.name.clone(),
                    CtorInfo {
                        adt: adt.name.clone(),
                        params: adt.params.clone(),
                        fields,
                    },
                );
            }
        }
        for info in externals.ctors.values() {
            self.adt_arities.entry(info.adt.clone()).or_insert(info.params.len());
        }
    }

    /// The result type of an ADT given instantiated parameter types.
    fn adt_result(adt: &str, params: &[String], args: &[Type]) -> Type {
        if params.is_empty() {
            Type::Con(adt.to_owned())
        } else {
            Type::App {
                ctor: adt.to_owned(),
                args: args.to_vec(),
            }
        }
    }

    /// A constructor as a callable scheme: `Some : forall a. (a) -> Option[a]`;
    /// nullary constructors are values of the ADT type directly.
    fn ctor_scheme(&mut self, name: &str) -> Scheme {
        let info = self.ctors[name].clone();
        let vars: Vec<TyVar> = info.params.iter().map(|p| TyVar::star(p.clone())).collect();
        let args: Vec<Type> = vars.iter().map(|v| Type::Var(v.clone())).collect();
        let result = Self::adt_result(&info.adt, &info.params, &args);
        let ty = if info.fields.is_empty() {
            result
        } else {
            Type::func(info.fields.clone(), result)
        };
        Scheme {
            vars,
            constraints: Vec::new(),
            ty,
        }
    }

    fn instantiate(&mut self, scheme: &Scheme, span: Span) -> Type {
        let mut mapping = Subst::default();
        for var in &scheme.vars {
            match var.kind {
                Kind::Star => {
                    let fresh = self.fresh_star();
                    mapping.types.insert(var.name.clone(), fresh);
                }
                Kind::RecordRow | Kind::EffectRow => {
                    let fresh = self.fresh_row_var(var.kind);
                    mapping.rows.insert(
                        var.name.clone(),
                        Row {
                            kind: var.kind,
                            labels: BTreeMap::new(),
                            tail: Some(fresh),
                        },
                    );
                }
            }
        }
        for constraint in &scheme.constraints {
            let ty = mapping.apply(&constraint.ty);
            self.pending.push(Pending {
                class: constraint.class.clone(),
                ty,
                node: None,
                span,
            });
        }
        mapping.apply(&scheme.ty)
    }

    fn generalize(&mut self, env: &TypeEnv, ty: Type) -> Scheme {
        self.generalize_excluding(env, &BTreeSet::new(), ty)
    }

    fn generalize_excluding(&mut self, env: &TypeEnv, exclude: &BTreeSet<String>, ty: Type) -> Scheme {
        let env_free = env.free_vars_except(&self.subst, exclude);
        let vars: Vec<TyVar> = ty
            .free_vars()
            .into_iter()
            .filter(|v| !env_free.contains(&v.name))
            .collect();
        self.quantified.extend(vars.iter().map(|v| v.name.clone()));
        let mut constraints = Vec::new();
        for pending in &self.pending {
            let applied = self.subst.apply(&pending.ty);
            let free = applied.free_vars();
            if !free.is_empty() && free.iter().all(|v| vars.contains(v)) {
                constraints.push(ClassConstraint {
                    class: pending.class.clone(),
                    ty: applied,
                });
            }
        }
        constraints.sort_by(|a, b| (&a.class, a.ty.to_string()).cmp(&(&b.class, b.ty.to_string())));
        constraints.dedup();
        Scheme { vars, constraints, ty }
    }

    /// Converts a surface annotation to a type. Type variables in the
    /// annotation share one mapping per call; aliases expand; ADT arity is
    /// kind-checked.
    fn annotation_type(&mut self, expr: &TypeExpr, span: Span, vars: &mut AHashMap<String, Type>) -> Type {
        let expanded = self.expand_alias(expr, span);
        let converted = {
            let counter = &mut self.counter;
            let mut lookup = |name: &str| {
                vars.entry(name.to_owned())
                    .or_insert_with(|| {
                        let fresh = Type::Var(TyVar::star(format!("t{counter}")));
                        *counter += 1;
                        fresh
                    })
                    .clone()
            };
            from_type_expr(&expanded, &mut lookup)
        };
        self.kind_check(&converted, span);
        converted
    }

    fn expand_alias(&mut self, expr: &TypeExpr, span: Span) -> TypeExpr {
        self.expand_alias_depth(expr, span, 0)
    }

    /// Structural alias expansion with a depth guard against cyclic
    /// aliases.
    fn expand_alias_depth(&mut self, expr: &TypeExpr, span: Span, depth: u8) -> TypeExpr {
        if depth > 32 {
            self.error("TC005", span, "type alias expansion is too deep (cyclic alias?)".to_owned());
            return expr.clone();
        }
        match expr {
            TypeExpr::Con(name) => match self.aliases.get(name) {
                Some((params, body)) if params.is_empty() => {
                    let body = body.clone();
                    self.expand_alias_depth(&body, span, depth + 1)
                }
                Some((params, _)) => {
                    let expected = params.len();
                    self.error("TC005", span, format!("alias {name} expects {expected} type argument(s)"));
                    expr.clone()
                }
                None => expr.clone(),
            },
            TypeExpr::App { ctor, args } => {
                let expanded_args: Vec<TypeExpr> =
                    args.iter().map(|a| self.expand_alias_depth(a, span, depth + 1)).collect();
                match self.aliases.get(ctor).cloned() {
                    Some((params, body)) => {
                        if params.len() != expanded_args.len() {
                            self.error(
                                "TC005",
                                span,
                                format!("alias {ctor} expects {} type argument(s), got {}", params.len(), args.len()),
                            );
                            return expr.clone();
                        }
                        let mapping: AHashMap<&str, &TypeExpr> = params
                            .iter()
                            .map(String::as_str)
                            .zip(expanded_args.iter())
                            .collect();
                        let substituted = subst_type_expr(&body, &mapping);
                        self.expand_alias_depth(&substituted, span, depth + 1)
                    }
                    None => TypeExpr::App {
                        ctor: ctor.clone(),
                        args: expanded_args,
                    },
                }
            }
            TypeExpr::List(elem) => TypeExpr::List(Box::new(self.expand_alias_depth(elem, span, depth + 1))),
            TypeExpr::Tuple(elems) => TypeExpr::Tuple(
                elems.iter().map(|e| self.expand_alias_depth(e, span, depth + 1)).collect(),
            ),
            TypeExpr::Record(fields) => TypeExpr::Record(
                fields
                    .iter()
                    .map(|(n, t)| (n.clone(), self.expand_alias_depth(t, span, depth + 1)))
                    .collect(),
            ),
            TypeExpr::Func { params, ret, effects } => TypeExpr::Func {
                params: params.iter().map(|p| self.expand_alias_depth(p, span, depth + 1)).collect(),
                ret: Box::new(self.expand_alias_depth(ret, span, depth + 1)),
                effects: effects.clone(),
            },
            TypeExpr::Var(_) | TypeExpr::Unit => expr.clone(),
        }
    }

    fn kind_check(&mut self, ty: &Type, span: Span) {
        match ty {
            Type::App { ctor, args } => {
                if let Some(arity) = self.adt_arities.get(ctor) {
                    if *arity != args.len() {
                        self.error(
                            "TC005",
                            span,
                            format!("{ctor} expects {arity} type argument(s), got {}", args.len()),
                        );
                    }
                }
                for arg in args {
                    self.kind_check(arg, span);
                }
            }
            Type::Func { params, ret, .. } => {
                for p in params {
                    self.kind_check(p, span);
                }
                self.kind_check(ret, span);
            }
            Type::List(elem) => self.kind_check(elem, span),
            Type::Tuple(elems) => {
                for e in elems {
                    self.kind_check(e, span);
                }
            }
            Type::Record(row) => {
                for ty in row.labels.values() {
                    self.kind_check(ty, span);
                }
            }
            Type::Con(_) | Type::Var(_) => {}
        }
    }

    // ── unification ────────────────────────────────────────────────────

    fn unify(&mut self, a: &Type, b: &Type, span: Span) {
        let a = self.subst.apply(a);
        let b = self.subst.apply(b);
        match (&a, &b) {
            (Type::Con(x), Type::Con(y)) if x == y => {}
            (Type::Var(v), Type::Var(w)) if v.name == w.name => {}
            (Type::Var(v), other) | (other, Type::Var(v)) => {
                if v.kind != Kind::Star {
                    self.error("TC005", span, format!("row variable {} used as a type", v.name));
                    return;
                }
                if occurs(&v.name, other) {
                    self.error("TC004", span, format!("infinite type: {} occurs in {other}", v.name));
                    return;
                }
                self.subst.types.insert(v.name.clone(), other.clone());
            }
            (
                Type::Func {
                    params: pa,
                    ret: ra,
                    effects: ea,
                },
                Type::Func {
                    params: pb,
                    ret: rb,
                    effects: eb,
                },
            ) => {
                if pa.len() != pb.len() {
                    self.error(
                        "TC001",
                        span,
                        format!("function arity mismatch: {} vs {} parameters", pa.len(), pb.len()),
                    );
                    return;
                }
                for (x, y) in pa.iter().zip(pb.iter()) {
                    self.unify(x, y, span);
                }
                self.unify(ra, rb, span);
                self.unify_rows(ea, eb, span);
            }
            (Type::App { ctor: ca, args: aa }, Type::App { ctor: cb, args: ab }) if ca == cb && aa.len() == ab.len() => {
                for (x, y) in aa.iter().zip(ab.iter()) {
                    self.unify(x, y, span);
                }
            }
            (Type::List(x), Type::List(y)) => self.unify(x, y, span),
            (Type::Tuple(xs), Type::Tuple(ys)) if xs.len() == ys.len() => {
                for (x, y) in xs.iter().zip(ys.iter()) {
                    self.unify(x, y, span);
                }
            }
            (Type::Record(ra), Type::Record(rb)) => self.unify_rows(ra, rb, span),
            _ => {
                self.error("TC001", span, format!("type mismatch: expected {a}, found {b}"));
            }
        }
    }

    /// Row unification: common labels unify pointwise; labels missing on
    /// one side are pushed into the other side's tail. A closed row with a
    /// missing label is a record (`TC_REC_001`) or effect (`TC008`) error.
    fn unify_rows(&mut self, a: &Row, b: &Row, span: Span) {
        let a = self.subst.apply_row(a);
        let b = self.subst.apply_row(b);
        if a.kind != b.kind {
            self.error("TC_REC_004", span, "row kind mismatch".to_owned());
            return;
        }

        for (label, ty_a) in &a.labels {
            if let Some(ty_b) = b.labels.get(label) {
                self.unify(ty_a, ty_b, span);
            }
        }
        let only_a: BTreeMap<String, Type> = a
            .labels
            .iter()
            .filter(|(l, _)| !b.labels.contains_key(*l))
            .map(|(l, t)| (l.clone(), t.clone()))
            .collect();
        let only_b: BTreeMap<String, Type> = b
            .labels
            .iter()
            .filter(|(l, _)| !a.labels.contains_key(*l))
            .map(|(l, t)| (l.clone(), t.clone()))
            .collect();

        match (&a.tail, &b.tail) {
            (None, None) => {
                if !only_a.is_empty() || !only_b.is_empty() {
                    let missing: Vec<&String> = only_a.keys().chain(only_b.keys()).collect();
                    let code = if a.kind == Kind::EffectRow { "TC008" } else { "TC_REC_001" };
                    let what = if a.kind == Kind::EffectRow { "effect" } else { "field" };
                    self.error(
                        code,
                        span,
                        format!(
                            "{what} mismatch: {}",
                            missing.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                        ),
                    );
                }
            }
            (Some(tail_a), None) => {
                if !only_a.is_empty() {
                    let code = if a.kind == Kind::EffectRow { "TC008" } else { "TC_REC_001" };
                    self.error(
                        code,
                        span,
                        format!("closed row lacks: {}", only_a.keys().cloned().collect::<Vec<_>>().join(", ")),
                    );
                    return;
                }
                self.bind_row(tail_a.clone(), Row { kind: a.kind, labels: only_b, tail: None }, span);
            }
            (None, Some(tail_b)) => {
                if !only_b.is_empty() {
                    let code = if a.kind == Kind::EffectRow { "TC008" } else { "TC_REC_001" };
                    self.error(
                        code,
                        span,
                        format!("closed row lacks: {}", only_b.keys().cloned().collect::<Vec<_>>().join(", ")),
                    );
                    return;
                }
                self.bind_row(tail_b.clone(), Row { kind: a.kind, labels: only_a, tail: None }, span);
            }
            (Some(tail_a), Some(tail_b)) => {
                if tail_a.name == tail_b.name {
                    if !only_a.is_empty() || !only_b.is_empty() {
                        self.error("TC_REC_003", span, "row tail cannot absorb conflicting labels".to_owned());
                    }
                    return;
                }
                let shared = self.fresh_row_var(a.kind);
                self.bind_row(
                    tail_a.clone(),
                    Row {
                        kind: a.kind,
                        labels: only_b,
                        tail: Some(shared.clone()),
                    },
                    span,
                );
                self.bind_row(
                    tail_b.clone(),
                    Row {
                        kind: a.kind,
                        labels: only_a,
                        tail: Some(shared),
                    },
                    span,
                );
            }
        }
    }

    fn bind_row(&mut self, var: TyVar, row: Row, span: Span) {
        if row.labels.values().any(|ty| occurs(&var.name, ty))
            || row.tail.as_ref().is_some_and(|t| t.name == var.name && !row.labels.is_empty())
        {
            self.error("TC_REC_003", span, format!("row variable {} occurs in its own solution", var.name));
            return;
        }
        if row.tail.as_ref().is_some_and(|t| t.name == var.name) {
            // binding a tail to itself with no labels is a no-op
            return;
        }
        self.subst.rows.insert(var.name, row);
    }

    // ── expression inference ───────────────────────────────────────────

    fn infer_decl(&mut self, env: &mut TypeEnv, decl: &crate::anf::Decl) -> Type {
        let ExprKind::Lambda { params, body } = &decl.expr.kind else {
            // non-lambda declarations: plain expression
            let (ty, _) = self.infer_expr(env, &decl.expr);
            return ty;
        };
        let mut annotation_vars = AHashMap::new();
        let annotated = decl
            .annotation
            .as_ref()
            .map(|a| self.annotation_type(a, decl.expr.span, &mut annotation_vars));

        env.push();
        let param_types: Vec<Type> = match &annotated {
            Some(Type::Func { params: ptys, .. }) if ptys.len() == params.len() => ptys.clone(),
            _ => params
                .iter()
                .enumerate()
                .map(|(index, _)| {
                    match decl.param_annotations.get(index).and_then(Option::as_ref) {
                        Some(annotation) => self.annotation_type(annotation, decl.expr.span, &mut annotation_vars),
                        None => self.fresh_star(),
                    }
                })
                .collect(),
        };
        for (name, ty) in params.iter().zip(param_types.iter()) {
            env.insert(name.clone(), Scheme::mono(ty.clone()));
        }
        let (body_ty, body_effects) = self.infer_expr(env, body);
        env.pop();

        // declared effects bound the body's performed effects
        let declared: BTreeSet<String> = decl.effects.iter().cloned().collect();
        if !decl.effects.is_empty() || decl.annotation.is_some() {
            let escaped: Vec<&String> = body_effects.difference(&declared).collect();
            if !escaped.is_empty() {
                self.error(
                    "TC008",
                    decl.expr.span,
                    format!(
                        "function `{}` performs undeclared effects: {}",
                        decl.name,
                        escaped.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(", ")
                    ),
                );
            }
        }
        let row = if decl.effects.is_empty() && decl.annotation.is_none() {
            Row::effects(body_effects.iter().cloned())
        } else {
            Row::effects(declared.iter().cloned())
        };
        let ty = Type::Func {
            params: param_types,
            ret: Box::new(body_ty),
            effects: row,
        };
        if let Some(annotated) = annotated {
            self.unify(&annotated, &ty, decl.expr.span);
        }
        ty
    }

    fn infer_expr(&mut self, env: &mut TypeEnv, expr: &Expr) -> (Type, Effects) {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Lit(lit) => (self.infer_literal(lit, span), Effects::new()),
            ExprKind::Var(name) => match env.lookup(name).cloned() {
                Some(scheme) => (self.instantiate(&scheme, span), Effects::new()),
                None => {
                    self.error("TC002", span, format!("unbound variable `{name}`"));
                    (self.fresh_star(), Effects::new())
                }
            },
            ExprKind::GlobalRef { module, name } => {
                match self.globals.get(&(module.clone(), name.clone())).cloned() {
                    Some(scheme) => (self.instantiate(&scheme, span), Effects::new()),
                    None => {
                        self.error("TC002", span, format!("`{name}` is not exported by {module}"));
                        (self.fresh_star(), Effects::new())
                    }
                }
            }
            ExprKind::Lambda { params, body } => {
                env.push();
                let param_types: Vec<Type> = params
                    .iter()
                    .map(|name| {
                        let ty = self.fresh_star();
                        env.insert(name.clone(), Scheme::mono(ty.clone()));
                        ty
                    })
                    .collect();
                let (body_ty, body_effects) = self.infer_expr(env, body);
                env.pop();
                let ty = Type::Func {
                    params: param_types,
                    ret: Box::new(body_ty),
                    effects: Row::effects(body_effects.iter().cloned()),
                };
                // a lambda value performs nothing until applied
                (ty, Effects::new())
            }
            ExprKind::App { func, args } => {
                let (func_ty, mut effects) = self.infer_expr(env, func);
                let mut arg_types = Vec::with_capacity(args.len());
                for arg in args {
                    let (ty, eff) = self.infer_expr(env, arg);
                    effects.extend(eff);
                    arg_types.push(ty);
                }
                let result = self.apply_callee(func_ty, &arg_types, span, &mut effects);
                (result, effects)
            }
            ExprKind::Let {
                name,
                annotation,
                value,
                body,
            } => {
                let (value_ty, mut effects) = self.infer_expr(env, value);
                if let Some(annotation) = annotation {
                    let mut vars = AHashMap::new();
                    let annotated = self.annotation_type(annotation, span, &mut vars);
                    self.unify(&annotated, &value_ty, value.span);
                }
                env.push();
                let scheme = if matches!(value.kind, ExprKind::Lambda { .. }) {
                    let applied = self.subst.apply(&value_ty);
                    self.generalize(env, applied)
                } else {
                    Scheme::mono(value_ty)
                };
                env.insert(name.clone(), scheme);
                let (body_ty, body_effects) = self.infer_expr(env, body);
                env.pop();
                effects.extend(body_effects);
                (body_ty, effects)
            }
            ExprKind::LetRec { bindings, body } => {
                env.push();
                let vars: Vec<Type> = bindings
                    .iter()
                    .map(|(name, _)| {
                        let var = self.fresh_star();
                        env.insert(name.clone(), Scheme::mono(var.clone()));
                        var
                    })
                    .collect();
                let mut effects = Effects::new();
                for ((_, value), var) in bindings.iter().zip(vars.iter()) {
                    let (ty, eff) = self.infer_expr(env, value);
                    effects.extend(eff);
                    self.unify(var, &ty, value.span);
                }
                // group boundary: generalize function bindings
                let group_names: BTreeSet<String> = bindings.iter().map(|(name, _)| name.clone()).collect();
                for ((name, value), var) in bindings.iter().zip(vars.iter()) {
                    if matches!(value.kind, ExprKind::Lambda { .. }) {
                        let applied = self.subst.apply(var);
                        let scheme = self.generalize_excluding(env, &group_names, applied);
                        env.insert(name.clone(), scheme);
                    }
                }
                let (body_ty, body_effects) = self.infer_expr(env, body);
                env.pop();
                effects.extend(body_effects);
                (body_ty, effects)
            }
            ExprKind::If { cond, then, els } => {
                let (cond_ty, mut effects) = self.infer_expr(env, cond);
                self.unify(&cond_ty, &Type::bool(), cond.span);
                let (then_ty, then_eff) = self.infer_expr(env, then);
                let (else_ty, else_eff) = self.infer_expr(env, els);
                self.unify(&then_ty, &else_ty, span);
                effects.extend(then_eff);
                effects.extend(else_eff);
                (then_ty, effects)
            }
            ExprKind::Match { scrutinee, arms } => {
                let (scrutinee_ty, mut effects) = self.infer_expr(env, scrutinee);
                let result = self.fresh_star();
                for arm in arms {
                    env.push();
                    self.infer_pattern(env, &arm.pattern, &scrutinee_ty);
                    if let Some(guard) = &arm.guard {
                        let (guard_ty, guard_eff) = self.infer_expr(env, guard);
                        self.unify(&guard_ty, &Type::bool(), guard.span);
                        effects.extend(guard_eff);
                    }
                    let (body_ty, body_eff) = self.infer_expr(env, &arm.body);
                    self.unify(&result, &body_ty, arm.body.span);
                    effects.extend(body_eff);
                    env.pop();
                }
                (result, effects)
            }
            ExprKind::List(elems) => {
                let elem_ty = self.fresh_star();
                let mut effects = Effects::new();
                for elem in elems {
                    let (ty, eff) = self.infer_expr(env, elem);
                    self.unify(&elem_ty, &ty, elem.span);
                    effects.extend(eff);
                }
                (Type::List(Box::new(elem_ty)), effects)
            }
            ExprKind::Tuple(elems) => {
                let mut effects = Effects::new();
                let types = elems
                    .iter()
                    .map(|elem| {
                        let (ty, eff) = self.infer_expr(env, elem);
                        effects.extend(eff);
                        ty
                    })
                    .collect();
                (Type::Tuple(types), effects)
            }
            ExprKind::Record(fields) => {
                let mut effects = Effects::new();
                let mut labels = BTreeMap::new();
                for (name, value) in fields {
                    let (ty, eff) = self.infer_expr(env, value);
                    effects.extend(eff);
                    labels.insert(name.clone(), ty);
                }
                (
                    Type::Record(Row {
                        kind: Kind::RecordRow,
                        labels,
                        tail: None,
                    }),
                    effects,
                )
            }
            ExprKind::RecordAccess { base, field } => {
                let (base_ty, effects) = self.infer_expr(env, base);
                let field_ty = self.fresh_star();
                let tail = self.fresh_row_var(Kind::RecordRow);
                let expected = Type::Record(Row {
                    kind: Kind::RecordRow,
                    labels: BTreeMap::from([(field.clone(), field_ty.clone())]),
                    tail: Some(tail),
                });
                self.unify(&base_ty, &expected, span);
                (field_ty, effects)
            }
            ExprKind::RecordUpdate { base, fields } => {
                let (base_ty, mut effects) = self.infer_expr(env, base);
                // every updated field must already exist with a matching type
                let mut labels = BTreeMap::new();
                for (name, value) in fields {
                    let (ty, eff) = self.infer_expr(env, value);
                    effects.extend(eff);
                    labels.insert(name.clone(), ty);
                }
                let applied = self.subst.apply(&base_ty);
                if let Type::Record(row) = &applied {
                    if row.is_closed() {
                        for name in labels.keys() {
                            if !row.labels.contains_key(name) {
                                self.error(
                                    "TC_REC_002",
                                    span,
                                    format!("record update adds unknown field `{name}`"),
                                );
                            }
                        }
                    }
                }
                let tail = self.fresh_row_var(Kind::RecordRow);
                let expected = Type::Record(Row {
                    kind: Kind::RecordRow,
                    labels,
                    tail: Some(tail),
                });
                self.unify(&base_ty, &expected, span);
                (base_ty, effects)
            }
            ExprKind::Intrinsic { op, args } => self.infer_intrinsic(env, expr, *op, args),
            ExprKind::DictRef { .. } => (self.fresh_star(), Effects::new()),
            ExprKind::DictApp { args, .. } => {
                // appears only after dictionary elaboration; inference has
                // already run by then, but stay total
                let mut effects = Effects::new();
                for arg in args {
                    let (_, eff) = self.infer_expr(env, arg);
                    effects.extend(eff);
                }
                (self.fresh_star(), effects)
            }
        }
    }

    /// Types an application. A curried callee (`\x. \y. …` applied to two
    /// arguments) consumes its parameter groups one at a time; otherwise
    /// the callee must accept the full argument list.
    fn apply_callee(&mut self, func_ty: Type, args: &[Type], span: Span, effects: &mut Effects) -> Type {
        if args.is_empty() {
            // zero-argument call
            let result = self.fresh_star();
            let latent = self.fresh_row_var(Kind::EffectRow);
            let expected = Type::Func {
                params: Vec::new(),
                ret: Box::new(result.clone()),
                effects: Row {
                    kind: Kind::EffectRow,
                    labels: BTreeMap::new(),
                    tail: Some(latent.clone()),
                },
            };
            self.unify(&func_ty, &expected, span);
            self.absorb_latent_effects(latent, effects);
            return result;
        }
        let applied = self.subst.apply(&func_ty);
        let take = match &applied {
            Type::Func { params, .. } if !params.is_empty() && params.len() < args.len() => params.len(),
            _ => args.len(),
        };
        let result = self.fresh_star();
        let latent = self.fresh_row_var(Kind::EffectRow);
        let expected = Type::Func {
            params: args[..take].to_vec(),
            ret: Box::new(result.clone()),
            effects: Row {
                kind: Kind::EffectRow,
                labels: BTreeMap::new(),
                tail: Some(latent.clone()),
            },
        };
        self.unify(&func_ty, &expected, span);
        self.absorb_latent_effects(latent, effects);
        if take < args.len() {
            self.apply_callee(result, &args[take..], span, effects)
        } else {
            result
        }
    }

    /// Effects carried by a callee's (now solved) row are performed at
    /// the application site.
    fn absorb_latent_effects(&mut self, latent: TyVar, effects: &mut Effects) {
        let row = self.subst.apply_row(&Row {
            kind: Kind::EffectRow,
            labels: BTreeMap::new(),
            tail: Some(latent),
        });
        effects.extend(row.labels.keys().cloned());
    }

    fn infer_literal(&mut self, lit: &Literal, span: Span) -> Type {
        match lit {
            Literal::Int(_) => {
                let var = self.fresh_star();
                self.pending.push(Pending {
                    class: "Num".to_owned(),
                    ty: var.clone(),
                    node: None,
                    span,
                });
                var
            }
            Literal::Float(_) => {
                let var = self.fresh_star();
                self.pending.push(Pending {
                    class: "Fractional".to_owned(),
                    ty: var.clone(),
                    node: None,
                    span,
                });
                var
            }
            Literal::Str(_) => Type::string(),
            Literal::Char(_) => Type::char(),
            Literal::Bool(_) => Type::bool(),
            Literal::Unit => Type::unit(),
        }
    }

    fn infer_intrinsic(&mut self, env: &mut TypeEnv, expr: &Expr, op: IntrinsicOp, args: &[Expr]) -> (Type, Effects) {
        let span = expr.span;
        let mut effects = Effects::new();
        let arg_types: Vec<Type> = args
            .iter()
            .map(|arg| {
                let (ty, eff) = self.infer_expr(env, arg);
                effects.extend(eff);
                ty
            })
            .collect();

        let result = match op {
            IntrinsicOp::Not => {
                self.unify(&arg_types[0], &Type::bool(), span);
                Type::bool()
            }
            IntrinsicOp::Neg => {
                let operand = arg_types[0].clone();
                self.constrain_op(expr.id, "Num", &operand, span);
                operand
            }
            IntrinsicOp::Add | IntrinsicOp::Sub | IntrinsicOp::Mul | IntrinsicOp::Div | IntrinsicOp::Mod => {
                self.unify(&arg_types[0], &arg_types[1], span);
                let operand = arg_types[0].clone();
                self.constrain_op(expr.id, "Num", &operand, span);
                operand
            }
            IntrinsicOp::Eq | IntrinsicOp::Ne => {
                self.unify(&arg_types[0], &arg_types[1], span);
                self.constrain_op(expr.id, "Eq", &arg_types[0], span);
                Type::bool()
            }
            IntrinsicOp::Lt | IntrinsicOp::Le | IntrinsicOp::Gt | IntrinsicOp::Ge => {
                self.unify(&arg_types[0], &arg_types[1], span);
                self.constrain_op(expr.id, "Ord", &arg_types[0], span);
                Type::bool()
            }
            IntrinsicOp::Concat => {
                self.unify(&arg_types[0], &arg_types[1], span);
                self.constrain_op(expr.id, "Concat", &arg_types[0], span);
                arg_types[0].clone()
            }
        };
        (result, effects)
    }

    fn constrain_op(&mut self, node: NodeId, class: &str, ty: &Type, span: Span) {
        self.pending.push(Pending {
            class: class.to_owned(),
            ty: ty.clone(),
            node: Some(node),
            span,
        });
    }

    fn infer_pattern(&mut self, env: &mut TypeEnv, pattern: &Pattern, expected: &Type) {
        let span = pattern.span;
        match &pattern.kind {
            PatternKind::Wildcard => {}
            PatternKind::Var(name) => {
                env.insert(name.clone(), Scheme::mono(expected.clone()));
            }
            PatternKind::Lit(lit) => {
                let lit_ty = match lit {
                    Literal::Int(_) => Type::int(),
                    Literal::Float(_) => Type::float(),
                    Literal::Str(_) => Type::string(),
                    Literal::Char(_) => Type::char(),
                    Literal::Bool(_) => Type::bool(),
                    Literal::Unit => Type::unit(),
                };
                self.unify(expected, &lit_ty, span);
            }
            PatternKind::Ctor { name, args } => {
                let Some(info) = self.ctors.get(name).cloned() else {
                    self.error("TC002", span, format!("unknown constructor `{name}`"));
                    return;
                };
                if info.arity() != args.len() {
                    self.error(
                        "TC001",
                        span,
                        format!("constructor {name} has {} field(s), pattern binds {}", info.arity(), args.len()),
                    );
                    return;
                }
                let mut mapping = Subst::default();
                let fresh_args: Vec<Type> = info
                    .params
                    .iter()
                    .map(|p| {
                        let fresh = self.fresh_star();
                        mapping.types.insert(p.clone(), fresh.clone());
                        fresh
                    })
                    .collect();
                let result = Self::adt_result(&info.adt, &info.params, &fresh_args);
                self.unify(expected, &result, span);
                for (arg, field) in args.iter().zip(info.fields.iter()) {
                    let field_ty = mapping.apply(field);
                    self.infer_pattern(env, arg, &field_ty);
                }
            }
            PatternKind::Tuple(elems) => {
                let elem_types: Vec<Type> = elems.iter().map(|_| self.fresh_star()).collect();
                self.unify(expected, &Type::Tuple(elem_types.clone()), span);
                for (elem, ty) in elems.iter().zip(elem_types.iter()) {
                    self.infer_pattern(env, elem, ty);
                }
            }
            PatternKind::List { items, rest } => {
                let elem_ty = self.fresh_star();
                self.unify(expected, &Type::List(Box::new(elem_ty.clone())), span);
                for item in items {
                    self.infer_pattern(env, item, &elem_ty);
                }
                if let Some(rest) = rest {
                    if rest != "_" {
                        env.insert(rest.clone(), Scheme::mono(Type::List(Box::new(elem_ty))));
                    }
                }
            }
            PatternKind::Record { fields, open } => {
                let mut labels = BTreeMap::new();
                let mut field_types = Vec::new();
                for (name, _) in fields {
                    let ty = self.fresh_star();
                    labels.insert(name.clone(), ty.clone());
                    field_types.push(ty);
                }
                let tail = if *open { Some(self.fresh_row_var(Kind::RecordRow)) } else { None };
                self.unify(
                    expected,
                    &Type::Record(Row {
                        kind: Kind::RecordRow,
                        labels,
                        tail,
                    }),
                    span,
                );
                for ((_, sub), ty) in fields.iter().zip(field_types.iter()) {
                    self.infer_pattern(env, sub, ty);
                }
            }
            PatternKind::Binding { pattern, name } => {
                env.insert(name.clone(), Scheme::mono(expected.clone()));
                self.infer_pattern(env, pattern, expected);
            }
        }
    }

    // ── constraint resolution and defaulting ───────────────────────────

    /// Resolves all pending class constraints against the instance
    /// registry, running the defaulting fixpoint: once a variable is
    /// defaulted the concrete type flows back through the substitution and
    /// resolution is retried until nothing changes.
    fn resolve_constraints(&mut self) {
        loop {
            let defaulted = self.defaulting_pass();
            if !defaulted {
                break;
            }
        }
        self.report_undefaultable();
        let pending = std::mem::take(&mut self.pending);
        for constraint in &pending {
            let ty = self.subst.apply(&constraint.ty);
            match ty.head() {
                Some(head) => {
                    if !self.instance_satisfies(&constraint.class, head) {
                        self.error(
                            "TC009",
                            constraint.span,
                            format!("no instance for {}[{}]", constraint.class, ty),
                        );
                    }
                    if let Some(node) = constraint.node {
                        self.resolved.insert(
                            node,
                            ResolvedConstraint {
                                class: constraint.class.clone(),
                                head: Some(head.to_owned()),
                            },
                        );
                    }
                }
                None => {
                    // left polymorphic: op-lowering falls back to the
                    // dynamic instance
                    if let Some(node) = constraint.node {
                        self.resolved.insert(
                            node,
                            ResolvedConstraint {
                                class: constraint.class.clone(),
                                head: None,
                            },
                        );
                    }
                }
            }
        }
        self.pending = pending;
    }

    /// One defaulting pass. Returns whether any variable was defaulted.
    fn defaulting_pass(&mut self) -> bool {
        // group unresolved constraints by variable
        let mut by_var: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut spans: BTreeMap<String, Span> = BTreeMap::new();
        let pending = self.pending.clone();
        for constraint in &pending {
            let ty = self.subst.apply(&constraint.ty);
            if let Type::Var(v) = ty {
                if self.quantified.contains(&v.name) {
                    continue;
                }
                by_var.entry(v.name.clone()).or_default().insert(constraint.class.clone());
                spans.entry(v.name).or_insert(constraint.span);
            }
        }
        let mut changed = false;
        for (var, classes) in by_var {
            let has_fractional = classes.contains("Fractional");
            let has_num_family =
                has_fractional || classes.contains("Num") || classes.contains("Integral");
            if !has_num_family {
                continue;
            }
            let default = if has_fractional { Type::float() } else { Type::int() };
            let head = default.head().expect("primitive default has a head");
            // every class constrained on this variable must hold at the default
            let all_satisfied = classes.iter().all(|class| self.instance_satisfies(class, head));
            if all_satisfied {
                self.defaulting_trace
                    .push(format!("{var}: defaulted to {head} for {}", join_classes(&classes)));
                self.subst.types.insert(var, default);
                changed = true;
            }
        }
        changed
    }

    /// After the fixpoint: any variable still carrying a numeric-family
    /// constraint could not be defaulted, which is an ambiguity (`TC007`)
    /// with the trace of decisions attached.
    fn report_undefaultable(&mut self) {
        let mut by_var: BTreeMap<String, (BTreeSet<String>, Span)> = BTreeMap::new();
        let pending = self.pending.clone();
        for constraint in &pending {
            if let Type::Var(v) = self.subst.apply(&constraint.ty) {
                if self.quantified.contains(&v.name) {
                    continue;
                }
                let entry = by_var.entry(v.name).or_insert((BTreeSet::new(), constraint.span));
                entry.0.insert(constraint.class.clone());
            }
        }
        for (_, (classes, span)) in by_var {
            let numeric = classes.contains("Num") || classes.contains("Fractional") || classes.contains("Integral");
            if !numeric {
                continue;
            }
            let trace = self.defaulting_trace.join("; ");
            let mut report = Report::new(
                Phase::Typecheck,
                "TC007",
                format!(
                    "ambiguous type: cannot default a variable constrained by {}",
                    join_classes(&classes)
                ),
            )
            .with_span(self.file, span);
            if !trace.is_empty() {
                report = report.with_data("defaulting_trace", serde_json::json!(trace));
            }
            self.reports.push(report);
        }
    }

    /// Instance check with superclass closure: `Fractional[Float]` also
    /// satisfies a `Num` requirement through `provides`.
    fn instance_satisfies(&self, class: &str, head: &str) -> bool {
        if self.registry.has(class, head) {
            return true;
        }
        // a subclass instance provides its superclasses
        CLASS_NAMES.iter().any(|candidate| {
            class_def(candidate)
                .is_some_and(|def| def.supers.contains(&class) && self.registry.has(candidate, head))
        })
    }
}

const CLASS_NAMES: &[&str] = &["Num", "Fractional", "Integral", "Eq", "Ord", "Show", "Concat"];

/// Replaces alias parameters with their argument type expressions.
fn subst_type_expr(expr: &TypeExpr, mapping: &AHashMap<&str, &TypeExpr>) -> TypeExpr {
    match expr {
        TypeExpr::Var(name) => mapping.get(name.as_str()).map_or_else(|| expr.clone(), |t| (*t).clone()),
        TypeExpr::Con(_) | TypeExpr::Unit => expr.clone(),
        TypeExpr::App { ctor, args } => TypeExpr::App {
            ctor: ctor.clone(),
            args: args.iter().map(|a| subst_type_expr(a, mapping)).collect(),
        },
        TypeExpr::List(elem) => TypeExpr::List(Box::new(subst_type_expr(elem, mapping))),
        TypeExpr::Tuple(elems) => TypeExpr::Tuple(elems.iter().map(|e| subst_type_expr(e, mapping)).collect()),
        TypeExpr::Record(fields) => TypeExpr::Record(
            fields
                .iter()
                .map(|(n, t)| (n.clone(), subst_type_expr(t, mapping)))
                .collect(),
        ),
        TypeExpr::Func { params, ret, effects } => TypeExpr::Func {
            params: params.iter().map(|p| subst_type_expr(p, mapping)).collect(),
            ret: Box::new(subst_type_expr(ret, mapping)),
            effects: effects.clone(),
        },
    }
}

fn join_classes(classes: &BTreeSet<String>) -> String {
    classes.iter().cloned().collect::<Vec<_>>().join(" + ")
}

fn occurs(name: &str, ty: &Type) -> bool {
    ty.free_vars().iter().any(|v| v.name == name)
}

/// Strongly connected components of the declaration call graph, in
/// dependency order (callees before callers). Declarations that do not
/// reference each other stay in singleton groups so helpers generalize
/// before their users.
fn decl_sccs(program: &Program) -> Vec<Vec<usize>> {
    let names: AHashMap<&str, usize> = program
        .decls
        .iter()
        .enumerate()
        .map(|(i, d)| (d.name.as_str(), i))
        .collect();
    let mut edges: Vec<Vec<usize>> = vec![Vec::new(); program.decls.len()];
    for (index, decl) in program.decls.iter().enumerate() {
        let mut referenced = BTreeSet::new();
        collect_names(&decl.expr, &mut referenced);
        for name in referenced {
            if let Some(&target) = names.get(name.as_str()) {
                if target != index {
                    edges[index].push(target);
                }
            }
        }
    }
    tarjan_sccs(&edges)
}

fn collect_names(expr: &Expr, out: &mut BTreeSet<String>) {
    match &expr.kind {
        ExprKind::Var(name) => {
            out.insert(name.clone());
        }
        ExprKind::Lit(_) | ExprKind::DictRef { .. } | ExprKind::GlobalRef { .. } => {}
        ExprKind::Lambda { body, .. } => collect_names(body, out),
        ExprKind::App { func, args } => {
            collect_names(func, out);
            for a in args {
                collect_names(a, out);
            }
        }
        ExprKind::Let { value, body, .. } => {
            collect_names(value, out);
            collect_names(body, out);
        }
        ExprKind::LetRec { bindings, body } => {
            for (_, v) in bindings {
                collect_names(v, out);
            }
            collect_names(body, out);
        }
        ExprKind::If { cond, then, els } => {
            collect_names(cond, out);
            collect_names(then, out);
            collect_names(els, out);
        }
        ExprKind::Match { scrutinee, arms } => {
            collect_names(scrutinee, out);
            for arm in arms {
                if let Some(g) = &arm.guard {
                    collect_names(g, out);
                }
                collect_names(&arm.body, out);
            }
        }
        ExprKind::Record(fields) => {
            for (_, v) in fields {
                collect_names(v, out);
            }
        }
        ExprKind::RecordAccess { base, .. } => collect_names(base, out),
        ExprKind::RecordUpdate { base, fields } => {
            collect_names(base, out);
            for (_, v) in fields {
                collect_names(v, out);
            }
        }
        ExprKind::List(elems) | ExprKind::Tuple(elems) => {
            for e in elems {
                collect_names(e, out);
            }
        }
        ExprKind::Intrinsic { args, .. } => {
            for a in args {
                collect_names(a, out);
            }
        }
        ExprKind::DictApp { dict, args, .. } => {
            collect_names(dict, out);
            for a in args {
                collect_names(a, out);
            }
        }
    }
}

/// Iterative Tarjan over a small graph; components come out in reverse
/// topological order, which is exactly "callees first".
fn tarjan_sccs(edges: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let n = edges.len();
    let mut index = vec![usize::MAX; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack = Vec::new();
    let mut next_index = 0usize;
    let mut components = Vec::new();

    #[derive(Clone, Copy)]
    struct Frame {
        node: usize,
        edge: usize,
    }

    for start in 0..n {
        if index[start] != usize::MAX {
            continue;
        }
        let mut call_stack = vec![Frame { node: start, edge: 0 }];
        index[start] = next_index;
        low[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(frame) = call_stack.last_mut() {
            let node = frame.node;
            if frame.edge < edges[node].len() {
                let target = edges[node][frame.edge];
                frame.edge += 1;
                if index[target] == usize::MAX {
                    index[target] = next_index;
                    low[target] = next_index;
                    next_index += 1;
                    stack.push(target);
                    on_stack[target] = true;
                    call_stack.push(Frame { node: target, edge: 0 });
                } else if on_stack[target] {
                    low[node] = low[node].min(index[target]);
                }
            } else {
                call_stack.pop();
                if let Some(parent) = call_stack.last() {
                    low[parent.node] = low[parent.node].min(low[node]);
                }
                if low[node] == index[node] {
                    let mut component = Vec::new();
                    while let Some(member) = stack.pop() {
                        on_stack[member] = false;
                        component.push(member);
                        if member == node {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{elaborate::elaborate, parse::parse_text};

    fn check(source: &str) -> PhaseResult<ModuleTypes> {
        let (file, reports) = parse_text("test.ail", source);
        assert!(reports.iter().all(|r| !r.is_error()), "parse failed: {reports:?}");
        let program = elaborate("test.ail", "test", &file).expect("elaboration failed");
        let registry = InstanceRegistry::with_prelude();
        infer_module("test.ail", &program, &registry, &ExternalTypes::default())
    }

    fn scheme_of(outcome: &ModuleTypes, name: &str) -> String {
        outcome.decl_schemes[name].to_string()
    }

    #[test]
    fn literal_arithmetic_defaults_to_int() {
        let outcome = check("export func main() -> Int { 1 + 2 }").unwrap();
        assert_eq!(scheme_of(&outcome, "main"), "() -> Int");
        // the intrinsic resolved to the Int head
        assert!(outcome
            .resolved
            .values()
            .any(|r| r.class == "Num" && r.head.as_deref() == Some("Int")));
    }

    #[test]
    fn float_annotation_drives_eq_dispatch() {
        let outcome = check("func f() -> Bool { let b: Float = 0.0 in b == 0.0 }").unwrap();
        let eq = outcome
            .resolved
            .values()
            .find(|r| r.class == "Eq")
            .expect("eq constraint resolved");
        assert_eq!(eq.head.as_deref(), Some("Float"));
    }

    #[test]
    fn fractional_defaults_to_float() {
        let outcome = check("func f() -> Float { 1.5 + 2.0 }").unwrap();
        let num = outcome
            .resolved
            .values()
            .find(|r| r.class == "Num")
            .expect("num constraint resolved");
        assert_eq!(num.head.as_deref(), Some("Float"));
    }

    #[test]
    fn identity_generalizes_for_later_decls() {
        let outcome = check(
            "func id(x) = x\nfunc use1() -> Int { id(1) }\nfunc use2() -> String { id(\"s\") }",
        )
        .unwrap();
        assert_eq!(scheme_of(&outcome, "id"), "forall a. (a) -> a");
    }

    #[test]
    fn mutual_recursion_types_correctly() {
        let outcome = check(
            "export func isEven(n: Int) -> Bool { if n == 0 then true else isOdd(n - 1) }\n\
             export func isOdd(n: Int) -> Bool { if n == 0 then false else isEven(n - 1) }",
        )
        .unwrap();
        assert_eq!(scheme_of(&outcome, "isEven"), "(Int) -> Bool");
        assert_eq!(scheme_of(&outcome, "isOdd"), "(Int) -> Bool");
    }

    #[test]
    fn unbound_variable_is_tc002() {
        let errors = check("func f() -> Int { nope }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC002"));
    }

    #[test]
    fn mismatch_is_tc001() {
        let errors = check("func f() -> Int { \"text\" }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC001"));
    }

    #[test]
    fn occurs_check_is_tc004() {
        let errors = check(r"func f() -> Int { let g = \x. x(x) in 1 }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC004"), "{errors:?}");
    }

    #[test]
    fn record_access_uses_row_subsumption() {
        let outcome = check("func name(p: {name: String, age: Int}) -> String { p.name }").unwrap();
        assert_eq!(scheme_of(&outcome, "name"), "({age: Int, name: String}) -> String");
    }

    #[test]
    fn missing_field_is_tc_rec_001() {
        let errors = check("func f(p: {age: Int}) -> String { p.name }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC_REC_001"), "{errors:?}");
    }

    #[test]
    fn record_update_keeps_base_type() {
        let outcome =
            check("func bump(p: {name: String, age: Int}) -> {name: String, age: Int} { {p | age: 31} }").unwrap();
        assert!(scheme_of(&outcome, "bump").contains("age: Int"));
    }

    #[test]
    fn record_update_adding_field_is_tc_rec_002() {
        let errors = check("func f(p: {age: Int}) -> {age: Int} { {p | name: \"x\"} }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC_REC_002"), "{errors:?}");
    }

    #[test]
    fn undeclared_effect_is_tc008() {
        // readLine performs IO but f declares a pure signature
        let source = "func f() -> Int { g(); 1 }";
        let (file, _) = parse_text("test.ail", source);
        let program = elaborate("test.ail", "test", &file).unwrap();
        let registry = InstanceRegistry::with_prelude();
        let mut externals = ExternalTypes::default();
        externals.names.insert(
            "g".to_owned(),
            Scheme::mono(Type::effectful(vec![], Type::unit(), ["IO".to_owned()])),
        );
        let errors = infer_module("test.ail", &program, &registry, &externals).unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC008"), "{errors:?}");
    }

    #[test]
    fn declared_effect_allows_call() {
        let source = "func f() -> Int ! {IO} { g(); 1 }";
        let (file, _) = parse_text("test.ail", source);
        let program = elaborate("test.ail", "test", &file).unwrap();
        let registry = InstanceRegistry::with_prelude();
        let mut externals = ExternalTypes::default();
        externals.names.insert(
            "g".to_owned(),
            Scheme::mono(Type::effectful(vec![], Type::unit(), ["IO".to_owned()])),
        );
        infer_module("test.ail", &program, &registry, &externals).expect("declared IO suffices");
    }

    #[test]
    fn adt_constructor_and_match() {
        let outcome = check(
            "export type Option2[a] = Some2(a) | None2\n\
             func get(o: Option2[Int]) -> Int { match o { Some2(x) => x, None2 => 0 } }",
        )
        .unwrap();
        assert_eq!(scheme_of(&outcome, "get"), "(Option2[Int]) -> Int");
    }

    #[test]
    fn aliases_expand_in_annotations() {
        let outcome = check("type Ints = [Int]\nfunc head0(xs: Ints) -> Int { match xs { [x, ...r] => x, [] => 0 } }")
            .unwrap();
        assert_eq!(scheme_of(&outcome, "head0"), "([Int]) -> Int");
    }

    #[test]
    fn num_string_is_tc009() {
        let errors = check("func f(s: String) -> String { s + s }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC009"), "{errors:?}");
    }

    #[test]
    fn concat_works_on_strings_and_lists() {
        check("func f(s: String) -> String { s ++ s }").unwrap();
        check("func g(xs: [Int]) -> [Int] { xs ++ xs }").unwrap();
    }

    #[test]
    fn guard_must_be_bool() {
        let errors = check("func f(n: Int) -> Int { match n { x if x + 1 => 1, _ => 0 } }").unwrap_err();
        assert!(errors.iter().any(|r| r.code == "TC001"), "{errors:?}");
    }

    #[test]
    fn solver_output_is_ground_after_defaulting() {
        let outcome = check("func f() -> Int { let x = 1 in x + 1 }").unwrap();
        for resolved in outcome.resolved.values() {
            assert!(resolved.head.is_some(), "operation unexpectedly polymorphic");
        }
    }
}
