//! Type classes, the instance registry, and dictionary elaboration.
//!
//! Canonical dictionary keys have the form `module::Class::TypeHead::method`
//! (`prelude::Num::Int::add`). The registry is populated once — prelude
//! instances at startup, user instances as modules link — and frozen before
//! evaluation begins; overlapping instances are rejected at registration.

use std::rc::Rc;

use crate::{
    anf::{Expr, ExprKind, IntrinsicOp, NodeId, Program},
    diagnostic::{Phase, PhaseResult, Report},
    prim,
    value::{PrimError, Value},
};

/// Module segment used for built-in instances.
pub const PRELUDE: &str = "prelude";

/// Type-head segment used for the dynamic fallback instances that serve
/// operations left fully polymorphic after defaulting.
pub const DYN_HEAD: &str = "Dyn";

/// A class definition: superclasses and method names.
#[derive(Debug, Clone, Copy)]
pub struct ClassDef {
    pub name: &'static str,
    pub supers: &'static [&'static str],
    pub methods: &'static [&'static str],
}

/// The built-in class hierarchy. `Fractional` and `Integral` refine `Num`;
/// `Ord` refines `Eq`.
pub const CLASSES: &[ClassDef] = &[
    ClassDef { name: "Num", supers: &[], methods: &["add", "sub", "mul", "div", "mod", "neg"] },
    ClassDef { name: "Fractional", supers: &["Num"], methods: &["divide"] },
    ClassDef { name: "Integral", supers: &["Num"], methods: &["quot", "rem"] },
    ClassDef { name: "Eq", supers: &[], methods: &["eq", "neq"] },
    ClassDef { name: "Ord", supers: &["Eq"], methods: &["lt", "lte", "gt", "gte"] },
    ClassDef { name: "Show", supers: &[], methods: &["show"] },
    ClassDef { name: "Concat", supers: &[], methods: &["concat"] },
];

#[must_use]
pub fn class_def(name: &str) -> Option<&'static ClassDef> {
    CLASSES.iter().find(|c| c.name == name)
}

/// Maps an overloaded intrinsic to its class and method. `Not` is
/// monomorphic on `Bool` and returns `None`.
#[must_use]
pub fn op_method(op: IntrinsicOp) -> Option<(&'static str, &'static str)> {
    let entry = match op {
        IntrinsicOp::Add => ("Num", "add"),
        IntrinsicOp::Sub => ("Num", "sub"),
        IntrinsicOp::Mul => ("Num", "mul"),
        IntrinsicOp::Div => ("Num", "div"),
        IntrinsicOp::Mod => ("Num", "mod"),
        IntrinsicOp::Neg => ("Num", "neg"),
        IntrinsicOp::Eq => ("Eq", "eq"),
        IntrinsicOp::Ne => ("Eq", "neq"),
        IntrinsicOp::Lt => ("Ord", "lt"),
        IntrinsicOp::Le => ("Ord", "lte"),
        IntrinsicOp::Gt => ("Ord", "gt"),
        IntrinsicOp::Ge => ("Ord", "gte"),
        IntrinsicOp::Concat => ("Concat", "concat"),
        IntrinsicOp::Not => return None,
    };
    Some(entry)
}

/// Builds the canonical key `module::Class::Head::method`.
#[must_use]
pub fn dict_key(module: &str, class: &str, head: &str, method: &str) -> String {
    format!("{module}::{class}::{head}::{method}")
}

/// Parses a canonical key back into its four segments.
#[must_use]
pub fn parse_key(key: &str) -> Option<(&str, &str, &str, &str)> {
    let mut parts = key.split("::");
    let module = parts.next()?;
    let class = parts.next()?;
    let head = parts.next()?;
    let method = parts.next()?;
    if parts.next().is_some() {
        return None;
    }
    Some((module, class, head, method))
}

/// How an instance method is implemented.
#[derive(Debug, Clone)]
pub enum MethodImpl {
    /// A built-in primitive.
    Prim(fn(&[Value]) -> Result<Value, PrimError>),
    /// A user-written method body; evaluated in its module's environment
    /// during module initialization.
    User(Rc<Expr>),
}

/// One registered instance.
#[derive(Debug, Clone)]
pub struct Instance {
    pub module: String,
    pub class: String,
    pub head: String,
    pub methods: Vec<(String, MethodImpl)>,
    /// Canonical instance-level keys of superclass dictionaries.
    pub provides: Vec<String>,
}

impl Instance {
    /// The instance-level portion of this instance's canonical keys.
    #[must_use]
    pub fn instance_key(&self) -> String {
        format!("{}::{}::{}", self.module, self.class, self.head)
    }
}

/// Registry of available instances, keyed by `(class, type-head)`.
///
/// Overlap is forbidden: registering a second instance for the same key is
/// an `LNK002` error. After [`InstanceRegistry::freeze`], registration
/// attempts are internal errors.
#[derive(Debug, Default)]
pub struct InstanceRegistry {
    instances: ahash::AHashMap<(String, String), Instance>,
    frozen: bool,
}

impl InstanceRegistry {
    /// A registry pre-populated with the prelude instances.
    #[must_use]
    pub fn with_prelude() -> Self {
        let mut registry = Self::default();
        registry.install_prelude();
        registry
    }

    /// Registers an instance. Fails with `LNK002` on overlap; method
    /// implementations are validated (user methods must be functions).
    pub fn register(&mut self, instance: Instance) -> Result<(), Report> {
        for (name, method) in &instance.methods {
            if let MethodImpl::User(body) = method {
                if !matches!(body.kind, ExprKind::Lambda { .. }) {
                    return Err(Report::new(
                        Phase::Link,
                        "LNK001",
                        format!(
                            "instance {}[{}] method `{name}` is not a function",
                            instance.class, instance.head
                        ),
                    ));
                }
            }
        }
        if self.frozen {
            return Err(Report::new(
                Phase::Link,
                "LNK002",
                format!(
                    "instance {}[{}] registered after the registry was frozen",
                    instance.class, instance.head
                ),
            ));
        }
        let key = (instance.class.clone(), instance.head.clone());
        if let Some(existing) = self.instances.get(&key) {
            return Err(Report::new(
                Phase::Link,
                "LNK002",
                format!(
                    "overlapping instances for {}[{}]: provided by both {} and {}",
                    instance.class, instance.head, existing.module, instance.module
                ),
            ));
        }
        self.instances.insert(key, instance);
        Ok(())
    }

    /// Freezes the registry; all subsequent reads are immutable.
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn get(&self, class: &str, head: &str) -> Option<&Instance> {
        self.instances.get(&(class.to_owned(), head.to_owned()))
    }

    #[must_use]
    pub fn has(&self, class: &str, head: &str) -> bool {
        self.get(class, head).is_some()
    }

    /// The module providing `(class, head)`, defaulting to the prelude for
    /// key construction when unresolved (the linker reports `LNK001`).
    #[must_use]
    pub fn providing_module(&self, class: &str, head: &str) -> &str {
        self.get(class, head).map_or(PRELUDE, |i| i.module.as_str())
    }

    pub fn instances(&self) -> impl Iterator<Item = &Instance> {
        self.instances.values()
    }

    /// Detects cycles in the `provides` graph (`LNK004`). The built-in
    /// hierarchy is acyclic; user instances cannot extend it, so this
    /// guards against registry corruption.
    pub fn check_provides_cycles(&self) -> Result<(), Report> {
        for start in self.instances.values() {
            let mut seen = vec![start.instance_key()];
            let mut frontier = start.provides.clone();
            while let Some(key) = frontier.pop() {
                if seen.contains(&key) {
                    return Err(Report::new(
                        Phase::Link,
                        "LNK004",
                        format!("instance dependency cycle through {key}"),
                    ));
                }
                let Some((_, class, head)) = split_instance_key(&key) else { continue };
                if let Some(next) = self.get(class, head) {
                    seen.push(key);
                    frontier.extend(next.provides.iter().cloned());
                }
            }
        }
        Ok(())
    }

    fn prelude_instance(
        &mut self,
        class: &'static str,
        head: &str,
        methods: Vec<(&'static str, fn(&[Value]) -> Result<Value, PrimError>)>,
    ) {
        let def = class_def(class).expect("prelude class exists");
        let provides = def
            .supers
            .iter()
            .map(|super_class| format!("{PRELUDE}::{super_class}::{head}"))
            .collect();
        let instance = Instance {
            module: PRELUDE.to_owned(),
            class: class.to_owned(),
            head: head.to_owned(),
            methods: methods
                .into_iter()
                .map(|(name, f)| (name.to_owned(), MethodImpl::Prim(f)))
                .collect(),
            provides,
        };
        self.register(instance).expect("prelude instances never overlap");
    }

    fn install_prelude(&mut self) {
        use prim::*;

        self.prelude_instance("Num", "Int", vec![
            ("add", add_int),
            ("sub", sub_int),
            ("mul", mul_int),
            ("div", div_int),
            ("mod", mod_int),
            ("neg", neg_int),
        ]);
        self.prelude_instance("Num", "Float", vec![
            ("add", add_float),
            ("sub", sub_float),
            ("mul", mul_float),
            ("div", div_float),
            ("mod", mod_float),
            ("neg", neg_float),
        ]);
        self.prelude_instance("Num", DYN_HEAD, vec![
            ("add", num_dyn("add")),
            ("sub", num_dyn("sub")),
            ("mul", num_dyn("mul")),
            ("div", num_dyn("div")),
            ("mod", num_dyn("mod")),
            ("neg", num_dyn("neg")),
        ]);
        self.prelude_instance("Fractional", "Float", vec![("divide", div_float)]);
        self.prelude_instance("Integral", "Int", vec![("quot", div_int), ("rem", mod_int)]);

        self.prelude_instance("Eq", "Int", vec![("eq", eq_int), ("neq", neq_int)]);
        self.prelude_instance("Eq", "Float", vec![("eq", eq_float), ("neq", neq_float)]);
        for head in ["String", "Bool", "Char", "Unit", "List", "Tuple", "Record", DYN_HEAD] {
            self.prelude_instance("Eq", head, vec![("eq", eq_value), ("neq", neq_value)]);
        }

        for head in ["Int", "Float", "String", "Char", "Bool", "List", "Tuple", DYN_HEAD] {
            self.prelude_instance("Ord", head, vec![
                ("lt", lt_value),
                ("lte", lte_value),
                ("gt", gt_value),
                ("gte", gte_value),
            ]);
        }

        for head in [
            "Int", "Float", "String", "Bool", "Char", "Unit", "List", "Tuple", "Record", DYN_HEAD,
        ] {
            self.prelude_instance("Show", head, vec![("show", show)]);
        }

        self.prelude_instance("Concat", "String", vec![("concat", concat_string)]);
        self.prelude_instance("Concat", "List", vec![("concat", concat_list)]);
        self.prelude_instance("Concat", DYN_HEAD, vec![("concat", concat_value)]);
    }
}

fn split_instance_key(key: &str) -> Option<(&str, &str, &str)> {
    let mut parts = key.split("::");
    Some((parts.next()?, parts.next()?, parts.next()?))
}

/// The concrete type head the solver resolved for an overloaded
/// operation, or `None` when it stayed polymorphic after defaulting.
#[derive(Debug, Clone)]
pub struct ResolvedConstraint {
    pub class: String,
    pub head: Option<String>,
}

/// Rewrites every overloaded `Intrinsic` into a `DictApp` through the
/// canonical dictionary key chosen by the solver's resolved-constraint
/// table. `Not` stays an intrinsic (monomorphic on `Bool`).
///
/// Never inspects operand shapes: the head comes exclusively from the
/// resolved table, falling back to the dynamic instance only when the
/// operation stayed polymorphic.
pub fn elaborate_dicts(
    file: &str,
    program: &mut Program,
    resolved: &ahash::AHashMap<NodeId, ResolvedConstraint>,
    registry: &InstanceRegistry,
) -> PhaseResult<()> {
    let mut reports = Vec::new();
    for decl in &mut program.decls {
        rewrite_expr(&mut decl.expr, file, resolved, registry, &mut reports);
    }
    for instance in &mut program.instances {
        for (_, body) in &mut instance.methods {
            rewrite_expr(body, file, resolved, registry, &mut reports);
        }
    }
    for statement in &mut program.statements {
        rewrite_expr(&mut statement.expr, file, resolved, registry, &mut reports);
    }
    if reports.is_empty() { Ok(()) } else { Err(reports) }
}

/// Post-elaboration check: no unresolved intrinsic placeholders remain.
#[must_use]
pub fn verify_no_placeholders(file: &str, program: &Program) -> Vec<Report> {
    let mut reports = Vec::new();
    let mut check = |expr: &Expr| {
        if let ExprKind::Intrinsic { op, .. } = &expr.kind {
            if *op != IntrinsicOp::Not {
                reports.push(
                    Report::new(
                        Phase::Elaborate,
                        "ELB002",
                        format!("intrinsic `{op}` survived dictionary elaboration"),
                    )
                    .with_span(file, expr.span),
                );
            }
        }
    };
    for decl in &program.decls {
        walk(&decl.expr, &mut check);
    }
    for statement in &program.statements {
        walk(&statement.expr, &mut check);
    }
    reports
}

fn walk(expr: &Expr, visit: &mut impl FnMut(&Expr)) {
    visit(expr);
    match &expr.kind {
        ExprKind::Var(_) | ExprKind::Lit(_) | ExprKind::DictRef { .. } | ExprKind::GlobalRef { .. } => {}
        ExprKind::Lambda { body, .. } => walk(body, visit),
        ExprKind::App { func, args } => {
            walk(func, visit);
            for a in args {
                walk(a, visit);
            }
        }
        ExprKind::Let { value, body, .. } => {
            walk(value, visit);
            walk(body, visit);
        }
        ExprKind::LetRec { bindings, body } => {
            for (_, v) in bindings {
                walk(v, visit);
            }
            walk(body, visit);
        }
        ExprKind::If { cond, then, els } => {
            walk(cond, visit);
            walk(then, visit);
            walk(els, visit);
        }
        ExprKind::Match { scrutinee, arms } => {
            walk(scrutinee, visit);
            for arm in arms {
                if let Some(g) = &arm.guard {
                    walk(g, visit);
                }
                walk(&arm.body, visit);
            }
        }
        ExprKind::Record(fields) => {
            for (_, v) in fields {
                walk(v, visit);
            }
        }
        ExprKind::RecordAccess { base, .. } => walk(base, visit),
        ExprKind::RecordUpdate { base, fields } => {
            walk(base, visit);
            for (_, v) in fields {
                walk(v, visit);
            }
        }
        ExprKind::List(elems) | ExprKind::Tuple(elems) => {
            for e in elems {
                walk(e, visit);
            }
        }
        ExprKind::Intrinsic { args, .. } => {
            for a in args {
                walk(a, visit);
            }
        }
        ExprKind::DictApp { dict, args, .. } => {
            walk(dict, visit);
            for a in args {
                walk(a, visit);
            }
        }
    }
}

fn rewrite_expr(
    expr: &mut Expr,
    file: &str,
    resolved: &ahash::AHashMap<NodeId, ResolvedConstraint>,
    registry: &InstanceRegistry,
    reports: &mut Vec<Report>,
) {
    if matches!(&expr.kind, ExprKind::Intrinsic { .. }) {
        let kind = std::mem::replace(&mut expr.kind, ExprKind::Lit(crate::surface::Literal::Unit));
        let ExprKind::Intrinsic { op, mut args } = kind else {
            unreachable!("checked above")
        };
        for arg in &mut args {
            rewrite_expr(arg, file, resolved, registry, reports);
        }
        match op_method(op) {
            None => {
                expr.kind = ExprKind::Intrinsic { op, args };
            }
            Some((class, method)) => {
                let head = match resolved.get(&expr.id) {
                    Some(r) => r.head.clone().unwrap_or_else(|| DYN_HEAD.to_owned()),
                    None => DYN_HEAD.to_owned(),
                };
                let module = registry.providing_module(class, &head);
                let key = dict_key(module, class, &head, method);
                let dict = Expr {
                    id: expr.id,
                    span: expr.span,
                    kind: ExprKind::DictRef { key },
                };
                expr.kind = ExprKind::DictApp {
                    dict: Box::new(dict),
                    method: method.to_owned(),
                    args,
                };
            }
        }
        return;
    }
    match &mut expr.kind {
        ExprKind::Intrinsic { .. } => unreachable!("handled above"),
        ExprKind::Var(_) | ExprKind::Lit(_) | ExprKind::DictRef { .. } | ExprKind::GlobalRef { .. } => {}
        ExprKind::Lambda { body, .. } => rewrite_expr(body, file, resolved, registry, reports),
        ExprKind::App { func, args } => {
            rewrite_expr(func, file, resolved, registry, reports);
            for a in args {
                rewrite_expr(a, file, resolved, registry, reports);
            }
        }
        ExprKind::Let { value, body, .. } => {
            rewrite_expr(value, file, resolved, registry, reports);
            rewrite_expr(body, file, resolved, registry, reports);
        }
        ExprKind::LetRec { bindings, body } => {
            for (_, v) in bindings {
                rewrite_expr(v, file, resolved, registry, reports);
            }
            rewrite_expr(body, file, resolved, registry, reports);
        }
        ExprKind::If { cond, then, els } => {
            rewrite_expr(cond, file, resolved, registry, reports);
            rewrite_expr(then, file, resolved, registry, reports);
            rewrite_expr(els, file, resolved, registry, reports);
        }
        ExprKind::Match { scrutinee, arms } => {
            rewrite_expr(scrutinee, file, resolved, registry, reports);
            for arm in arms {
                if let Some(g) = &mut arm.guard {
                    rewrite_expr(g, file, resolved, registry, reports);
                }
                rewrite_expr(&mut arm.body, file, resolved, registry, reports);
            }
        }
        ExprKind::Record(fields) => {
            for (_, v) in fields {
                rewrite_expr(v, file, resolved, registry, reports);
            }
        }
        ExprKind::RecordAccess { base, .. } => rewrite_expr(base, file, resolved, registry, reports),
        ExprKind::RecordUpdate { base, fields } => {
            rewrite_expr(base, file, resolved, registry, reports);
            for (_, v) in fields {
                rewrite_expr(v, file, resolved, registry, reports);
            }
        }
        ExprKind::List(elems) | ExprKind::Tuple(elems) => {
            for e in elems {
                rewrite_expr(e, file, resolved, registry, reports);
            }
        }
        ExprKind::DictApp { dict, args, .. } => {
            rewrite_expr(dict, file, resolved, registry, reports);
            for a in args {
                rewrite_expr(a, file, resolved, registry, reports);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_key_format() {
        assert_eq!(dict_key(PRELUDE, "Num", "Int", "add"), "prelude::Num::Int::add");
        assert_eq!(
            parse_key("prelude::Num::Int::add"),
            Some(("prelude", "Num", "Int", "add"))
        );
        assert_eq!(parse_key("too::many::parts::here::extra"), None);
    }

    #[test]
    fn prelude_has_core_instances() {
        let registry = InstanceRegistry::with_prelude();
        assert!(registry.has("Num", "Int"));
        assert!(registry.has("Num", "Float"));
        assert!(registry.has("Eq", "Float"));
        assert!(registry.has("Ord", "String"));
        assert!(registry.has("Show", "Record"));
        assert!(registry.has("Concat", "List"));
        assert!(!registry.has("Num", "String"));
    }

    #[test]
    fn overlap_is_rejected_with_lnk002() {
        let mut registry = InstanceRegistry::with_prelude();
        let duplicate = Instance {
            module: "user/mod".to_owned(),
            class: "Num".to_owned(),
            head: "Int".to_owned(),
            methods: Vec::new(),
            provides: Vec::new(),
        };
        let err = registry.register(duplicate).unwrap_err();
        assert_eq!(err.code, "LNK002");
    }

    #[test]
    fn frozen_registry_rejects_registration() {
        let mut registry = InstanceRegistry::with_prelude();
        registry.freeze();
        let late = Instance {
            module: "user/late".to_owned(),
            class: "Eq".to_owned(),
            head: "Color".to_owned(),
            methods: Vec::new(),
            provides: Vec::new(),
        };
        assert!(registry.register(late).is_err());
    }

    #[test]
    fn ord_provides_eq() {
        let registry = InstanceRegistry::with_prelude();
        let ord_int = registry.get("Ord", "Int").unwrap();
        assert!(ord_int.provides.contains(&"prelude::Eq::Int".to_owned()));
    }

    #[test]
    fn provides_graph_is_acyclic() {
        let registry = InstanceRegistry::with_prelude();
        registry.check_provides_cycles().unwrap();
    }

    #[test]
    fn resolution_is_deterministic() {
        let registry = InstanceRegistry::with_prelude();
        let a = registry.get("Eq", "Int").unwrap().instance_key();
        let b = registry.get("Eq", "Int").unwrap().instance_key();
        assert_eq!(a, b);
    }
}
