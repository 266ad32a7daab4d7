//! The linker: binds dictionary references to registered instances.
//!
//! Input is dictionary-elaborated core plus the frozen instance registry.
//! For every `DictRef` key `module::Class::Head::method` the linker looks
//! up the instance by `(class, head)`, verifies the method exists, and
//! materializes one shared [`DictValue`] per instance. Prim methods bind
//! immediately; user-instance methods are filled in by module
//! initialization, which evaluates their bodies in the owning module's
//! environment.

use std::{collections::BTreeSet, rc::Rc};

use ahash::AHashMap;

use crate::{
    anf::{Expr, ExprKind, Program},
    dict::{InstanceRegistry, MethodImpl, parse_key},
    diagnostic::{Phase, PhaseResult, Report},
    value::{BuiltinKind, BuiltinVal, DictValue, Value},
};

/// The linked dictionary table: instance key → shared dictionary value.
#[derive(Debug, Default)]
pub struct Linkage {
    dicts: AHashMap<String, Rc<DictValue>>,
}

impl Linkage {
    /// Resolves a full method key to its instance's dictionary.
    #[must_use]
    pub fn dict_for_key(&self, key: &str) -> Option<Rc<DictValue>> {
        let (module, class, head, _) = parse_key(key)?;
        self.dicts.get(&format!("{module}::{class}::{head}")).cloned()
    }

    #[must_use]
    pub fn dict_for_instance(&self, instance_key: &str) -> Option<Rc<DictValue>> {
        self.dicts.get(instance_key).cloned()
    }
}

/// Dry run: the set of canonical keys the programs require, without
/// binding anything. Used for diagnostics.
#[must_use]
pub fn required_keys(programs: &[&Program]) -> BTreeSet<String> {
    let mut keys = BTreeSet::new();
    for program in programs {
        for_each_dict_ref(program, &mut |key| {
            keys.insert(key.to_owned());
        });
    }
    keys
}

/// Links the programs against the registry.
///
/// Errors: `LNK001` missing instance or method, `LNK004` instance-level
/// cycles. Overlap (`LNK002`) is rejected earlier, at registration.
pub fn link(programs: &[&Program], registry: &InstanceRegistry) -> PhaseResult<Linkage> {
    let mut reports = Vec::new();
    if let Err(report) = registry.check_provides_cycles() {
        reports.push(report);
    }

    let mut linkage = Linkage::default();
    for key in required_keys(programs) {
        let Some((_, class, head, method)) = parse_key(&key) else {
            reports.push(Report::new(
                Phase::Link,
                "LNK001",
                format!("malformed dictionary key `{key}`"),
            ));
            continue;
        };
        let Some(instance) = registry.get(class, head) else {
            reports.push(Report::new(
                Phase::Link,
                "LNK001",
                format!("no instance for {class}[{head}] (required by `{key}`)"),
            ));
            continue;
        };
        if !instance.methods.iter().any(|(name, _)| name == method) {
            reports.push(Report::new(
                Phase::Link,
                "LNK001",
                format!("instance {class}[{head}] does not provide method `{method}`"),
            ));
            continue;
        }
        let instance_key = instance.instance_key();
        if !linkage.dicts.contains_key(&instance_key) {
            linkage.dicts.insert(instance_key.clone(), materialize(registry, class, head));
        }
    }

    if reports.is_empty() { Ok(linkage) } else { Err(reports) }
}

/// Builds the dictionary value for one instance. Prim methods become
/// builtin values now; user methods are left for module init to fill.
fn materialize(registry: &InstanceRegistry, class: &str, head: &str) -> Rc<DictValue> {
    let instance = registry.get(class, head).expect("caller verified the instance");
    let dict = DictValue::new(class.to_owned(), head.to_owned(), instance.provides.clone());
    for (name, method) in &instance.methods {
        if let MethodImpl::Prim(f) = method {
            dict.set_method(
                name.clone(),
                Value::Builtin(Rc::new(BuiltinVal {
                    name: format!("{class}.{name}"),
                    arity: prim_arity(class, name),
                    kind: BuiltinKind::Prim(*f),
                })),
            );
        }
    }
    Rc::new(dict)
}

/// Method arities for the built-in classes. `neg` and `show` are unary;
/// everything else is binary.
fn prim_arity(_class: &str, method: &str) -> usize {
    match method {
        "neg" | "show" => 1,
        _ => 2,
    }
}

fn for_each_dict_ref(program: &Program, visit: &mut impl FnMut(&str)) {
    for decl in &program.decls {
        walk(&decl.expr, visit);
    }
    for instance in &program.instances {
        for (_, body) in &instance.methods {
            walk(body, visit);
        }
    }
    for statement in &program.statements {
        walk(&statement.expr, visit);
    }
}

fn walk(expr: &Expr, visit: &mut impl FnMut(&str)) {
    match &expr.kind {
        ExprKind::DictRef { key } => visit(key),
        ExprKind::Var(_) | ExprKind::Lit(_) | ExprKind::GlobalRef { .. } => {}
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dict::{ResolvedConstraint, elaborate_dicts},
        elaborate::elaborate,
        infer::{ExternalTypes, infer_module},
        parse::parse_text,
    };

    fn linked_program(source: &str) -> (Program, InstanceRegistry) {
        let (file, _) = parse_text("test.ail", source);
        let mut program = elaborate("test.ail", "test", &file).unwrap();
        let registry = InstanceRegistry::with_prelude();
        let outcome = infer_module("test.ail", &program, &registry, &ExternalTypes::default()).unwrap();
        let resolved: ahash::AHashMap<u32, ResolvedConstraint> = outcome.resolved.into_iter().collect();
        elaborate_dicts("test.ail", &mut program, &resolved, &registry).unwrap();
        (program, registry)
    }

    #[test]
    fn arithmetic_links_against_prelude() {
        let (program, registry) = linked_program("export func main() -> Int { 1 + 2 }");
        let keys = required_keys(&[&program]);
        assert!(keys.contains("prelude::Num::Int::add"), "{keys:?}");
        let linkage = link(&[&program], &registry).unwrap();
        let dict = linkage.dict_for_key("prelude::Num::Int::add").unwrap();
        assert_eq!(dict.class, "Num");
        assert_eq!(dict.head, "Int");
        assert!(dict.method("add").is_some());
    }

    #[test]
    fn float_eq_links_to_float_dictionary() {
        let (program, registry) = linked_program("func f() -> Bool { let b: Float = 0.0 in b == 0.0 }");
        let keys = required_keys(&[&program]);
        assert!(keys.contains("prelude::Eq::Float::eq"), "{keys:?}");
        assert!(!keys.contains("prelude::Eq::Int::eq"), "{keys:?}");
        link(&[&program], &registry).unwrap();
    }

    #[test]
    fn dry_run_reports_required_keys_without_linking() {
        let (program, _) = linked_program("func f(s: String) -> String { s ++ s }");
        let keys = required_keys(&[&program]);
        assert!(keys.contains("prelude::Concat::String::concat"));
    }

    #[test]
    fn missing_instance_is_lnk001() {
        // forge a program with a DictRef nobody provides
        let (mut program, registry) = linked_program("export func main() -> Int { 1 }");
        program.statements.push(crate::anf::Stmt {
            binder: None,
            expr: Expr {
                id: 9999,
                span: crate::source::Span::synthetic(),
                kind: ExprKind::DictRef {
                    key: "prelude::Num::Color::add".to_owned(),
                },
            },
        });
        let errors = link(&[&program], &registry).unwrap_err();
        assert!(errors.iter().any(|r| r.code == "LNK001"));
    }
}
