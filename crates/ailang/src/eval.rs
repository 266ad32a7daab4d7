//! Tree-walking evaluator over linked core.
//!
//! Environments are persistent scope chains; closures capture their
//! defining environment by reference. The evaluator's only mutable state
//! is the recursion-depth counter, the effect host, and the per-module
//! global environments.
//!
//! Recursive bindings follow the cell-indirection strategy: every
//! `LetRec` binding gets an uninitialized cell, lambdas initialize first
//! (function-first rule), and non-lambda right-hand sides evaluate
//! strictly under a `visiting` flag so a premature self-read is the
//! diagnosable `RT_REC_001` instead of a crash.

use std::rc::Rc;

use ahash::AHashMap;

use crate::{
    anf::{Expr, ExprKind, IntrinsicOp, Pattern, PatternKind, Program},
    diagnostic::{Phase, Report},
    effects::{EffectHost, registry},
    link::Linkage,
    prim,
    source::Span,
    surface::Literal,
    value::{BuiltinKind, BuiltinVal, Closure, Env, PrimError, RecCell, Value},
};

/// Default recursion depth limit, overridable via CLI/API.
#[cfg(not(debug_assertions))]
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 10_000;
/// Debug builds use far larger host stack frames per interpreted call,
/// so the guard trips earlier to stay ahead of the host stack.
#[cfg(debug_assertions)]
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 1_000;

type EvalResult = Result<Value, Report>;

/// The interpreter for one run.
pub struct Interp<'a, 'h> {
    pub host: EffectHost<'h>,
    linkage: &'a Linkage,
    max_depth: usize,
    depth: usize,
    /// Module identity → initialized module environment.
    globals: AHashMap<String, Env>,
    /// File used for report spans; tracks the module being evaluated.
    file: String,
}

impl<'a, 'h> Interp<'a, 'h> {
    #[must_use]
    pub fn new(linkage: &'a Linkage, host: EffectHost<'h>, max_depth: usize) -> Self {
        Self {
            host,
            linkage,
            max_depth,
            depth: 0,
            globals: AHashMap::new(),
            file: String::new(),
        }
    }

    fn error(&self, code: &str, span: Span, message: String) -> Report {
        let phase = if code.starts_with("RT") { Phase::Runtime } else { Phase::Eval };
        Report::new(phase, code, message).with_span(&self.file, span)
    }

    fn prim_error(&self, err: PrimError, span: Span) -> Report {
        self.error(err.code, span, err.message)
    }

    /// Registers a synthetic builtin module (`std/io`, …) so `GlobalRef`s
    /// into it resolve.
    pub fn init_builtin_module(&mut self, module: &str) {
        if self.globals.contains_key(module) {
            return;
        }
        let env = Env::root();
        for spec in registry().module_ops(module) {
            env.define(
                spec.name,
                Value::Builtin(Rc::new(BuiltinVal {
                    name: spec.name.to_owned(),
                    arity: spec.arity,
                    kind: BuiltinKind::Effect {
                        module: spec.module.to_owned(),
                        name: spec.name.to_owned(),
                    },
                })),
            );
        }
        self.globals.insert(module.to_owned(), env);
    }

    /// Initializes a user module: constructors, declarations (as one
    /// recursive group), user instance methods, then top-level statements
    /// in source order. Dependencies must already be initialized.
    pub fn init_module(&mut self, program: &Program) -> Result<(), Report> {
        self.file = program.module.clone();
        let env = Env::root();

        // the prelude is auto-imported
        for spec in registry().module_ops(crate::effects::PRELUDE_MODULE) {
            env.define(
                spec.name,
                Value::Builtin(Rc::new(BuiltinVal {
                    name: spec.name.to_owned(),
                    arity: spec.arity,
                    kind: BuiltinKind::Effect {
                        module: spec.module.to_owned(),
                        name: spec.name.to_owned(),
                    },
                })),
            );
        }

        for adt in &program.adts {
            for ctor in &adt.ctors {
                let value = if ctor.fields.is_empty() {
                    Value::Ctor {
                        name: Rc::from(ctor.name.as_str()),
                        fields: Rc::new(Vec::new()),
                    }
                } else {
                    Value::Builtin(Rc::new(BuiltinVal {
                        name: ctor.name.clone(),
                        arity: ctor.fields.len(),
                        kind: BuiltinKind::Ctor {
                            name: ctor.name.clone(),
                        },
                    }))
                };
                env.define(&ctor.name, value);
            }
        }

        // declarations form one module-level recursive group
        let mut cells = Vec::new();
        for decl in &program.decls {
            let cell = Rc::new(RecCell::new(decl.name.clone()));
            env.define(&decl.name, Value::Indirect(cell.clone()));
            cells.push(cell);
        }
        // function-first: lambdas close over the extended environment
        for (decl, cell) in program.decls.iter().zip(&cells) {
            if let ExprKind::Lambda { params, body } = &decl.expr.kind {
                cell.store(Value::Closure(Rc::new(Closure {
                    params: params.clone(),
                    body: Rc::new(body.as_ref().clone()),
                    env: env.clone(),
                    name: Some(decl.name.clone()),
                    applied: Vec::new(),
                })));
            }
        }
        // any non-lambda declaration evaluates strictly under `visiting`;
        // the whole strict group is flagged first so a forward read of an
        // uninitialized sibling is the user error, not an internal one
        for cell in &cells {
            if !cell.is_initialized() {
                cell.set_visiting(true);
            }
        }
        for (decl, cell) in program.decls.iter().zip(&cells) {
            if cell.is_initialized() {
                continue;
            }
            let value = self
                .eval(&decl.expr, &env)
                .map_err(|report| report.with_data("decl", serde_json::json!(decl.meta.sid.as_str())))?;
            cell.store(value);
            cell.set_visiting(false);
        }

        // user instance methods become closures in this module's env
        for instance in &program.instances {
            let instance_key = format!("{}::{}::{}", program.module, instance.class, instance.head);
            let Some(dict) = self.linkage.dict_for_instance(&instance_key) else {
                continue; // nothing links against this instance
            };
            for (name, body) in &instance.methods {
                let value = self.eval(body, &env)?;
                dict.set_method(name.clone(), value);
            }
        }

        for statement in &program.statements {
            let value = self.eval(&statement.expr, &env)?;
            if let Some(binder) = &statement.binder {
                env.define(binder, value);
            }
        }

        self.globals.insert(program.module.clone(), env);
        Ok(())
    }

    /// Calls an initialized module's binding with the given arguments.
    pub fn call_entry(&mut self, module: &str, name: &str, args: Vec<Value>) -> EvalResult {
        self.file = module.to_owned();
        let Some(env) = self.globals.get(module) else {
            return Err(self.error("RT001", Span::synthetic(), format!("module {module} is not initialized")));
        };
        let Some(value) = env.lookup(name) else {
            return Err(self.error(
                "RT001",
                Span::synthetic(),
                format!("entry `{name}` is not defined in {module}"),
            ));
        };
        let func = self.deref(value, Span::synthetic())?;
        self.apply(func, args, Span::synthetic())
    }

    /// Follows `Indirect` values through their cells.
    fn deref(&self, value: Value, span: Span) -> EvalResult {
        match value {
            Value::Indirect(cell) => match cell.read() {
                Ok(inner) => Ok(inner),
                Err(true) => Err(self.error(
                    "RT_REC_001",
                    span,
                    format!("recursive value `{}` used before initialization", cell.name),
                )),
                Err(false) => Err(self.error(
                    "RT_REC_002",
                    span,
                    format!("internal: recursion cell `{}` was never scheduled", cell.name),
                )),
            },
            other => Ok(other),
        }
    }

    fn eval(&mut self, expr: &Expr, env: &Env) -> EvalResult {
        let span = expr.span;
        match &expr.kind {
            ExprKind::Lit(lit) => Ok(literal_value(lit)),
            ExprKind::Var(name) => match env.lookup(name) {
                Some(value) => self.deref(value, span),
                None => Err(self.error("EVA001", span, format!("unbound variable `{name}`"))),
            },
            ExprKind::GlobalRef { module, name } => {
                let Some(target) = self.globals.get(module) else {
                    return Err(self.error("RT001", span, format!("module {module} is not initialized")));
                };
                match target.lookup(name) {
                    Some(value) => self.deref(value, span),
                    None => Err(self.error("RT001", span, format!("`{name}` is not defined in {module}"))),
                }
            }
            ExprKind::Lambda { params, body } => Ok(Value::Closure(Rc::new(Closure {
                params: params.clone(),
                body: Rc::new(body.as_ref().clone()),
                env: env.clone(),
                name: None,
                applied: Vec::new(),
            }))),
            ExprKind::App { func, args } => {
                let func_value = self.eval(func, env)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg, env)?);
                }
                self.apply(func_value, arg_values, span)
            }
            ExprKind::Let { name, value, body, .. } => {
                let bound = self.eval(value, env)?;
                let child = env.child();
                child.define(name, bound);
                self.eval(body, &child)
            }
            ExprKind::LetRec { bindings, body } => {
                let child = env.child();
                let mut cells = Vec::with_capacity(bindings.len());
                for (name, _) in bindings {
                    let cell = Rc::new(RecCell::new(name.clone()));
                    child.define(name, Value::Indirect(cell.clone()));
                    cells.push(cell);
                }
                for ((name, value), cell) in bindings.iter().zip(&cells) {
                    if let ExprKind::Lambda { params, body } = &value.kind {
                        cell.store(Value::Closure(Rc::new(Closure {
                            params: params.clone(),
                            body: Rc::new(body.as_ref().clone()),
                            env: child.clone(),
                            name: Some(name.clone()),
                            applied: Vec::new(),
                        })));
                    }
                }
                for cell in &cells {
                    if !cell.is_initialized() {
                        cell.set_visiting(true);
                    }
                }
                for ((_, value), cell) in bindings.iter().zip(&cells) {
                    if cell.is_initialized() {
                        continue;
                    }
                    let evaluated = self.eval(value, &child)?;
                    cell.store(evaluated);
                    cell.set_visiting(false);
                }
                self.eval(body, &child)
            }
            ExprKind::If { cond, then, els } => {
                let cond_value = self.eval(cond, env)?;
                match cond_value {
                    Value::Bool(true) => self.eval(then, env),
                    Value::Bool(false) => self.eval(els, env),
                    other => Err(self.error(
                        "EVA003",
                        cond.span,
                        format!("if condition must be Bool, got {}", other.type_name()),
                    )),
                }
            }
            ExprKind::Match { scrutinee, arms } => {
                let subject = self.eval(scrutinee, env)?;
                for arm in arms {
                    let child = env.child();
                    if self.match_pattern(&arm.pattern, &subject, &child)? {
                        if let Some(guard) = &arm.guard {
                            match self.eval(guard, &child)? {
                                Value::Bool(true) => {}
                                Value::Bool(false) => continue,
                                other => {
                                    return Err(self.error(
                                        "EVA003",
                                        guard.span,
                                        format!("guard must be Bool, got {}", other.type_name()),
                                    ));
                                }
                            }
                        }
                        return self.eval(&arm.body, &child);
                    }
                }
                Err(self.error("EVA002", span, "no pattern arm matched the value".to_owned()))
            }
            ExprKind::Record(fields) => {
                let mut map = indexmap::IndexMap::new();
                for (name, value) in fields {
                    map.insert(name.clone(), self.eval(value, env)?);
                }
                Ok(Value::Record(Rc::new(map)))
            }
            ExprKind::RecordAccess { base, field } => {
                let record = self.eval(base, env)?;
                match record {
                    Value::Record(fields) => fields.get(field).cloned().ok_or_else(|| {
                        self.error("RT004", span, format!("record has no field `{field}`"))
                    }),
                    other => Err(self.error(
                        "EVA003",
                        span,
                        format!("field access on non-record {}", other.type_name()),
                    )),
                }
            }
            ExprKind::RecordUpdate { base, fields } => {
                // base first, then fields left to right
                let existing = match self.eval(base, env)? {
                    Value::Record(fields) => fields,
                    other => {
                        return Err(self.error(
                            "EVA003",
                            span,
                            format!("record update on non-record {}", other.type_name()),
                        ));
                    }
                };
                let mut updated = existing.as_ref().clone();
                for (name, value) in fields {
                    let evaluated = self.eval(value, env)?;
                    if !updated.contains_key(name) {
                        return Err(self.error("RT004", span, format!("record has no field `{name}` to update")));
                    }
                    updated.insert(name.clone(), evaluated);
                }
                Ok(Value::Record(Rc::new(updated)))
            }
            ExprKind::List(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval(elem, env)?);
                }
                Ok(Value::List(Rc::new(values)))
            }
            ExprKind::Tuple(elems) => {
                let mut values = Vec::with_capacity(elems.len());
                for elem in elems {
                    values.push(self.eval(elem, env)?);
                }
                Ok(Value::Tuple(Rc::new(values)))
            }
            ExprKind::Intrinsic { op, args } => {
                if *op != IntrinsicOp::Not {
                    return Err(self.error(
                        "EVA003",
                        span,
                        format!("intrinsic `{op}` escaped dictionary lowering"),
                    ));
                }
                let value = self.eval(&args[0], env)?;
                prim::not_bool(&[value]).map_err(|err| self.prim_error(err, span))
            }
            ExprKind::DictRef { key } => self
                .linkage
                .dict_for_key(key)
                .map(Value::Dict)
                .ok_or_else(|| self.error("RT001", span, format!("dictionary `{key}` was not linked"))),
            ExprKind::DictApp { dict, method, args } => {
                let dict_value = match self.eval(dict, env)? {
                    Value::Dict(dict) => dict,
                    other => {
                        return Err(self.error(
                            "EVA003",
                            span,
                            format!("dictionary application on {}", other.type_name()),
                        ));
                    }
                };
                let Some(method_value) = dict_value.method(method) else {
                    return Err(self.error(
                        "RT001",
                        span,
                        format!("dictionary {}::{} has no method `{method}`", dict_value.class, dict_value.head),
                    ));
                };
                let mut arg_values = Vec::with_capacity(args.len());
                for arg in args {
                    arg_values.push(self.eval(arg, env)?);
                }
                self.apply(method_value, arg_values, span)
            }
        }
    }

    /// Applies a callable to arguments, strictly and left to right.
    /// Curried closures absorb arguments one group at a time; surplus
    /// arguments apply to the result.
    fn apply(&mut self, func: Value, args: Vec<Value>, span: Span) -> EvalResult {
        let func = self.deref(func, span)?;
        match func {
            Value::Closure(closure) => {
                let supplied = closure.applied.len() + args.len();
                if supplied < closure.params.len() {
                    // partial application: remember the arguments
                    let mut applied = closure.applied.clone();
                    applied.extend(args);
                    return Ok(Value::Closure(Rc::new(Closure {
                        params: closure.params.clone(),
                        body: closure.body.clone(),
                        env: closure.env.clone(),
                        name: closure.name.clone(),
                        applied,
                    })));
                }
                let needed = closure.params.len() - closure.applied.len();
                let (now, rest) = args.split_at(needed);

                if self.depth >= self.max_depth {
                    return Err(self.error(
                        "RT_REC_003",
                        span,
                        format!("recursion depth limit ({}) exceeded", self.max_depth),
                    ));
                }
                self.depth += 1;
                let frame = closure.env.child();
                for (param, value) in closure
                    .params
                    .iter()
                    .zip(closure.applied.iter().chain(now.iter()))
                {
                    frame.define(param, value.clone());
                }
                let result = self.eval(&closure.body, &frame);
                self.depth -= 1;
                let result = result?;
                if rest.is_empty() {
                    Ok(result)
                } else {
                    self.apply(result, rest.to_vec(), span)
                }
            }
            Value::Builtin(builtin) => {
                if args.len() < builtin.arity {
                    return Err(self.error(
                        "EVA003",
                        span,
                        format!("{} expects {} argument(s), got {}", builtin.name, builtin.arity, args.len()),
                    ));
                }
                let (now, rest) = args.split_at(builtin.arity);
                let result = match &builtin.kind {
                    BuiltinKind::Prim(f) => f(now).map_err(|err| self.prim_error(err, span))?,
                    BuiltinKind::Ctor { name } => Value::Ctor {
                        name: Rc::from(name.as_str()),
                        fields: Rc::new(now.to_vec()),
                    },
                    BuiltinKind::Effect { module, name } => {
                        let Some(spec) = registry().get(module, name) else {
                            return Err(self.error("RT001", span, format!("unknown builtin {module}::{name}")));
                        };
                        registry()
                            .call(spec, &mut self.host, now)
                            .map_err(|err| self.error(err.code(), span, err.message()))?
                    }
                };
                if rest.is_empty() {
                    Ok(result)
                } else {
                    self.apply(result, rest.to_vec(), span)
                }
            }
            other => Err(self.error(
                "EVA003",
                span,
                format!("{} is not callable", other.type_name()),
            )),
        }
    }

    /// Tries a pattern against a value, binding into `env` on success.
    /// Arms are independent: a partial bind of a failing arm is discarded
    /// with its scratch environment.
    fn match_pattern(&mut self, pattern: &Pattern, value: &Value, env: &Env) -> Result<bool, Report> {
        match (&pattern.kind, value) {
            (PatternKind::Wildcard, _) => Ok(true),
            (PatternKind::Var(name), _) => {
                env.define(name, value.clone());
                Ok(true)
            }
            (PatternKind::Lit(lit), _) => {
                let expected = literal_value(lit);
                prim::values_equal(&expected, value).map_err(|err| self.prim_error(err, pattern.span))
            }
            (PatternKind::Ctor { name, args }, Value::Ctor { name: actual, fields }) => {
                if name.as_str() != &**actual || args.len() != fields.len() {
                    return Ok(false);
                }
                for (sub, field) in args.iter().zip(fields.iter()) {
                    if !self.match_pattern(sub, field, env)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (PatternKind::Ctor { .. }, _) => Ok(false),
            (PatternKind::Tuple(subs), Value::Tuple(elems)) => {
                if subs.len() != elems.len() {
                    return Ok(false);
                }
                for (sub, elem) in subs.iter().zip(elems.iter()) {
                    if !self.match_pattern(sub, elem, env)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (PatternKind::Tuple(_), _) => Ok(false),
            (PatternKind::List { items, rest }, Value::List(elems)) => {
                match rest {
                    None => {
                        if items.len() != elems.len() {
                            return Ok(false);
                        }
                    }
                    Some(_) => {
                        if items.len() > elems.len() {
                            return Ok(false);
                        }
                    }
                }
                for (sub, elem) in items.iter().zip(elems.iter()) {
                    if !self.match_pattern(sub, elem, env)? {
                        return Ok(false);
                    }
                }
                if let Some(rest_name) = rest {
                    if rest_name != "_" {
                        let tail: Vec<Value> = elems[items.len()..].to_vec();
                        env.define(rest_name, Value::List(Rc::new(tail)));
                    }
                }
                Ok(true)
            }
            (PatternKind::List { .. }, _) => Ok(false),
            (PatternKind::Record { fields, open }, Value::Record(actual)) => {
                if !open && fields.len() != actual.len() {
                    return Ok(false);
                }
                for (name, sub) in fields {
                    let Some(field_value) = actual.get(name) else {
                        return Ok(false);
                    };
                    if !self.match_pattern(sub, field_value, env)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            (PatternKind::Record { .. }, _) => Ok(false),
            (PatternKind::Binding { pattern: sub, name }, _) => {
                if self.match_pattern(sub, value, env)? {
                    env.define(name, value.clone());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Int(v) => Value::Int(*v),
        Literal::Float(v) => Value::Float(*v),
        Literal::Str(v) => Value::str(v),
        Literal::Char(v) => Value::Char(*v),
        Literal::Bool(v) => Value::Bool(*v),
        Literal::Unit => Value::Unit,
    }
}
