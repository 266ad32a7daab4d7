//! The type language: types, rows, schemes, substitution, canonical forms.
//!
//! Rows serve double duty: record rows map field labels to field types,
//! effect rows map effect names to `Unit` (presence only). A row with no
//! tail variable is closed; an open row unifies by subsumption through its
//! tail.

use std::{collections::BTreeMap, fmt};

use crate::surface::TypeExpr;

/// Kinds distinguish ordinary types from the two row sorts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Kind {
    Star,
    RecordRow,
    EffectRow,
}

/// A type or row variable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct TyVar {
    pub name: String,
    pub kind: Kind,
}

impl TyVar {
    #[must_use]
    pub fn star(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: Kind::Star,
        }
    }
}

/// A row: ordered labels plus an optional tail variable.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Row {
    pub kind: Kind,
    pub labels: BTreeMap<String, Type>,
    pub tail: Option<TyVar>,
}

impl Row {
    /// The closed, empty effect row (pure).
    #[must_use]
    pub fn pure_effects() -> Self {
        Self {
            kind: Kind::EffectRow,
            labels: BTreeMap::new(),
            tail: None,
        }
    }

    /// A closed effect row over the given effect names.
    #[must_use]
    pub fn effects(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            kind: Kind::EffectRow,
            labels: names.into_iter().map(|n| (n, Type::unit())).collect(),
            tail: None,
        }
    }

    /// A closed record row.
    #[must_use]
    pub fn record(fields: impl IntoIterator<Item = (String, Type)>) -> Self {
        Self {
            kind: Kind::RecordRow,
            labels: fields.into_iter().collect(),
            tail: None,
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tail.is_none()
    }

    /// Effect labels as a sorted list of names.
    #[must_use]
    pub fn effect_names(&self) -> Vec<String> {
        self.labels.keys().cloned().collect()
    }
}

/// The type language.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Type {
    /// Primitive or user type constant: `Int`, `Bool`, `Color`.
    Con(String),
    Var(TyVar),
    Func {
        params: Vec<Type>,
        ret: Box<Type>,
        effects: Row,
    },
    /// Applied type constructor: `Option[a]`.
    App {
        ctor: String,
        args: Vec<Type>,
    },
    List(Box<Type>),
    Tuple(Vec<Type>),
    Record(Row),
}

impl Type {
    #[must_use]
    pub fn int() -> Self {
        Self::Con("Int".to_owned())
    }

    #[must_use]
    pub fn float() -> Self {
        Self::Con("Float".to_owned())
    }

    #[must_use]
    pub fn string() -> Self {
        Self::Con("String".to_owned())
    }

    #[must_use]
    pub fn bool() -> Self {
        Self::Con("Bool".to_owned())
    }

    #[must_use]
    pub fn unit() -> Self {
        Self::Con("Unit".to_owned())
    }

    #[must_use]
    pub fn char() -> Self {
        Self::Con("Char".to_owned())
    }

    /// A pure function type.
    #[must_use]
    pub fn func(params: Vec<Self>, ret: Self) -> Self {
        Self::Func {
            params,
            ret: Box::new(ret),
            effects: Row::pure_effects(),
        }
    }

    /// A function type with the given effect names.
    #[must_use]
    pub fn effectful(params: Vec<Self>, ret: Self, effects: impl IntoIterator<Item = String>) -> Self {
        Self::Func {
            params,
            ret: Box::new(ret),
            effects: Row::effects(effects),
        }
    }

    /// The outermost constructor name, used for instance lookup and
    /// dictionary keys. `None` for variables.
    #[must_use]
    pub fn head(&self) -> Option<&str> {
        match self {
            Self::Con(name) => Some(name),
            Self::App { ctor, .. } => Some(ctor),
            Self::List(_) => Some("List"),
            Self::Tuple(_) => Some("Tuple"),
            Self::Record(_) => Some("Record"),
            Self::Func { .. } => Some("Func"),
            Self::Var(_) => None,
        }
    }

    /// Collects free variables (type and row) in first-occurrence order.
    #[must_use]
    pub fn free_vars(&self) -> Vec<TyVar> {
        let mut out = Vec::new();
        self.collect_free(&mut out);
        out
    }

    fn collect_free(&self, out: &mut Vec<TyVar>) {
        match self {
            Self::Con(_) => {}
            Self::Var(v) => {
                if !out.contains(v) {
                    out.push(v.clone());
                }
            }
            Self::Func { params, ret, effects } => {
                for p in params {
                    p.collect_free(out);
                }
                ret.collect_free(out);
                collect_row_free(effects, out);
            }
            Self::App { args, .. } => {
                for a in args {
                    a.collect_free(out);
                }
            }
            Self::List(elem) => elem.collect_free(out),
            Self::Tuple(elems) => {
                for e in elems {
                    e.collect_free(out);
                }
            }
            Self::Record(row) => collect_row_free(row, out),
        }
    }
}

fn collect_row_free(row: &Row, out: &mut Vec<TyVar>) {
    for ty in row.labels.values() {
        ty.collect_free(out);
    }
    if let Some(tail) = &row.tail {
        if !out.contains(tail) {
            out.push(tail.clone());
        }
    }
}

/// A class constraint `Class(Type)`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ClassConstraint {
    pub class: String,
    pub ty: Type,
}

impl fmt::Display for ClassConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.class, self.ty)
    }
}

/// A type scheme `∀ vars. constraints ⇒ ty`.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Scheme {
    pub vars: Vec<TyVar>,
    pub constraints: Vec<ClassConstraint>,
    pub ty: Type,
}

impl Scheme {
    /// A scheme with no quantified variables.
    #[must_use]
    pub fn mono(ty: Type) -> Self {
        Self {
            vars: Vec::new(),
            constraints: Vec::new(),
            ty,
        }
    }

    /// Canonical form: variables renamed `a, b, c, …` in first-occurrence
    /// order of the body, binders sorted, constraints sorted and
    /// deduplicated. Two schemes that differ only in variable naming or
    /// binder order canonicalize identically.
    #[must_use]
    pub fn canonicalize(&self) -> Self {
        let occurrence = self.ty.free_vars();
        let mut ordered: Vec<&TyVar> = occurrence.iter().filter(|v| self.vars.contains(*v)).collect();
        for v in &self.vars {
            if !ordered.contains(&v) {
                ordered.push(v);
            }
        }
        let mut subst = Subst::default();
        let mut new_vars = Vec::new();
        for (index, var) in ordered.iter().enumerate() {
            let fresh = TyVar {
                name: alpha_name(index),
                kind: var.kind,
            };
            new_vars.push(fresh.clone());
            match var.kind {
                Kind::Star => {
                    subst.types.insert(var.name.clone(), Type::Var(fresh));
                }
                Kind::RecordRow | Kind::EffectRow => {
                    subst.rows.insert(
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
        let ty = subst.apply(&self.ty);
        let mut constraints: Vec<ClassConstraint> = self
            .constraints
            .iter()
            .map(|c| ClassConstraint {
                class: c.class.clone(),
                ty: subst.apply(&c.ty),
            })
            .collect();
        constraints.sort_by(|a, b| (&a.class, a.ty.to_string()).cmp(&(&b.class, b.ty.to_string())));
        constraints.dedup();
        new_vars.sort_by(|a, b| a.name.cmp(&b.name));
        Self {
            vars: new_vars,
            constraints,
            ty,
        }
    }
}

/// `a, b, …, z, a1, b1, …`
fn alpha_name(index: usize) -> String {
    let letter = char::from(b'a' + (index % 26) as u8);
    let round = index / 26;
    if round == 0 {
        letter.to_string()
    } else {
        format!("{letter}{round}")
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.vars.is_empty() {
            f.write_str("forall ")?;
            for (i, v) in self.vars.iter().enumerate() {
                if i > 0 {
                    f.write_str(" ")?;
                }
                f.write_str(&v.name)?;
            }
            f.write_str(". ")?;
        }
        if !self.constraints.is_empty() {
            for (i, c) in self.constraints.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{c}")?;
            }
            f.write_str(" => ")?;
        }
        write!(f, "{}", self.ty)
    }
}

/// A substitution over type and row variables.
#[derive(Debug, Clone, Default)]
pub struct Subst {
    pub types: ahash::AHashMap<String, Type>,
    pub rows: ahash::AHashMap<String, Row>,
}

impl Subst {
    /// Applies the substitution, following chains to a fixed point.
    #[must_use]
    pub fn apply(&self, ty: &Type) -> Type {
        match ty {
            Type::Con(_) => ty.clone(),
            Type::Var(v) => match self.types.get(&v.name) {
                Some(bound) => self.apply(bound),
                None => ty.clone(),
            },
            Type::Func { params, ret, effects } => Type::Func {
                params: params.iter().map(|p| self.apply(p)).collect(),
                ret: Box::new(self.apply(ret)),
                effects: self.apply_row(effects),
            },
            Type::App { ctor, args } => Type::App {
                ctor: ctor.clone(),
                args: args.iter().map(|a| self.apply(a)).collect(),
            },
            Type::List(elem) => Type::List(Box::new(self.apply(elem))),
            Type::Tuple(elems) => Type::Tuple(elems.iter().map(|e| self.apply(e)).collect()),
            Type::Record(row) => Type::Record(self.apply_row(row)),
        }
    }

    /// Applies to a row, merging resolved tails into the label set.
    #[must_use]
    pub fn apply_row(&self, row: &Row) -> Row {
        let mut labels: BTreeMap<String, Type> = row
            .labels
            .iter()
            .map(|(name, ty)| (name.clone(), self.apply(ty)))
            .collect();
        let mut tail = row.tail.clone();
        while let Some(var) = &tail {
            let Some(resolved) = self.rows.get(&var.name) else { break };
            let resolved = resolved.clone();
            for (name, ty) in &resolved.labels {
                labels.entry(name.clone()).or_insert_with(|| self.apply(ty));
            }
            tail = resolved.tail;
        }
        Row {
            kind: row.kind,
            labels,
            tail,
        }
    }
}

/// Converts a surface type expression into a [`Type`].
///
/// `lookup_var` supplies the type for each type-variable name (so callers
/// control whether `a` maps to a quantified or fresh variable); unknown
/// constructors are left as `Con`/`App` for the inference engine to
/// validate against the ADT table.
pub fn from_type_expr(expr: &TypeExpr, lookup_var: &mut impl FnMut(&str) -> Type) -> Type {
    match expr {
        TypeExpr::Con(name) => Type::Con(name.clone()),
        TypeExpr::Var(name) => lookup_var(name),
        TypeExpr::App { ctor, args } => Type::App {
            ctor: ctor.clone(),
            args: args.iter().map(|a| from_type_expr(a, lookup_var)).collect(),
        },
        TypeExpr::List(elem) => Type::List(Box::new(from_type_expr(elem, lookup_var))),
        TypeExpr::Tuple(elems) => Type::Tuple(elems.iter().map(|e| from_type_expr(e, lookup_var)).collect()),
        TypeExpr::Record(fields) => Type::Record(Row::record(
            fields
                .iter()
                .map(|(name, ty)| (name.clone(), from_type_expr(ty, lookup_var))),
        )),
        TypeExpr::Func { params, ret, effects } => Type::Func {
            params: params.iter().map(|p| from_type_expr(p, lookup_var)).collect(),
            ret: Box::new(from_type_expr(ret, lookup_var)),
            effects: Row::effects(effects.iter().cloned()),
        },
        TypeExpr::Unit => Type::unit(),
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Con(name) => f.write_str(name),
            Self::Var(v) => f.write_str(&v.name),
            Self::Func { params, ret, effects } => {
                f.write_str("(")?;
                for (i, p) in params.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{p}")?;
                }
                write!(f, ") -> {ret}")?;
                if !effects.labels.is_empty() || effects.tail.is_some() {
                    f.write_str(" ! {")?;
                    let mut first = true;
                    for name in effects.labels.keys() {
                        if !first {
                            f.write_str(", ")?;
                        }
                        f.write_str(name)?;
                        first = false;
                    }
                    if let Some(tail) = &effects.tail {
                        if !first {
                            f.write_str(" | ")?;
                        }
                        f.write_str(&tail.name)?;
                    }
                    f.write_str("}")?;
                }
                Ok(())
            }
            Self::App { ctor, args } => {
                f.write_str(ctor)?;
                f.write_str("[")?;
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{a}")?;
                }
                f.write_str("]")
            }
            Self::List(elem) => write!(f, "[{elem}]"),
            Self::Tuple(elems) => {
                f.write_str("(")?;
                for (i, e) in elems.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{e}")?;
                }
                f.write_str(")")
            }
            Self::Record(row) => {
                f.write_str("{")?;
                let mut first = true;
                for (name, ty) in &row.labels {
                    if !first {
                        f.write_str(", ")?;
                    }
                    write!(f, "{name}: {ty}")?;
                    first = false;
                }
                if let Some(tail) = &row.tail {
                    if !first {
                        f.write_str(" | ")?;
                    }
                    f.write_str(&tail.name)?;
                }
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_names() {
        assert_eq!(Type::int().head(), Some("Int"));
        assert_eq!(Type::List(Box::new(Type::int())).head(), Some("List"));
        assert_eq!(
            Type::App {
                ctor: "Option".to_owned(),
                args: vec![Type::int()]
            }
            .head(),
            Some("Option")
        );
        assert_eq!(Type::Var(TyVar::star("t0")).head(), None);
    }

    #[test]
    fn canonicalization_renames_in_occurrence_order() {
        // forall t9 t3. (t9, t3) -> t9   ≡   forall a b. (a, b) -> a
        let scheme = Scheme {
            vars: vec![TyVar::star("t9"), TyVar::star("t3")],
            constraints: Vec::new(),
            ty: Type::func(
                vec![Type::Var(TyVar::star("t9")), Type::Var(TyVar::star("t3"))],
                Type::Var(TyVar::star("t9")),
            ),
        };
        let canon = scheme.canonicalize();
        assert_eq!(canon.to_string(), "forall a b. (a, b) -> a");
    }

    #[test]
    fn canonicalization_is_stable_under_binder_reordering() {
        let body = Type::func(
            vec![Type::Var(TyVar::star("x")), Type::Var(TyVar::star("y"))],
            Type::Var(TyVar::star("y")),
        );
        let a = Scheme {
            vars: vec![TyVar::star("x"), TyVar::star("y")],
            constraints: Vec::new(),
            ty: body.clone(),
        };
        let b = Scheme {
            vars: vec![TyVar::star("y"), TyVar::star("x")],
            constraints: Vec::new(),
            ty: body,
        };
        assert_eq!(a.canonicalize(), b.canonicalize());
    }

    #[test]
    fn substitution_follows_chains() {
        let mut subst = Subst::default();
        subst.types.insert("t0".to_owned(), Type::Var(TyVar::star("t1")));
        subst.types.insert("t1".to_owned(), Type::int());
        assert_eq!(subst.apply(&Type::Var(TyVar::star("t0"))), Type::int());
    }

    #[test]
    fn applying_subst_to_ground_type_is_noop() {
        let mut subst = Subst::default();
        subst.types.insert("t0".to_owned(), Type::float());
        let ground = Type::func(vec![Type::int()], Type::string());
        assert_eq!(subst.apply(&ground), ground);
    }

    #[test]
    fn row_tail_resolution_merges_labels() {
        let mut subst = Subst::default();
        let tail = TyVar {
            name: "r0".to_owned(),
            kind: Kind::RecordRow,
        };
        subst.rows.insert(
            "r0".to_owned(),
            Row::record([("y".to_owned(), Type::int())]),
        );
        let open = Row {
            kind: Kind::RecordRow,
            labels: BTreeMap::from([("x".to_owned(), Type::int())]),
            tail: Some(tail),
        };
        let resolved = subst.apply_row(&open);
        assert!(resolved.is_closed());
        assert_eq!(resolved.labels.len(), 2);
    }

    #[test]
    fn effect_row_display() {
        let ty = Type::effectful(vec![Type::unit()], Type::string(), ["IO".to_owned()]);
        assert_eq!(ty.to_string(), "(Unit) -> String ! {IO}");
    }
}
