//! Module interfaces ("ailang.iface/v1"): typed exports, canonical JSON,
//! SHA-256 digest.
//!
//! The serialized form is fully canonical — arrays sorted, type variables
//! α-normalized, effect rows sorted — so two logically identical interfaces
//! produce identical digests regardless of source ordering.

use indexmap::IndexMap;
use sha2::{Digest, Sha256};

use crate::{
    anf::Program,
    infer::ModuleTypes,
    types::{Row, Scheme, TyVar, Type, from_type_expr},
};

/// Schema identifier emitted in every interface.
pub const IFACE_SCHEMA: &str = "ailang.iface/v1";

/// An exported type declaration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IfaceType {
    pub name: String,
    pub params: Vec<String>,
    pub ctors: Vec<String>,
}

/// An exported function.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IfaceFunc {
    pub name: String,
    /// Canonical scheme rendering (sorted binders, `a, b, c, …` naming).
    #[serde(rename = "type")]
    pub ty: String,
    /// Sorted effect names of the function's top-level row.
    pub effects: Vec<String>,
    pub pure: bool,
}

/// An exported constructor.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IfaceCtor {
    pub type_name: String,
    pub ctor_name: String,
    pub field_types: Vec<String>,
    pub result_type: String,
    pub arity: usize,
}

/// A module's typed export surface.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Interface {
    pub schema: String,
    pub module: String,
    pub types: Vec<IfaceType>,
    pub funcs: Vec<IfaceFunc>,
    pub ctors: Vec<IfaceCtor>,
    pub digest: String,
    /// In-memory schemes backing `funcs`, for dependent-module type
    /// checking. Not part of the serialized canonical form.
    #[serde(skip)]
    pub schemes: IndexMap<String, Scheme>,
}

impl Interface {
    /// The canonical JSON form used for hashing: the interface with the
    /// digest field cleared. Key order follows struct declaration order
    /// and every array is sorted by the builder.
    #[must_use]
    fn canonical_json(&self) -> String {
        let mut clean = self.clone();
        clean.digest = String::new();
        serde_json::to_string(&clean).expect("interface serialization cannot fail")
    }

    /// Serializes the interface including its digest.
    #[must_use]
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).expect("interface serialization cannot fail")
    }

    /// Recomputes the digest from current content.
    #[must_use]
    pub fn computed_digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex(&hasher.finalize())
    }

    /// Verifies the stored digest matches the content.
    #[must_use]
    pub fn digest_is_valid(&self) -> bool {
        self.digest == self.computed_digest()
    }
}

fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Builds the interface for a type-checked module.
///
/// Collects declarations flagged as exports, canonicalizes their schemes,
/// records exported ADTs and constructors with arity, sorts everything,
/// and seals the result with a SHA-256 digest.
#[must_use]
pub fn build_interface(program: &Program, types: &ModuleTypes) -> Interface {
    let mut funcs = Vec::new();
    let mut schemes = IndexMap::new();
    for decl in &program.decls {
        if !decl.meta.is_export {
            continue;
        }
        let Some(scheme) = types.decl_schemes.get(&decl.name) else { continue };
        let canonical = scheme.canonicalize();
        let effects = top_level_effects(&canonical.ty);
        funcs.push(IfaceFunc {
            name: decl.name.clone(),
            ty: canonical.to_string(),
            effects,
            pure: decl.meta.is_pure,
        });
        schemes.insert(decl.name.clone(), canonical);
    }
    funcs.sort_by(|a, b| a.name.cmp(&b.name));

    let mut iface_types = Vec::new();
    let mut ctors = Vec::new();
    for alias in &program.aliases {
        if alias.is_export {
            iface_types.push(IfaceType {
                name: alias.name.clone(),
                params: alias.params.clone(),
                ctors: Vec::new(),
            });
        }
    }
    for adt in &program.adts {
        if !adt.is_export {
            continue;
        }
        let mut ctor_names: Vec<String> = adt.ctors.iter().map(|c| c.name.clone()).collect();
        ctor_names.sort();
        iface_types.push(IfaceType {
            name: adt.name.clone(),
            params: adt.params.clone(),
            ctors: ctor_names,
        });
        for ctor in &adt.ctors {
            let scheme = ctor_as_scheme(&adt.name, &adt.params, &ctor.fields);
            let (field_types, result_type) = match &scheme.ty {
                Type::Func { params, ret, .. } => {
                    (params.iter().map(ToString::to_string).collect(), ret.to_string())
                }
                other => (Vec::new(), other.to_string()),
            };
            ctors.push(IfaceCtor {
                type_name: ctor.adt.clone(),
                ctor_name: ctor.name.clone(),
                arity: ctor.fields.len(),
                field_types,
                result_type,
            });
        }
    }
    iface_types.sort_by(|a, b| a.name.cmp(&b.name));
    ctors.sort_by(|a, b| (&a.type_name, &a.ctor_name).cmp(&(&b.type_name, &b.ctor_name)));

    let mut interface = Interface {
        schema: IFACE_SCHEMA.to_owned(),
        module: program.module.clone(),
        types: iface_types,
        funcs,
        ctors,
        digest: String::new(),
        schemes,
    };
    interface.digest = interface.computed_digest();
    interface
}

/// A constructor as a canonical scheme over its ADT's parameters.
fn ctor_as_scheme(adt: &str, params: &[String], fields: &[crate::surface::TypeExpr]) -> Scheme {
    let vars: Vec<TyVar> = params.iter().map(|p| TyVar::star(p.clone())).collect();
    let args: Vec<Type> = vars.iter().map(|v| Type::Var(v.clone())).collect();
    let result = if params.is_empty() {
        Type::Con(adt.to_owned())
    } else {
        Type::App {
            ctor: adt.to_owned(),
            args,
        }
    };
    let field_types: Vec<Type> = fields
        .iter()
        .map(|f| {
            let mut lookup = |name: &str| Type::Var(TyVar::star(name));
            from_type_expr(f, &mut lookup)
        })
        .collect();
    let ty = if field_types.is_empty() {
        result
    } else {
        Type::Func {
            params: field_types,
            ret: Box::new(result),
            effects: Row::pure_effects(),
        }
    };
    Scheme {
        vars,
        constraints: Vec::new(),
        ty,
    }
    .canonicalize()
}

/// Sorted effect names of the outermost function row, empty for values.
fn top_level_effects(ty: &Type) -> Vec<String> {
    match ty {
        Type::Func { effects, .. } => effects.effect_names(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dict::InstanceRegistry,
        elaborate::elaborate,
        infer::{ExternalTypes, infer_module},
        parse::parse_text,
    };

    fn interface_of(source: &str) -> Interface {
        let (file, _) = parse_text("test.ail", source);
        let program = elaborate("test.ail", "m", &file).unwrap();
        let registry = InstanceRegistry::with_prelude();
        let types = infer_module("test.ail", &program, &registry, &ExternalTypes::default()).unwrap();
        build_interface(&program, &types)
    }

    #[test]
    fn digest_ignores_declaration_order() {
        let a = interface_of("export func f() -> Int { 1 }\nexport func g() -> Bool { true }");
        let b = interface_of("export func g() -> Bool { true }\nexport func f() -> Int { 1 }");
        assert_eq!(a.digest, b.digest);
        assert!(a.digest_is_valid());
    }

    #[test]
    fn digest_changes_with_abi() {
        let a = interface_of("export func f() -> Int { 1 }");
        let b = interface_of("export func f() -> Bool { true }");
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn non_exports_are_invisible() {
        let a = interface_of("export func f() -> Int { 1 }");
        let b = interface_of("export func f() -> Int { helper() }\nfunc helper() -> Int { 1 }");
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn schemes_are_alpha_normalized() {
        let a = interface_of("export func pick(x, y) = x");
        assert_eq!(a.funcs[0].ty, "forall a b. (a, b) -> a");
    }

    #[test]
    fn effects_surface_in_funcs() {
        let (file, _) = parse_text("test.ail", "export func f() -> Int ! {IO} { 1 }");
        let program = elaborate("test.ail", "m", &file).unwrap();
        let registry = InstanceRegistry::with_prelude();
        let types = infer_module("test.ail", &program, &registry, &ExternalTypes::default()).unwrap();
        let iface = build_interface(&program, &types);
        assert_eq!(iface.funcs[0].effects, vec!["IO".to_owned()]);
        assert!(!iface.funcs[0].pure);
    }

    #[test]
    fn ctors_recorded_with_arity() {
        let iface = interface_of("export type Shape = Circle(Float) | Point");
        assert_eq!(iface.ctors.len(), 2);
        let circle = iface.ctors.iter().find(|c| c.ctor_name == "Circle").unwrap();
        assert_eq!(circle.arity, 1);
        assert_eq!(circle.result_type, "Shape");
        let point = iface.ctors.iter().find(|c| c.ctor_name == "Point").unwrap();
        assert_eq!(point.arity, 0);
    }

    #[test]
    fn digest_validation_detects_tampering() {
        let mut iface = interface_of("export func f() -> Int { 1 }");
        iface.funcs[0].ty = "() -> Bool".to_owned();
        assert!(!iface.digest_is_valid());
    }
}
