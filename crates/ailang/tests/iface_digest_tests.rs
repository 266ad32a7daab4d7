//! Interface determinism: logically identical export surfaces produce
//! identical digests regardless of source ordering or cosmetics.

use ailang::{RunConfig, Runner};
use pretty_assertions::assert_eq;

fn digest_of(source: &str) -> String {
    let runner = Runner::from_source(source, RunConfig::default()).expect("compilation failed");
    runner.interface_of("main").expect("main interface").digest.clone()
}

#[test]
fn declaration_order_does_not_change_the_digest() {
    let a = digest_of(
        "export type Option2[a] = Some2(a) | None2\n\
         export func first() -> Int { 1 }\n\
         export func second() -> Bool { true }",
    );
    let b = digest_of(
        "export func second() -> Bool { true }\n\
         export type Option2[a] = Some2(a) | None2\n\
         export func first() -> Int { 1 }",
    );
    assert_eq!(a, b);
}

#[test]
fn comments_and_whitespace_do_not_change_the_digest() {
    let a = digest_of("export func f(x: Int) -> Int { x + 1 }");
    let b = digest_of("-- a helper\nexport func f(x: Int)   ->   Int {\n  x + 1\n}\n");
    assert_eq!(a, b);
}

#[test]
fn private_helpers_do_not_change_the_digest() {
    let a = digest_of("export func f() -> Int { 1 }");
    let b = digest_of("func hidden() -> Int { 99 }\nexport func f() -> Int { hidden() }");
    assert_eq!(a, b);
}

#[test]
fn type_variable_names_are_alpha_normalized() {
    // the same polymorphic shape spelled with different annotations
    let a = digest_of("export func pick(x, y) = x");
    let b = digest_of("export func pick(first, second) = first");
    assert_eq!(a, b);
}

#[test]
fn abi_changes_change_the_digest() {
    let base = digest_of("export func f() -> Int { 1 }");
    let different_type = digest_of("export func f() -> Bool { true }");
    let different_name = digest_of("export func g() -> Int { 1 }");
    let extra_export = digest_of("export func f() -> Int { 1 }\nexport func g() -> Int { 2 }");
    assert_ne!(base, different_type);
    assert_ne!(base, different_name);
    assert_ne!(base, extra_export);
}

#[test]
fn effect_rows_are_part_of_the_abi() {
    let pure = digest_of("export func f() -> Int { 1 }");
    let effectful = digest_of("export func f() -> Int ! {IO} { 1 }");
    assert_ne!(pure, effectful);
}

#[test]
fn interface_json_is_stable_across_compilations() {
    let source = "export type Pair[a, b] = MkPair(a, b)\nexport func swap(p: Pair[Int, Bool]) -> Int { 1 }";
    let a = Runner::from_source(source, RunConfig::default()).unwrap();
    let b = Runner::from_source(source, RunConfig::default()).unwrap();
    assert_eq!(
        a.interface_of("main").unwrap().to_json(),
        b.interface_of("main").unwrap().to_json()
    );
}

#[test]
fn digests_validate_after_build() {
    let source = "export func f() -> Int { 1 }";
    let runner = Runner::from_source(source, RunConfig::default()).unwrap();
    assert!(runner.interface_of("main").unwrap().digest_is_valid());
}
