//! Ingestion invariants: normalization idempotence and BOM/CRLF/NFD
//! invariance all the way through the pipeline.

use ailang::{RunConfig, Runner, normalize};
use pretty_assertions::assert_eq;

const BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

#[test]
fn normalization_is_idempotent_on_assorted_inputs() {
    let inputs: &[&[u8]] = &[
        b"",
        b"module t",
        b"a\r\nb\r\n",
        "caf\u{0065}\u{0301}".as_bytes(), // NFD "café"
        b"-- comment only\n",
        "\u{00E9}\u{00E9}".as_bytes(),
    ];
    for input in inputs {
        let once = normalize(input).unwrap();
        let twice = normalize(once.as_bytes()).unwrap();
        assert_eq!(once, twice, "normalize must be idempotent for {input:?}");
    }
}

#[test]
fn bom_crlf_nfd_variants_produce_the_same_digest() {
    let base = "export func caf\u{00E9}() -> Int { 1 + 2 }\nexport func main() -> Int { caf\u{00E9}() }\n";
    let digest = |bytes: &[u8]| {
        let text = normalize(bytes).unwrap();
        let runner = Runner::from_source(&text, RunConfig::default()).expect("compilation failed");
        runner.interface_of("main").unwrap().digest.clone()
    };

    let plain = digest(base.as_bytes());

    let with_bom: Vec<u8> = [BOM, base.as_bytes()].concat();
    assert_eq!(plain, digest(&with_bom));

    let with_crlf = base.replace('\n', "\r\n");
    assert_eq!(plain, digest(with_crlf.as_bytes()));

    // decompose é into e + combining acute
    let nfd = base.replace('\u{00E9}', "e\u{0301}");
    assert_eq!(plain, digest(nfd.as_bytes()));
}

#[test]
fn reports_serialize_deterministically() {
    let source = "export func main() -> Int { nope }";
    let a = Runner::from_source(source, RunConfig::default()).unwrap_err();
    let b = Runner::from_source(source, RunConfig::default()).unwrap_err();
    let render = |reports: &[ailang::Report]| {
        reports.iter().map(ailang::Report::to_json).collect::<Vec<_>>().join("\n")
    };
    assert_eq!(render(&a), render(&b));
}

#[test]
fn error_schema_versioning() {
    assert!(ailang::schema_accepts("ailang.error/v1", "ailang.error/v1.3"));
    assert!(!ailang::schema_accepts("ailang.error/v1", "ailang.error/v2.0"));
}

#[test]
fn every_emitted_code_is_registered() {
    // a sampling of failures across phases; every code they emit must
    // exist in the registry
    let sources = [
        "export func f( { }",                       // parse
        "export func main() -> Int { nope }",       // typecheck
        "export func main() -> Int { \"s\" }",      // typecheck mismatch
        "module main\nimport std/io (bogus)\n",     // loader
    ];
    for source in sources {
        if let Err(reports) = Runner::from_source(source, RunConfig::default()) {
            for report in &reports {
                assert!(
                    ailang::diagnostic::code_info(&report.code).is_some(),
                    "code {} not in registry",
                    report.code
                );
            }
        }
    }
}
