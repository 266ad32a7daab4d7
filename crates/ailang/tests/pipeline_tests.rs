//! End-to-end pipeline tests: source text in, value and output out.

use ailang::{
    CollectStringPrint, EffectContext, MockFs, NoHttp, QueueInput, RunConfig, RunOutcome, Runner, Value,
};

/// Compiles and runs a single in-memory module, capturing print output.
fn run_with(source: &str, ctx: &EffectContext) -> (RunOutcome, String) {
    let runner = match Runner::from_source(source, RunConfig::default()) {
        Ok(runner) => runner,
        Err(reports) => panic!("compilation failed: {reports:#?}"),
    };
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut fs = MockFs::new();
    let mut http = NoHttp;
    let outcome = runner.run(ctx, &mut print, &mut input, &mut fs, &mut http, Vec::new());
    (outcome, print.into_output())
}

fn run_ok(source: &str) -> Value {
    let (outcome, _) = run_with(source, &EffectContext::none());
    assert_eq!(outcome.exit_code, 0, "unexpected failure: {:#?}", outcome.reports);
    outcome.value.expect("successful runs produce a value")
}

#[test]
fn addition_returns_three_and_prints_nothing() {
    let source = "module main\nexport func main() -> Int { 1 + 2 }";
    let (outcome, output) = run_with(source, &EffectContext::none());
    assert_eq!(outcome.exit_code, 0);
    assert!(matches!(outcome.value, Some(Value::Int(3))));
    assert_eq!(output, "");
}

#[test]
fn factorial_of_five_is_120() {
    let source = "export func fact(n: Int) -> Int { if n <= 1 then 1 else n * fact(n - 1) }\n\
                  export func main() = fact(5)";
    assert!(matches!(run_ok(source), Value::Int(120)));
}

#[test]
fn mutual_recursion_is_even_odd() {
    let source = "export func isEven(n: Int) -> Bool { if n == 0 then true else isOdd(n - 1) }\n\
                  export func isOdd(n: Int) -> Bool { if n == 0 then false else isEven(n - 1) }\n\
                  export func main() -> (Bool, Bool) { (isEven(42), isOdd(0)) }";
    let Value::Tuple(pair) = run_ok(source) else { panic!("expected tuple") };
    assert!(matches!(pair[0], Value::Bool(true)));
    assert!(matches!(pair[1], Value::Bool(false)));
}

#[test]
fn float_equality_dispatches_to_the_float_dictionary() {
    // the regression this guards: `b == 0.0` with `b` a variable must use
    // Float equality, never Int equality
    let source = "export func main() -> Bool { let b: Float = 0.0 in b == 0.0 }";
    assert!(matches!(run_ok(source), Value::Bool(true)));
}

#[test]
fn nan_equality_is_reflexive() {
    let source = "export func main() -> Bool { let nan: Float = 0.0 / 0.0 in nan == nan }";
    assert!(matches!(run_ok(source), Value::Bool(true)));
}

#[test]
fn nan_ordering_stays_ieee() {
    let source = "export func main() -> Bool { let nan: Float = 0.0 / 0.0 in nan < nan }";
    assert!(matches!(run_ok(source), Value::Bool(false)));
}

#[test]
fn record_access_and_update() {
    let source = "export func main() -> (String, Int) {\n\
                  let r = {name: \"Alice\", age: 30} in\n\
                  let bumped = {r | age: 31} in\n\
                  (bumped.name, bumped.age)\n\
                  }";
    let Value::Tuple(pair) = run_ok(source) else { panic!("expected tuple") };
    assert!(matches!(&pair[0], Value::Str(s) if &**s == "Alice"));
    assert!(matches!(pair[1], Value::Int(31)));
}

#[test]
fn record_update_preserves_untouched_fields() {
    let source = "export func main() -> String { let r = {name: \"Alice\", age: 30} in {r | age: 31}.name }";
    assert!(matches!(run_ok(source), Value::Str(s) if &*s == "Alice"));
}

#[test]
fn println_writes_through_the_sink() {
    let source = "module main\nimport std/io (println)\n\
                  export func main() -> Int ! {IO} { println(\"hello\"); println(\"world\"); 0 }";
    let (outcome, output) = run_with(source, &EffectContext::unrestricted());
    assert_eq!(outcome.exit_code, 0, "{:#?}", outcome.reports);
    assert_eq!(output, "hello\nworld\n");
}

#[test]
fn show_renders_values() {
    let source = "export func main() -> String { show([1, 2, 3]) }";
    assert!(matches!(run_ok(source), Value::Str(s) if &*s == "[1, 2, 3]"));
}

#[test]
fn string_and_list_concat() {
    let source = "export func main() -> (String, [Int]) { (\"ab\" ++ \"cd\", [1] ++ [2, 3]) }";
    let Value::Tuple(pair) = run_ok(source) else { panic!() };
    assert!(matches!(&pair[0], Value::Str(s) if &**s == "abcd"));
    assert!(matches!(&pair[1], Value::List(items) if items.len() == 3));
}

#[test]
fn adt_construction_and_matching() {
    let source = "export type Shape = Circle(Float) | Square(Float) | Dot\n\
                  export func area(s: Shape) -> Float {\n\
                  match s { Circle(r) => 3.0 * r * r, Square(w) => w * w, Dot => 0.0 }\n\
                  }\n\
                  export func main() -> Float { area(Square(4.0)) }";
    assert!(matches!(run_ok(source), Value::Float(v) if (v - 16.0).abs() < f64::EPSILON));
}

#[test]
fn list_patterns_with_rest() {
    let source = "export func sum(xs: [Int]) -> Int { match xs { [] => 0, [x, ...rest] => x + sum(rest) } }\n\
                  export func main() -> Int { sum([1, 2, 3, 4]) }";
    assert!(matches!(run_ok(source), Value::Int(10)));
}

#[test]
fn guards_are_evaluated() {
    let source = "export func classify(n: Int) -> String {\n\
                  match n { x if x < 0 => \"neg\", 0 => \"zero\", _ => \"pos\" }\n\
                  }\n\
                  export func main() -> (String, String, String) { (classify(0 - 5), classify(0), classify(9)) }";
    let Value::Tuple(parts) = run_ok(source) else { panic!() };
    assert!(matches!(&parts[0], Value::Str(s) if &**s == "neg"));
    assert!(matches!(&parts[1], Value::Str(s) if &**s == "zero"));
    assert!(matches!(&parts[2], Value::Str(s) if &**s == "pos"));
}

#[test]
fn failed_match_is_eva002_exit_4() {
    let source = "export func main() -> Int { match 3 { 1 => 10, 2 => 20 } }";
    let (outcome, _) = run_with(source, &EffectContext::none());
    assert_eq!(outcome.exit_code, 4);
    assert!(outcome.reports.iter().any(|r| r.code == "EVA002"));
}

#[test]
fn integer_division_by_zero_is_rt003_exit_4() {
    let source = "export func main() -> Int { let z = 0 in 1 / z }";
    let (outcome, _) = run_with(source, &EffectContext::none());
    assert_eq!(outcome.exit_code, 4, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "RT003"));
}

#[test]
fn type_errors_exit_2() {
    let source = "export func main() -> Int { \"nope\" }";
    let reports = Runner::from_source(source, RunConfig::default()).unwrap_err();
    assert!(reports.iter().any(|r| r.code == "TC001"));
    assert_eq!(reports[0].exit_code(), 2);
}

#[test]
fn higher_order_functions_and_partial_application() {
    let source = "export func apply(f: (Int) -> Int, x: Int) -> Int { f(x) }\n\
                  export func main() -> Int { apply(\\n. n * 2, 21) }";
    assert!(matches!(run_ok(source), Value::Int(42)));
}

#[test]
fn curried_lambda_applies_to_full_argument_list() {
    let source = "export func main() -> Int { (\\x y. x + y)(40, 2) }";
    assert!(matches!(run_ok(source), Value::Int(42)));
}

#[test]
fn blocks_sequence_left_to_right() {
    let source = "module main\nimport std/io (println)\n\
                  export func main() -> Int ! {IO} {\n\
                  println(\"first\");\n\
                  println(\"second\");\n\
                  let x = 1;\n\
                  x + 1\n\
                  }";
    let (outcome, output) = run_with(source, &EffectContext::unrestricted());
    assert!(matches!(outcome.value, Some(Value::Int(2))), "{:#?}", outcome.reports);
    assert_eq!(output, "first\nsecond\n");
}

#[test]
fn entry_args_are_passed_through() {
    let source = "export func main(n: Int) -> Int { n * 2 }";
    let runner = Runner::from_source(source, RunConfig::default()).unwrap();
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut fs = MockFs::new();
    let mut http = NoHttp;
    let outcome = runner.run(
        &EffectContext::none(),
        &mut print,
        &mut input,
        &mut fs,
        &mut http,
        vec![Value::Int(21)],
    );
    assert!(matches!(outcome.value, Some(Value::Int(42))));
}

#[test]
fn user_instances_drive_operators() {
    let source = "export type Color = Red | Green | Blue\n\
                  export func main() -> Bool { Red == Red }";
    // structural Eq is derived for ADTs
    assert!(matches!(run_ok(source), Value::Bool(true)));
}

#[test]
fn warnings_do_not_block_execution() {
    let source = "export type Color = Red | Green\n\
                  export func pick(c: Color) -> Int { match c { Red => 1 } }\n\
                  export func main() -> Int { pick(Red) }";
    let runner = Runner::from_source(source, RunConfig::default()).unwrap();
    assert!(runner.warnings().iter().any(|r| r.code == "ELB004"));
}
