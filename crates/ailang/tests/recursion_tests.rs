//! Recursion semantics: cell indirection, the function-first rule, and
//! the logical depth guard.

use ailang::{CollectStringPrint, EffectContext, MockFs, NoHttp, QueueInput, RunConfig, RunOutcome, Runner, Value};

fn run_with_config(source: &str, config: RunConfig) -> RunOutcome {
    let runner = match Runner::from_source(source, config) {
        Ok(runner) => runner,
        Err(reports) => panic!("compilation failed: {reports:#?}"),
    };
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut fs = MockFs::new();
    let mut http = NoHttp;
    runner.run(
        &EffectContext::none(),
        &mut print,
        &mut input,
        &mut fs,
        &mut http,
        Vec::new(),
    )
}

fn run(source: &str) -> RunOutcome {
    run_with_config(source, RunConfig::default())
}

#[test]
fn recursive_functions_terminate() {
    let outcome = run(
        "export func fib(n: Int) -> Int { if n < 2 then n else fib(n - 1) + fib(n - 2) }\n\
         export func main() -> Int { fib(15) }",
    );
    assert!(matches!(outcome.value, Some(Value::Int(610))), "{:#?}", outcome.reports);
}

#[test]
fn mutually_recursive_function_group_in_a_block() {
    let outcome = run(
        "export func main() -> Bool {\n\
         let even = \\n. if n == 0 then true else odd(n - 1);\n\
         let odd = \\n. if n == 0 then false else even(n - 1);\n\
         even(10)\n\
         }",
    );
    assert!(matches!(outcome.value, Some(Value::Bool(true))), "{:#?}", outcome.reports);
}

#[test]
fn non_function_self_cycle_is_rt_rec_001() {
    let outcome = run("export func main() -> Int { letrec x = x in x }");
    assert_eq!(outcome.exit_code, 4, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "RT_REC_001"));
}

#[test]
fn value_depending_on_later_value_in_group_is_rt_rec_001() {
    let outcome = run("export func main() -> Int { letrec a = b + 1, b = a + 1 in a }");
    assert_eq!(outcome.exit_code, 4, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "RT_REC_001"));
}

#[test]
fn function_first_rule_lets_values_call_earlier_functions() {
    // the lambda initializes before the value binding evaluates
    let outcome = run("export func main() -> Int { letrec f = \\n. n + 1, seed = f(41) in seed }");
    assert!(matches!(outcome.value, Some(Value::Int(42))), "{:#?}", outcome.reports);
}

#[test]
fn infinite_recursion_is_rt_rec_003_not_a_crash() {
    let outcome = run("export func main() -> Int { letrec loop = \\x. loop(0) in loop(0) }");
    assert_eq!(outcome.exit_code, 4, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "RT_REC_003"));
}

#[test]
fn depth_limit_is_configurable() {
    let config = RunConfig {
        max_recursion_depth: 16,
        ..RunConfig::default()
    };
    let outcome = run_with_config(
        "export func down(n: Int) -> Int { if n == 0 then 0 else down(n - 1) }\n\
         export func main() -> Int { down(1000) }",
        config,
    );
    assert_eq!(outcome.exit_code, 4);
    assert!(outcome.reports.iter().any(|r| r.code == "RT_REC_003"));
}

#[test]
fn deep_recursion_under_the_limit_succeeds() {
    let outcome = run(
        "export func down(n: Int) -> Int { if n == 0 then 0 else down(n - 1) }\n\
         export func main() -> Int { down(500) }",
    );
    assert!(matches!(outcome.value, Some(Value::Int(0))), "{:#?}", outcome.reports);
}

#[test]
fn top_level_declarations_form_one_recursive_group() {
    // `later` is declared after `earlier` but both see each other
    let outcome = run(
        "export func earlier(n: Int) -> Int { if n == 0 then 0 else later(n - 1) }\n\
         export func later(n: Int) -> Int { earlier(n) }\n\
         export func main() -> Int { earlier(9) }",
    );
    assert!(matches!(outcome.value, Some(Value::Int(0))), "{:#?}", outcome.reports);
}
