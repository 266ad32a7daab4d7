//! Capability gating at the effect boundary: denied operations never
//! reach the host, granted operations honor sandbox and budget
//! constraints.

use std::path::PathBuf;

use ailang::{
    CollectStringPrint, EffectContext, EffectName, MockFs, MockHttp, NoHttp, QueueInput, RunConfig, RunOutcome,
    Runner, Value,
};

fn run_fs(source: &str, ctx: &EffectContext, fs: &mut MockFs) -> RunOutcome {
    let runner = match Runner::from_source(source, RunConfig::default()) {
        Ok(runner) => runner,
        Err(reports) => panic!("compilation failed: {reports:#?}"),
    };
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut http = NoHttp;
    runner.run(ctx, &mut print, &mut input, fs, &mut http, Vec::new())
}

const READ_PROGRAM: &str = "module main\nimport std/fs (readFile)\n\
                            export func main() -> String ! {FS} { readFile(\"x.txt\") }";

#[test]
fn ungranted_fs_exits_5_without_touching_the_filesystem() {
    let mut fs = MockFs::new().with_file("x.txt", "secret");
    let outcome = run_fs(READ_PROGRAM, &EffectContext::none(), &mut fs);
    assert_eq!(outcome.exit_code, 5, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "EVA004"));
    assert!(fs.calls.is_empty(), "filesystem was touched: {:?}", fs.calls);
}

#[test]
fn granted_fs_reads_the_file() {
    let mut fs = MockFs::new().with_file("x.txt", "contents");
    let outcome = run_fs(READ_PROGRAM, &EffectContext::new([EffectName::FS]), &mut fs);
    assert_eq!(outcome.exit_code, 0, "{:#?}", outcome.reports);
    assert!(matches!(outcome.value, Some(Value::Str(s)) if &*s == "contents"));
    assert_eq!(fs.calls, vec!["read x.txt".to_owned()]);
}

#[test]
fn sandbox_escape_is_eva005_exit_5() {
    let source = "module main\nimport std/fs (readFile)\n\
                  export func main() -> String ! {FS} { readFile(\"../outside.txt\") }";
    let ctx = EffectContext::new([EffectName::FS]).with_fs_sandbox(PathBuf::from("/jail"));
    let mut fs = MockFs::new().with_file("/outside.txt", "secret");
    let outcome = run_fs(source, &ctx, &mut fs);
    assert_eq!(outcome.exit_code, 5, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "EVA005"));
    assert!(fs.calls.is_empty());
}

#[test]
fn sandboxed_path_resolves_under_the_root() {
    let source = "module main\nimport std/fs (readFile)\n\
                  export func main() -> String ! {FS} { readFile(\"inside.txt\") }";
    let ctx = EffectContext::new([EffectName::FS]).with_fs_sandbox(PathBuf::from("/jail"));
    let mut fs = MockFs::new().with_file("/jail/inside.txt", "ok");
    let outcome = run_fs(source, &ctx, &mut fs);
    assert_eq!(outcome.exit_code, 0, "{:#?}", outcome.reports);
    assert!(matches!(outcome.value, Some(Value::Str(s)) if &*s == "ok"));
}

#[test]
fn net_budget_exhaustion_is_eva006() {
    let source = "module main\nimport std/net (httpGet)\n\
                  export func main() -> String ! {Net} {\n\
                  httpGet(\"https://api.test/a\");\n\
                  httpGet(\"https://api.test/b\");\n\
                  httpGet(\"https://api.test/c\")\n\
                  }";
    let runner = Runner::from_source(source, RunConfig::default()).unwrap();
    let ctx = EffectContext::new([EffectName::Net]).with_net_budget(2);
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut fs = MockFs::new();
    let mut http = MockHttp::default();
    http.responses.insert("https://api.test/a".to_owned(), "A".to_owned());
    http.responses.insert("https://api.test/b".to_owned(), "B".to_owned());
    http.responses.insert("https://api.test/c".to_owned(), "C".to_owned());
    let outcome = runner.run(&ctx, &mut print, &mut input, &mut fs, &mut http, Vec::new());
    assert_eq!(outcome.exit_code, 5, "{:#?}", outcome.reports);
    assert!(outcome.reports.iter().any(|r| r.code == "EVA006"));
    assert_eq!(http.calls.len(), 2, "third request must not reach the client");
}

#[test]
fn net_allow_list_blocks_other_hosts() {
    let source = "module main\nimport std/net (httpGet)\n\
                  export func main() -> String ! {Net} { httpGet(\"https://evil.test/\") }";
    let runner = Runner::from_source(source, RunConfig::default()).unwrap();
    let ctx = EffectContext::new([EffectName::Net]).with_net_allow_list(vec!["https://api.test/".to_owned()]);
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut fs = MockFs::new();
    let mut http = MockHttp::default();
    let outcome = runner.run(&ctx, &mut print, &mut input, &mut fs, &mut http, Vec::new());
    assert_eq!(outcome.exit_code, 5);
    assert!(http.calls.is_empty());
}

#[test]
fn undeclared_effect_fails_type_checking_before_any_run() {
    // the function body performs FS but declares a pure signature
    let source = "module main\nimport std/fs (readFile)\n\
                  export func main() -> String { readFile(\"x.txt\") }";
    let reports = Runner::from_source(source, RunConfig::default()).unwrap_err();
    assert!(reports.iter().any(|r| r.code == "TC008"), "{reports:#?}");
}

#[test]
fn io_denied_by_default_context() {
    let source = "module main\nimport std/io (println)\n\
                  export func main() -> Int ! {IO} { println(\"x\"); 0 }";
    let mut fs = MockFs::new();
    let outcome = run_fs(source, &EffectContext::none(), &mut fs);
    assert_eq!(outcome.exit_code, 5);
    assert!(outcome.reports.iter().any(|r| r.code == "EVA004"));
}

#[test]
fn clock_is_non_destructive_and_granted_separately() {
    let source = "module main\nimport std/clock (now)\n\
                  export func main() -> Bool ! {Clock} { now() >= 0 }";
    let mut fs = MockFs::new();
    let outcome = run_fs(source, &EffectContext::new([EffectName::Clock]), &mut fs);
    assert_eq!(outcome.exit_code, 0, "{:#?}", outcome.reports);
    assert!(matches!(outcome.value, Some(Value::Bool(true))));
}

#[test]
fn readline_consumes_queued_input() {
    let source = "module main\nimport std/io (readLine)\n\
                  export func main() -> String ! {IO} { readLine() }";
    let runner = Runner::from_source(source, RunConfig::default()).unwrap();
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::new(["queued line".to_owned()]);
    let mut fs = MockFs::new();
    let mut http = NoHttp;
    let outcome = runner.run(
        &EffectContext::new([EffectName::IO]),
        &mut print,
        &mut input,
        &mut fs,
        &mut http,
        Vec::new(),
    );
    assert!(matches!(outcome.value, Some(Value::Str(s)) if &*s == "queued line"));
}
