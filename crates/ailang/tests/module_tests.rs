//! Multi-module programs: cross-module calls, constructors, topological
//! initialization, and loader failures surfacing with the right codes.

use std::path::PathBuf;

use ailang::{
    CollectStringPrint, EffectContext, MockFs, NoHttp, QueueInput, RunConfig, RunOutcome, Runner, Value,
};

struct Project {
    root: PathBuf,
}

impl Project {
    fn new(tag: &str) -> Self {
        let root = std::env::temp_dir().join(format!("ailang-modules-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&root);
        std::fs::create_dir_all(&root).unwrap();
        Self { root }
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.root.join(format!("{name}.ail"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn run(&self, entry: &str) -> Result<RunOutcome, Vec<ailang::Report>> {
        let runner = Runner::from_file_in(&self.root.join(format!("{entry}.ail")), &self.root, RunConfig::default())?;
        let mut print = CollectStringPrint::new();
        let mut input = QueueInput::default();
        let mut fs = MockFs::new();
        let mut http = NoHttp;
        Ok(runner.run(
            &EffectContext::none(),
            &mut print,
            &mut input,
            &mut fs,
            &mut http,
            Vec::new(),
        ))
    }
}

impl Drop for Project {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.root);
    }
}

#[test]
fn cross_module_function_call() {
    let project = Project::new("call");
    project.write("lib/math", "module lib/math\nexport func double(n: Int) -> Int { n * 2 }\n");
    project.write(
        "main",
        "module main\nimport lib/math (double)\nexport func main() -> Int { double(21) }\n",
    );
    let outcome = project.run("main").unwrap();
    assert!(matches!(outcome.value, Some(Value::Int(42))), "{:#?}", outcome.reports);
}

#[test]
fn cross_module_constructors_and_patterns() {
    let project = Project::new("ctors");
    project.write(
        "lib/opt",
        "module lib/opt\nexport type Maybe[a] = Just(a) | Nothing\n\
         export func or_zero(m: Maybe[Int]) -> Int { match m { Just(x) => x, Nothing => 0 } }\n",
    );
    project.write(
        "main",
        "module main\nimport lib/opt (Maybe, Just, Nothing, or_zero)\n\
         export func main() -> (Int, Int) { (or_zero(Just(7)), or_zero(Nothing)) }\n",
    );
    let outcome = project.run("main").unwrap();
    let Some(Value::Tuple(pair)) = outcome.value else {
        panic!("expected tuple: {:#?}", outcome.reports)
    };
    assert!(matches!(pair[0], Value::Int(7)));
    assert!(matches!(pair[1], Value::Int(0)));
}

#[test]
fn diamond_dependencies_initialize_once_in_order() {
    let project = Project::new("diamond");
    project.write("lib/base", "module lib/base\nexport func one() -> Int { 1 }\n");
    project.write(
        "lib/left",
        "module lib/left\nimport lib/base (one)\nexport func two() -> Int { one() + 1 }\n",
    );
    project.write(
        "lib/right",
        "module lib/right\nimport lib/base (one)\nexport func three() -> Int { one() + 2 }\n",
    );
    project.write(
        "main",
        "module main\nimport lib/left (two)\nimport lib/right (three)\n\
         export func main() -> Int { two() + three() }\n",
    );
    let outcome = project.run("main").unwrap();
    assert!(matches!(outcome.value, Some(Value::Int(5))), "{:#?}", outcome.reports);
}

#[test]
fn import_cycle_exits_with_ldr002_naming_the_cycle() {
    let project = Project::new("cycle");
    project.write("a", "module a\nimport b\nexport func fa() -> Int { 1 }\n");
    project.write("b", "module b\nimport c\nexport func fb() -> Int { 1 }\n");
    project.write("c", "module c\nimport a\nexport func fc() -> Int { 1 }\n");
    let reports = project.run("a").unwrap_err();
    assert_eq!(reports[0].code, "LDR002");
    assert_eq!(reports[0].exit_code(), 1);
    let cycle: Vec<String> = reports[0]
        .data
        .get("cycle")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap();
    assert_eq!(cycle, vec!["a", "b", "c", "a"]);
}

#[test]
fn missing_module_is_ldr001() {
    let project = Project::new("missing");
    project.write("main", "module main\nimport lib/nope (f)\n");
    let reports = project.run("main").unwrap_err();
    assert_eq!(reports[0].code, "LDR001");
}

#[test]
fn importing_a_private_function_is_ldr003() {
    let project = Project::new("private");
    project.write("lib/a", "module lib/a\nfunc secret() -> Int { 1 }\n");
    project.write("main", "module main\nimport lib/a (secret)\n");
    let reports = project.run("main").unwrap_err();
    assert_eq!(reports[0].code, "LDR003");
}

#[test]
fn module_header_mismatch_is_mod001_with_fix() {
    let project = Project::new("mod001");
    project.write("actual", "module something/else\nexport func f() -> Int { 1 }\n");
    let reports = project.run("actual").unwrap_err();
    assert_eq!(reports[0].code, "MOD001");
    assert!(reports[0].fix.is_some(), "MOD001 should carry a fix suggestion");
}

#[test]
fn top_level_statements_run_at_module_init() {
    let project = Project::new("stmts");
    project.write(
        "main",
        "module main\nimport std/io (println)\n\
         let greeting = \"from init\"\n\
         export func main() -> String { greeting }\n",
    );
    let runner = Runner::from_file_in(&project.root.join("main.ail"), &project.root, RunConfig::default()).unwrap();
    let mut print = CollectStringPrint::new();
    let mut input = QueueInput::default();
    let mut fs = MockFs::new();
    let mut http = NoHttp;
    let outcome = runner.run(
        &EffectContext::unrestricted(),
        &mut print,
        &mut input,
        &mut fs,
        &mut http,
        Vec::new(),
    );
    assert!(matches!(outcome.value, Some(Value::Str(s)) if &*s == "from init"), "{:#?}", outcome.reports);
}

#[test]
fn interface_digests_match_across_equivalent_modules() {
    let project = Project::new("digests");
    project.write(
        "lib/one",
        "module lib/one\nexport func f(x: Int) -> Int { x }\nexport func g() -> Bool { true }\n",
    );
    project.write(
        "lib/two",
        "module lib/two\nexport func g() -> Bool { false }\nexport func f(x: Int) -> Int { x + 0 }\n",
    );
    project.write(
        "main",
        "module main\nimport lib/one (f)\nimport lib/two (g)\nexport func main() -> Int { f(1) }\n",
    );
    let runner = Runner::from_file_in(&project.root.join("main.ail"), &project.root, RunConfig::default()).unwrap();
    let one = runner.interface_of("lib/one").unwrap();
    let two = runner.interface_of("lib/two").unwrap();
    // same export surface, different module names: funcs and ctors agree
    assert_eq!(one.funcs, two.funcs);
}
