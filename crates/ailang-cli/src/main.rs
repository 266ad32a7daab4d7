use std::{
    env,
    io::{BufRead, Write},
    path::PathBuf,
    process::ExitCode,
};

use ailang::{
    EffectContext, NoHttp, RealFs, Report, RunConfig, RunOutcome, Runner, StdInput, StdPrint, Value,
};

const USAGE: &str = "usage:
  ailang run <file> [--entry NAME] [--args-json JSON] [--caps LIST] [--max-recursion-depth N]
  ailang check <file> [--dump-iface]
  ailang repl";

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let Some(command) = args.first() else {
        eprintln!("{USAGE}");
        return ExitCode::from(6);
    };
    match command.as_str() {
        "run" => cmd_run(&args[1..]),
        "check" => cmd_check(&args[1..]),
        "repl" => cmd_repl(),
        cmd if cmd.starts_with("eval-") => {
            eprintln!("error: `{cmd}` belongs to the evaluation harness, not the core CLI");
            ExitCode::from(6)
        }
        other => {
            eprintln!("error: unknown command `{other}`\n{USAGE}");
            ExitCode::from(6)
        }
    }
}

struct RunArgs {
    file: PathBuf,
    entry: String,
    args_json: Option<String>,
    caps: Option<String>,
    max_depth: Option<usize>,
    dump_iface: bool,
}

fn parse_args(args: &[String]) -> Result<RunArgs, String> {
    let mut file = None;
    let mut entry = "main".to_owned();
    let mut args_json = None;
    let mut caps = None;
    let mut max_depth = None;
    let mut dump_iface = false;

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--entry" => {
                entry = iter.next().ok_or("--entry needs a value")?.clone();
            }
            "--args-json" => {
                args_json = Some(iter.next().ok_or("--args-json needs a value")?.clone());
            }
            "--caps" => {
                caps = Some(iter.next().ok_or("--caps needs a value")?.clone());
            }
            "--max-recursion-depth" => {
                let raw = iter.next().ok_or("--max-recursion-depth needs a value")?;
                max_depth = Some(raw.parse().map_err(|_| format!("invalid depth `{raw}`"))?);
            }
            "--dump-iface" => dump_iface = true,
            other if other.starts_with("--") => return Err(format!("unknown flag `{other}`")),
            other => {
                if file.replace(PathBuf::from(other)).is_some() {
                    return Err("only one input file is accepted".to_owned());
                }
            }
        }
    }
    Ok(RunArgs {
        file: file.ok_or("missing input file")?,
        entry,
        args_json,
        caps,
        max_depth,
        dump_iface,
    })
}

fn report_all(reports: &[Report]) {
    for report in reports {
        eprintln!("{}", report.to_json());
    }
}

fn exit_for(reports: &[Report]) -> ExitCode {
    let code = reports.iter().find(|r| r.is_error()).map_or(1, Report::exit_code);
    ExitCode::from(code)
}

fn decode_args_json(raw: &str) -> Result<Vec<Value>, String> {
    let parsed: serde_json::Value = serde_json::from_str(raw).map_err(|e| format!("invalid --args-json: {e}"))?;
    let serde_json::Value::Array(items) = parsed else {
        return Err("--args-json must be a JSON array".to_owned());
    };
    items.iter().map(json_to_value).collect()
}

fn json_to_value(json: &serde_json::Value) -> Result<Value, String> {
    match json {
        serde_json::Value::Null => Ok(Value::Unit),
        serde_json::Value::Bool(b) => Ok(Value::Bool(*b)),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(format!("unrepresentable number {n}"))
            }
        }
        serde_json::Value::String(s) => Ok(Value::str(s)),
        serde_json::Value::Array(items) => {
            let values: Result<Vec<Value>, String> = items.iter().map(json_to_value).collect();
            Ok(Value::list(values?))
        }
        serde_json::Value::Object(_) => Err("JSON objects are not supported as arguments".to_owned()),
    }
}

fn build_context(caps: Option<&str>) -> Result<EffectContext, String> {
    let mut ctx = match caps {
        Some(list) => EffectContext::parse_grants(list)?,
        None => EffectContext::none(),
    };
    if let Some(root) = env::var_os("AILANG_FS_SANDBOX") {
        ctx = ctx.with_fs_sandbox(PathBuf::from(root));
    }
    Ok(ctx)
}

fn cmd_run(args: &[String]) -> ExitCode {
    let parsed = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("error: {message}\n{USAGE}");
            return ExitCode::from(6);
        }
    };
    let ctx = match build_context(parsed.caps.as_deref()) {
        Ok(ctx) => ctx,
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(6);
        }
    };
    let entry_args = match parsed.args_json.as_deref().map(decode_args_json).transpose() {
        Ok(values) => values.unwrap_or_default(),
        Err(message) => {
            eprintln!("error: {message}");
            return ExitCode::from(6);
        }
    };

    let mut config = RunConfig {
        entry: parsed.entry,
        ..RunConfig::default()
    };
    if let Some(depth) = parsed.max_depth {
        config.max_recursion_depth = depth;
    }

    let runner = match Runner::from_file(&parsed.file, config) {
        Ok(runner) => runner,
        Err(reports) => {
            report_all(&reports);
            return exit_for(&reports);
        }
    };
    report_all(runner.warnings());

    let outcome: RunOutcome = runner.run(
        &ctx,
        &mut StdPrint,
        &mut StdInput,
        &mut RealFs,
        &mut NoHttp,
        entry_args,
    );
    report_all(&outcome.reports);
    ExitCode::from(outcome.exit_code)
}

fn cmd_check(args: &[String]) -> ExitCode {
    let parsed = match parse_args(args) {
        Ok(parsed) => parsed,
        Err(message) => {
            eprintln!("error: {message}\n{USAGE}");
            return ExitCode::from(6);
        }
    };
    match Runner::from_file(&parsed.file, RunConfig::default()) {
        Ok(runner) => {
            report_all(runner.warnings());
            if parsed.dump_iface {
                for iface in runner.interfaces() {
                    println!("{}", iface.to_json());
                }
            } else {
                for iface in runner.interfaces() {
                    eprintln!("{}: {}", iface.module, iface.digest);
                }
            }
            ExitCode::SUCCESS
        }
        Err(reports) => {
            report_all(&reports);
            exit_for(&reports)
        }
    }
}

/// A line-oriented REPL: `let` bindings accumulate, everything else is
/// evaluated as an expression and printed.
fn cmd_repl() -> ExitCode {
    let stdin = std::io::stdin();
    let mut defs: Vec<String> = Vec::new();
    let ctx = EffectContext::unrestricted();
    eprintln!("ailang repl (ctrl-d to exit)");
    loop {
        eprint!("> ");
        let _ = std::io::stderr().flush();
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => return ExitCode::SUCCESS,
            Ok(_) => {}
        }
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let is_def = line.starts_with("let ") && !line.contains(" in ");
        let mut body: Vec<String> = defs.clone();
        body.push(line.to_owned());
        let source = format!("func it() ! {{IO, FS, Clock, Net}} {{\n{}\n}}\n", body.join(";\n"));
        let config = RunConfig {
            entry: "it".to_owned(),
            ..RunConfig::default()
        };
        match Runner::from_source(&source, config) {
            Ok(runner) => {
                let outcome = runner.run(
                    &ctx,
                    &mut StdPrint,
                    &mut StdInput,
                    &mut RealFs,
                    &mut NoHttp,
                    Vec::new(),
                );
                match outcome.value {
                    Some(value) => {
                        if is_def {
                            defs.push(line.to_owned());
                        } else if !matches!(value, Value::Unit) {
                            println!("{value}");
                        }
                    }
                    None => {
                        for report in &outcome.reports {
                            eprintln!("{report}");
                        }
                    }
                }
            }
            Err(reports) => {
                for report in &reports {
                    eprintln!("{report}");
                }
            }
        }
    }
}
