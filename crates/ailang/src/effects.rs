//! Built-in effect operations and their frozen registry.
//!
//! Every built-in is described by a spec `{module, name, arity, pure,
//! effect, scheme, run}`. The registry is populated exactly once (first
//! access), validated, and immutable afterwards — it is the single source
//! of truth for the loader's synthetic `std/*` modules, the type checker's
//! base environment, and the runtime dispatcher.
//!
//! At call time the dispatcher consults the current [`EffectContext`]:
//! an operation whose effect is not granted never executes (`EVA004`);
//! granted operations still honor the context's sandbox and budget
//! constraints (`EVA005`/`EVA006`).

use std::sync::OnceLock;

use crate::{
    capability::{CapabilityError, EffectContext, EffectName},
    io::{FileSystem, HttpClient, InputReader, PrintWriter},
    prim,
    types::{Scheme, TyVar, Type},
    value::Value,
};

/// Host-side collaborators an effect operation may use.
pub struct EffectHost<'a> {
    pub ctx: &'a EffectContext,
    pub print: &'a mut dyn PrintWriter,
    pub input: &'a mut dyn InputReader,
    pub fs: &'a mut dyn FileSystem,
    pub http: &'a mut dyn HttpClient,
}

/// Failure of an effect operation.
#[derive(Debug)]
pub enum EffectError {
    /// Denied by the capability context; carries the precise code.
    Capability(CapabilityError),
    /// The operation ran and failed (I/O error, no response, …).
    Runtime { code: &'static str, message: String },
}

impl From<CapabilityError> for EffectError {
    fn from(err: CapabilityError) -> Self {
        Self::Capability(err)
    }
}

impl EffectError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Capability(err) => err.code,
            Self::Runtime { code, .. } => code,
        }
    }

    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Capability(err) => err.to_string(),
            Self::Runtime { message, .. } => message.clone(),
        }
    }
}

type EffectFn = fn(&mut EffectHost<'_>, &[Value]) -> Result<Value, EffectError>;

/// Specification of one built-in operation.
pub struct BuiltinSpec {
    pub module: &'static str,
    pub name: &'static str,
    pub arity: usize,
    pub pure: bool,
    pub effect: Option<EffectName>,
    pub scheme: fn() -> Scheme,
    pub run: EffectFn,
}

impl std::fmt::Debug for BuiltinSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuiltinSpec")
            .field("module", &self.module)
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("effect", &self.effect)
            .finish_non_exhaustive()
    }
}

/// The frozen registry. Built on first access, immutable afterwards.
#[derive(Debug)]
pub struct BuiltinRegistry {
    specs: Vec<BuiltinSpec>,
}

impl BuiltinRegistry {
    #[must_use]
    pub fn get(&self, module: &str, name: &str) -> Option<&BuiltinSpec> {
        self.specs.iter().find(|s| s.module == module && s.name == name)
    }

    /// All operations belonging to a `std/*` module, for the loader's
    /// synthetic modules.
    #[must_use]
    pub fn module_ops(&self, module: &str) -> Vec<&BuiltinSpec> {
        self.specs.iter().filter(|s| s.module == module).collect()
    }

    /// True when the module name denotes a built-in module.
    #[must_use]
    pub fn is_builtin_module(&self, module: &str) -> bool {
        self.specs.iter().any(|s| s.module == module)
    }

    pub fn specs(&self) -> impl Iterator<Item = &BuiltinSpec> {
        self.specs.iter()
    }

    /// Dispatches one operation: capability check first, then the
    /// implementation. A denied operation performs no host action.
    pub fn call(&self, spec: &BuiltinSpec, host: &mut EffectHost<'_>, args: &[Value]) -> Result<Value, EffectError> {
        if let Some(effect) = spec.effect {
            host.ctx.check_grant(effect, spec.name)?;
        }
        (spec.run)(host, args)
    }
}

/// Returns the process-wide registry, building and validating it on the
/// first call. Later calls observe the same frozen instance.
pub fn registry() -> &'static BuiltinRegistry {
    static REGISTRY: OnceLock<BuiltinRegistry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let specs = builtin_specs();
        for spec in &specs {
            let scheme = (spec.scheme)();
            let Type::Func { params, .. } = &scheme.ty else {
                panic!("builtin {}::{} scheme is not a function", spec.module, spec.name);
            };
            assert_eq!(
                params.len(),
                spec.arity,
                "builtin {}::{} arity does not match its scheme",
                spec.module,
                spec.name
            );
            let declared_pure = matches!(&scheme.ty, Type::Func { effects, .. } if effects.labels.is_empty());
            assert_eq!(
                declared_pure, spec.pure,
                "builtin {}::{} purity flag disagrees with its scheme",
                spec.module, spec.name
            );
        }
        BuiltinRegistry { specs }
    })
}

fn string_arg(args: &[Value], index: usize) -> Result<String, EffectError> {
    match &args[index] {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(EffectError::Runtime {
            code: "EVA003",
            message: format!("expected String, got {}", other.type_name()),
        }),
    }
}

fn builtin_specs() -> Vec<BuiltinSpec> {
    vec![
        // ── std/io ────────────────────────────────────────────────────
        BuiltinSpec {
            module: "std/io",
            name: "println",
            arity: 1,
            pure: false,
            effect: Some(EffectName::IO),
            scheme: || Scheme::mono(Type::effectful(vec![Type::string()], Type::unit(), ["IO".to_owned()])),
            run: |host, args| {
                let text = string_arg(args, 0)?;
                host.print.stdout_write(&text);
                host.print.stdout_push('\n');
                Ok(Value::Unit)
            },
        },
        BuiltinSpec {
            module: "std/io",
            name: "print",
            arity: 1,
            pure: false,
            effect: Some(EffectName::IO),
            scheme: || Scheme::mono(Type::effectful(vec![Type::string()], Type::unit(), ["IO".to_owned()])),
            run: |host, args| {
                let text = string_arg(args, 0)?;
                host.print.stdout_write(&text);
                Ok(Value::Unit)
            },
        },
        BuiltinSpec {
            module: "std/io",
            name: "readLine",
            arity: 0,
            pure: false,
            effect: Some(EffectName::IO),
            scheme: || Scheme::mono(Type::effectful(vec![], Type::string(), ["IO".to_owned()])),
            run: |host, _args| match host.input.read_line() {
                Some(line) => Ok(Value::str(line)),
                None => Err(EffectError::Runtime {
                    code: "RT006",
                    message: "readLine: end of input".to_owned(),
                }),
            },
        },
        // ── std/fs ────────────────────────────────────────────────────
        BuiltinSpec {
            module: "std/fs",
            name: "readFile",
            arity: 1,
            pure: false,
            effect: Some(EffectName::FS),
            scheme: || Scheme::mono(Type::effectful(vec![Type::string()], Type::string(), ["FS".to_owned()])),
            run: |host, args| {
                let path = string_arg(args, 0)?;
                let resolved = host.ctx.check_fs_path(&path)?;
                host.fs.read(&resolved).map(Value::str).map_err(|message| EffectError::Runtime {
                    code: "RT006",
                    message: format!("readFile: {message}"),
                })
            },
        },
        BuiltinSpec {
            module: "std/fs",
            name: "writeFile",
            arity: 2,
            pure: false,
            effect: Some(EffectName::FS),
            scheme: || {
                Scheme::mono(Type::effectful(
                    vec![Type::string(), Type::string()],
                    Type::unit(),
                    ["FS".to_owned()],
                ))
            },
            run: |host, args| {
                let path = string_arg(args, 0)?;
                let contents = string_arg(args, 1)?;
                let resolved = host.ctx.check_fs_path(&path)?;
                host.fs
                    .write(&resolved, &contents)
                    .map(|()| Value::Unit)
                    .map_err(|message| EffectError::Runtime {
                        code: "RT006",
                        message: format!("writeFile: {message}"),
                    })
            },
        },
        BuiltinSpec {
            module: "std/fs",
            name: "exists",
            arity: 1,
            pure: false,
            effect: Some(EffectName::FS),
            scheme: || Scheme::mono(Type::effectful(vec![Type::string()], Type::bool(), ["FS".to_owned()])),
            run: |host, args| {
                let path = string_arg(args, 0)?;
                let resolved = host.ctx.check_fs_path(&path)?;
                Ok(Value::Bool(host.fs.exists(&resolved)))
            },
        },
        // ── std/clock ─────────────────────────────────────────────────
        BuiltinSpec {
            module: "std/clock",
            name: "now",
            arity: 0,
            pure: false,
            effect: Some(EffectName::Clock),
            scheme: || Scheme::mono(Type::effectful(vec![], Type::int(), ["Clock".to_owned()])),
            run: |_host, _args| Ok(Value::Int(chrono::Utc::now().timestamp_millis())),
        },
        BuiltinSpec {
            module: "std/clock",
            name: "nowISO",
            arity: 0,
            pure: false,
            effect: Some(EffectName::Clock),
            scheme: || Scheme::mono(Type::effectful(vec![], Type::string(), ["Clock".to_owned()])),
            run: |_host, _args| {
                Ok(Value::str(
                    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
                ))
            },
        },
        // ── std/net ───────────────────────────────────────────────────
        BuiltinSpec {
            module: "std/net",
            name: "httpGet",
            arity: 1,
            pure: false,
            effect: Some(EffectName::Net),
            scheme: || Scheme::mono(Type::effectful(vec![Type::string()], Type::string(), ["Net".to_owned()])),
            run: |host, args| {
                let url = string_arg(args, 0)?;
                host.ctx.check_net_url(&url)?;
                host.http.get(&url).map(Value::str).map_err(|message| EffectError::Runtime {
                    code: "RT006",
                    message: format!("httpGet: {message}"),
                })
            },
        },
        // ── std/prelude ───────────────────────────────────────────────
        BuiltinSpec {
            module: "std/prelude",
            name: "show",
            arity: 1,
            pure: true,
            effect: None,
            scheme: || {
                let var = TyVar::star("a");
                Scheme {
                    vars: vec![var.clone()],
                    constraints: vec![crate::types::ClassConstraint {
                        class: "Show".to_owned(),
                        ty: Type::Var(var.clone()),
                    }],
                    ty: Type::func(vec![Type::Var(var)], Type::string()),
                }
            },
            run: |_host, args| {
                prim::show(args).map_err(|err| EffectError::Runtime {
                    code: err.code,
                    message: err.message,
                })
            },
        },
    ]
}

/// Modules whose contents every program may import without a file on
/// disk, plus the auto-imported prelude.
pub const PRELUDE_MODULE: &str = "std/prelude";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{CollectStringPrint, MockFs, MockHttp, NoHttp, QueueInput};

    fn host<'a>(
        ctx: &'a EffectContext,
        print: &'a mut CollectStringPrint,
        input: &'a mut QueueInput,
        fs: &'a mut MockFs,
        http: &'a mut MockHttp,
    ) -> EffectHost<'a> {
        EffectHost {
            ctx,
            print,
            input,
            fs,
            http,
        }
    }

    #[test]
    fn registry_is_validated_and_frozen() {
        let first = registry() as *const BuiltinRegistry;
        let second = registry() as *const BuiltinRegistry;
        assert_eq!(first, second);
        assert!(registry().get("std/io", "println").is_some());
        assert!(registry().get("std/io", "nothere").is_none());
        assert!(registry().is_builtin_module("std/fs"));
        assert!(!registry().is_builtin_module("lib/user"));
    }

    #[test]
    fn denied_fs_read_never_touches_the_filesystem() {
        let ctx = EffectContext::none();
        let mut print = CollectStringPrint::new();
        let mut input = QueueInput::default();
        let mut fs = MockFs::new().with_file("x.txt", "secret");
        let mut http = MockHttp::default();
        let spec = registry().get("std/fs", "readFile").unwrap();
        let err = {
            let mut host = host(&ctx, &mut print, &mut input, &mut fs, &mut http);
            registry()
                .call(spec, &mut host, &[Value::str("x.txt")])
                .unwrap_err()
        };
        assert_eq!(err.code(), "EVA004");
        assert!(fs.calls.is_empty(), "filesystem was touched: {:?}", fs.calls);
    }

    #[test]
    fn granted_fs_read_goes_through() {
        let ctx = EffectContext::new([EffectName::FS]);
        let mut print = CollectStringPrint::new();
        let mut input = QueueInput::default();
        let mut fs = MockFs::new().with_file("x.txt", "contents");
        let mut http = MockHttp::default();
        let spec = registry().get("std/fs", "readFile").unwrap();
        let mut host = host(&ctx, &mut print, &mut input, &mut fs, &mut http);
        let value = registry().call(spec, &mut host, &[Value::str("x.txt")]).unwrap();
        assert!(matches!(value, Value::Str(s) if &*s == "contents"));
    }

    #[test]
    fn println_writes_line_to_sink() {
        let ctx = EffectContext::new([EffectName::IO]);
        let mut print = CollectStringPrint::new();
        let mut input = QueueInput::default();
        let mut fs = MockFs::new();
        let mut http = MockHttp::default();
        let spec = registry().get("std/io", "println").unwrap();
        {
            let mut host = host(&ctx, &mut print, &mut input, &mut fs, &mut http);
            registry().call(spec, &mut host, &[Value::str("hello")]).unwrap();
        }
        assert_eq!(print.output(), "hello\n");
    }

    #[test]
    fn default_http_client_refuses() {
        let ctx = EffectContext::new([EffectName::Net]);
        let mut print = CollectStringPrint::new();
        let mut input = QueueInput::default();
        let mut fs = MockFs::new();
        let mut http = NoHttp;
        let spec = registry().get("std/net", "httpGet").unwrap();
        let mut host = EffectHost {
            ctx: &ctx,
            print: &mut print,
            input: &mut input,
            fs: &mut fs,
            http: &mut http,
        };
        let err = registry().call(spec, &mut host, &[Value::str("https://x")]).unwrap_err();
        assert_eq!(err.code(), "RT006");
    }
}
