//! Public interface for compiling and running programs.
//!
//! A run is a deterministic function of the source bytes, the capability
//! context, and the recursion limit. The pipeline is a one-way state
//! machine: `Configured → Loading → TypeChecking → Elaborating → Linking
//! → Evaluating → Terminated`. Each phase either produces its result or a
//! non-empty list of reports, and later phases never run once reports
//! exist.

use std::{path::Path, rc::Rc};

use crate::{
    anf::Program,
    capability::EffectContext,
    dict::{self, Instance, InstanceRegistry, MethodImpl},
    diagnostic::{PhaseResult, Report},
    effects::{EffectHost, registry},
    elaborate::elaborate_with_warnings,
    eval::{DEFAULT_MAX_RECURSION_DEPTH, Interp},
    iface::{Interface, build_interface},
    infer::{CtorInfo, ExternalTypes, infer_module},
    io::{FileSystem, HttpClient, InputReader, PrintWriter},
    link::{Linkage, link},
    loader::ModuleLoader,
    parse::parse_text,
    types::{Scheme, TyVar, Type, from_type_expr},
    value::Value,
};

/// Pipeline phases, in order. Transitions are one-way within a single
/// program execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum PhaseState {
    Configured,
    Loading,
    TypeChecking,
    Elaborating,
    Linking,
    Evaluating,
    Terminated(Termination),
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Termination {
    Ok,
    Error,
    Capability,
    RecursionLimit,
}

/// Run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Exported function to invoke, `main` by default.
    pub entry: String,
    pub max_recursion_depth: usize,
    /// Accepted for compatibility with `AILANG_RECORDS_V2`; the engine's
    /// record typing is row-polymorphic either way.
    pub records_v2: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            entry: "main".to_owned(),
            max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH,
            records_v2: std::env::var_os("AILANG_RECORDS_V2").is_some(),
        }
    }
}

/// One fully compiled module.
#[derive(Debug)]
pub struct CompiledModule {
    pub program: Program,
    pub iface: Interface,
}

/// A declared test surfaced to the external harness.
#[derive(Debug, Clone, Copy)]
pub struct TestInfo<'a> {
    pub module: &'a str,
    pub name: &'a str,
    pub property: bool,
    /// Stable id of the test declaration.
    pub sid: &'a str,
}

/// Result of the evaluation phase.
#[derive(Debug)]
pub struct RunOutcome {
    /// The entry function's return value on success.
    pub value: Option<Value>,
    pub reports: Vec<Report>,
    pub exit_code: u8,
    pub state: PhaseState,
}

impl RunOutcome {
    fn success(value: Value) -> Self {
        Self {
            value: Some(value),
            reports: Vec::new(),
            exit_code: 0,
            state: PhaseState::Terminated(Termination::Ok),
        }
    }

    fn failure(reports: Vec<Report>) -> Self {
        let exit_code = reports.iter().find(|r| r.is_error()).map_or(1, Report::exit_code);
        let termination = match reports.iter().find(|r| r.is_error()) {
            Some(r) if r.exit_code() == 5 => Termination::Capability,
            Some(r) if r.code == "RT_REC_003" => Termination::RecursionLimit,
            _ => Termination::Error,
        };
        Self {
            value: None,
            reports,
            exit_code,
            state: PhaseState::Terminated(termination),
        }
    }
}

/// A compiled program, ready to evaluate any number of times.
#[derive(Debug)]
pub struct Runner {
    config: RunConfig,
    /// Modules in dependency order; the entry module is last.
    modules: Vec<CompiledModule>,
    entry_module: String,
    registry: InstanceRegistry,
    linkage: Linkage,
    warnings: Vec<Report>,
}

impl Runner {
    /// Compiles an entry file and its import closure.
    pub fn from_file(path: &Path, config: RunConfig) -> PhaseResult<Self> {
        let project_root = std::env::current_dir().unwrap_or_else(|_| Path::new(".").to_path_buf());
        Self::from_file_in(path, project_root.as_path(), config)
    }

    /// Compiles with an explicit project root (tests, embedding hosts).
    pub fn from_file_in(path: &Path, project_root: &Path, config: RunConfig) -> PhaseResult<Self> {
        // Loading
        let mut loader = ModuleLoader::new(project_root.to_path_buf());
        let entry_module = loader.load_entry(path)?;
        let order = loader.topological_order();
        let modules: Vec<_> = order
            .iter()
            .filter_map(|identity| loader.get(identity).cloned())
            .collect();
        let sources: Vec<(String, crate::surface::File, Vec<(String, Option<Vec<String>>)>)> = modules
            .iter()
            .map(|m| (m.identity.clone(), m.file.clone(), m.imports.clone()))
            .collect();
        Self::compile(sources, entry_module, config)
    }

    /// Compiles a single in-memory module named `main`. Only built-in
    /// `std/*` imports are available in this mode.
    pub fn from_source(source: &str, config: RunConfig) -> PhaseResult<Self> {
        let (file, reports) = parse_text("main", source);
        let errors: Vec<Report> = reports.into_iter().filter(Report::is_error).collect();
        if !errors.is_empty() {
            return Err(errors);
        }
        for import in &file.imports {
            if !registry().is_builtin_module(&import.path) {
                return Err(vec![Report::new(
                    crate::diagnostic::Phase::Loader,
                    "LDR001",
                    format!("module `{}` not found (in-memory compilation resolves only std/*)", import.path),
                )]);
            }
            if let Some(symbols) = &import.symbols {
                for symbol in symbols {
                    if registry().get(&import.path, symbol).is_none() {
                        return Err(vec![Report::new(
                            crate::diagnostic::Phase::Loader,
                            "LDR003",
                            format!("`{symbol}` is not exported by {}", import.path),
                        )]);
                    }
                }
            }
        }
        let imports = file
            .imports
            .iter()
            .map(|i| (i.path.clone(), i.symbols.clone()))
            .collect();
        Self::compile(vec![("main".to_owned(), file, imports)], "main".to_owned(), config)
    }

    /// TypeChecking + Elaborating + Linking over modules already in
    /// dependency order.
    fn compile(
        sources: Vec<(String, crate::surface::File, Vec<(String, Option<Vec<String>>)>)>,
        entry_module: String,
        config: RunConfig,
    ) -> PhaseResult<Self> {
        let mut instance_registry = InstanceRegistry::with_prelude();
        let mut warnings = Vec::new();
        let mut compiled: Vec<CompiledModule> = Vec::new();

        for (identity, file, imports) in &sources {
            let (program, mut elab_warnings) = elaborate_with_warnings(identity, identity, file, imports)?;
            warnings.append(&mut elab_warnings);

            // the module's instances join the registry before inference so
            // its own constraints can resolve against them
            register_user_instances(&mut instance_registry, &program)?;
            register_derived_instances(&mut instance_registry, &program)?;

            let externals = build_externals(imports, &compiled);
            let types = infer_module(identity, &program, &instance_registry, &externals)?;
            warnings.extend(types.warnings.iter().cloned());

            let mut program = program;
            dict::elaborate_dicts(identity, &mut program, &types.resolved, &instance_registry)?;
            let placeholder_reports = dict::verify_no_placeholders(identity, &program);
            if !placeholder_reports.is_empty() {
                return Err(placeholder_reports);
            }

            let iface = build_interface(&program, &types);
            compiled.push(CompiledModule { program, iface });
        }

        // Linking
        instance_registry.freeze();
        for module in &compiled {
            if !module.iface.digest_is_valid() {
                return Err(vec![Report::new(
                    crate::diagnostic::Phase::Link,
                    "LNK005",
                    format!("interface digest mismatch for {}", module.iface.module),
                )]);
            }
        }
        let programs: Vec<&Program> = compiled.iter().map(|m| &m.program).collect();
        let linkage = link(&programs, &instance_registry)?;

        Ok(Self {
            config,
            modules: compiled,
            entry_module,
            registry: instance_registry,
            linkage,
            warnings,
        })
    }

    #[must_use]
    pub fn interfaces(&self) -> Vec<&Interface> {
        self.modules.iter().map(|m| &m.iface).collect()
    }

    #[must_use]
    pub fn interface_of(&self, module: &str) -> Option<&Interface> {
        self.modules.iter().map(|m| &m.iface).find(|i| i.module == module)
    }

    #[must_use]
    pub fn warnings(&self) -> &[Report] {
        &self.warnings
    }

    #[must_use]
    pub fn instance_registry(&self) -> &InstanceRegistry {
        &self.registry
    }

    /// Declared `test`/`property` blocks across all modules, for the
    /// external evaluation harness.
    #[must_use]
    pub fn tests(&self) -> Vec<TestInfo<'_>> {
        self.modules
            .iter()
            .flat_map(|m| {
                m.program.tests.iter().map(|t| TestInfo {
                    module: m.program.module.as_str(),
                    name: t.name.as_str(),
                    property: t.property,
                    sid: t.sid.as_str(),
                })
            })
            .collect()
    }

    /// Evaluating: initializes modules in dependency order, then calls
    /// the configured entry function with `args`.
    pub fn run(
        &self,
        ctx: &EffectContext,
        print: &mut dyn PrintWriter,
        input: &mut dyn InputReader,
        fs: &mut dyn FileSystem,
        http: &mut dyn HttpClient,
        args: Vec<Value>,
    ) -> RunOutcome {
        let host = EffectHost {
            ctx,
            print,
            input,
            fs,
            http,
        };
        let mut interp = Interp::new(&self.linkage, host, self.config.max_recursion_depth);
        for module in ["std/prelude", "std/io", "std/fs", "std/clock", "std/net"] {
            interp.init_builtin_module(module);
        }
        for module in &self.modules {
            if let Err(report) = interp.init_module(&module.program) {
                return RunOutcome::failure(vec![report]);
            }
        }
        match interp.call_entry(&self.entry_module, &self.config.entry, args) {
            Ok(value) => RunOutcome::success(value),
            Err(report) => RunOutcome::failure(vec![report]),
        }
    }
}

/// Registers `instance Class[Head] { … }` declarations. Overlap with the
/// prelude or another module is `LNK002`.
fn register_user_instances(registry: &mut InstanceRegistry, program: &Program) -> PhaseResult<()> {
    for instance in &program.instances {
        let def = Instance {
            module: program.module.clone(),
            class: instance.class.clone(),
            head: instance.head.clone(),
            methods: instance
                .methods
                .iter()
                .map(|(name, body)| (name.clone(), MethodImpl::User(Rc::new(body.clone()))))
                .collect(),
            provides: Vec::new(),
        };
        registry.register(def).map_err(|report| vec![report])?;
    }
    Ok(())
}

/// Every ADT gets structural `Eq` and `Show` instances unless the module
/// declared its own.
fn register_derived_instances(registry: &mut InstanceRegistry, program: &Program) -> PhaseResult<()> {
    for adt in &program.adts {
        if !registry.has("Eq", &adt.name) {
            let def = Instance {
                module: program.module.clone(),
                class: "Eq".to_owned(),
                head: adt.name.clone(),
                methods: vec![
                    ("eq".to_owned(), MethodImpl::Prim(crate::prim::eq_value)),
                    ("neq".to_owned(), MethodImpl::Prim(crate::prim::neq_value)),
                ],
                provides: Vec::new(),
            };
            registry.register(def).map_err(|report| vec![report])?;
        }
        if !registry.has("Show", &adt.name) {
            let def = Instance {
                module: program.module.clone(),
                class: "Show".to_owned(),
                head: adt.name.clone(),
                methods: vec![("show".to_owned(), MethodImpl::Prim(crate::prim::show))],
                provides: Vec::new(),
            };
            registry.register(def).map_err(|report| vec![report])?;
        }
    }
    Ok(())
}

/// Builds the externally visible types for one module from its imports
/// and previously compiled dependencies.
fn build_externals(imports: &[(String, Option<Vec<String>>)], compiled: &[CompiledModule]) -> ExternalTypes {
    let mut externals = ExternalTypes::default();

    // the prelude is auto-imported
    for spec in registry().module_ops(crate::effects::PRELUDE_MODULE) {
        let scheme = (spec.scheme)();
        externals.names.insert(spec.name.to_owned(), scheme.clone());
        externals
            .globals
            .insert((spec.module.to_owned(), spec.name.to_owned()), scheme);
    }

    for (module, symbols) in imports {
        if registry().is_builtin_module(module) {
            for spec in registry().module_ops(module) {
                let scheme = (spec.scheme)();
                externals
                    .globals
                    .insert((module.clone(), spec.name.to_owned()), scheme.clone());
                let selected = symbols.as_ref().is_none_or(|list| list.contains(&spec.name.to_owned()));
                if selected {
                    externals.names.insert(spec.name.to_owned(), scheme);
                }
            }
            continue;
        }
        let Some(dep) = compiled.iter().find(|m| m.iface.module == *module) else {
            continue; // the loader reported this
        };
        for (name, scheme) in &dep.iface.schemes {
            externals.globals.insert((module.clone(), name.clone()), scheme.clone());
        }
        for adt in &dep.program.adts {
            if !adt.is_export {
                continue;
            }
            for ctor in &adt.ctors {
                let fields: Vec<Type> = ctor
                    .fields
                    .iter()
                    .map(|f| {
                        let mut lookup = |name: &str| Type::Var(TyVar::star(name));
                        from_type_expr(f, &mut lookup)
                    })
                    .collect();
                externals.ctors.insert(
                    ctor.name.clone(),
                    CtorInfo {
                        adt: adt.name.clone(),
                        params: adt.params.clone(),
                        fields: fields.clone(),
                    },
                );
                externals
                    .globals
                    .insert((module.clone(), ctor.name.clone()), ctor_scheme(&adt.name, &adt.params, fields));
            }
        }
    }
    externals
}

fn ctor_scheme(adt: &str, params: &[String], fields: Vec<Type>) -> Scheme {
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
    let ty = if fields.is_empty() {
        result
    } else {
        Type::func(fields, result)
    };
    Scheme {
        vars,
        constraints: Vec::new(),
        ty,
    }
}
