//! Module loading: path resolution, parse caching, cycle detection, and
//! dependency ordering.
//!
//! Resolution precedence for an import path `p`:
//! 1. `./` and `../` — relative to the importing file;
//! 2. `std/...` — built-in modules, then the configured stdlib root;
//! 3. paths containing `/` — project-relative, then the search paths;
//! 4. bare names — next to the importing file, then the project root.
//!
//! Module identity is the repo-relative path with forward slashes and no
//! `.ail` extension. The loader owns the module cache exclusively and
//! hands out shared read-only references.

use std::{path::PathBuf, rc::Rc};

use indexmap::IndexMap;

use crate::{
    diagnostic::{Phase, PhaseResult, Report},
    effects::registry,
    parse::parse_source,
    surface::File,
};

/// A loaded, parsed module.
#[derive(Debug)]
pub struct Module {
    /// Canonical identity: repo-relative, forward slashes, no extension.
    pub identity: String,
    pub path: PathBuf,
    pub file: File,
    /// Identities of imported user modules, in import order. Built-in
    /// `std/*` modules are not listed; they have no file to load.
    pub deps: Vec<String>,
    /// All imports including built-in modules, for environment seeding.
    pub imports: Vec<(String, Option<Vec<String>>)>,
}

/// The module loader. One logical owner per run; the cache is mutated
/// only through [`ModuleLoader::load`].
#[derive(Debug)]
pub struct ModuleLoader {
    project_root: PathBuf,
    stdlib_root: Option<PathBuf>,
    search_paths: Vec<PathBuf>,
    cache: IndexMap<String, Rc<Module>>,
    stack: Vec<String>,
}

impl ModuleLoader {
    #[must_use]
    pub fn new(project_root: PathBuf) -> Self {
        let project_root = project_root.canonicalize().unwrap_or(project_root);
        Self {
            project_root,
            stdlib_root: std::env::var_os("AILANG_STDLIB").map(PathBuf::from),
            search_paths: std::env::var_os("AILANG_PATH")
                .map(|raw| std::env::split_paths(&raw).collect())
                .unwrap_or_default(),
            cache: IndexMap::new(),
            stack: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_stdlib(mut self, root: PathBuf) -> Self {
        self.stdlib_root = Some(root);
        self
    }

    #[must_use]
    pub fn with_search_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.search_paths = paths;
        self
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&Rc<Module>> {
        self.cache.get(identity)
    }

    /// Loads the entry file and, transitively, everything it imports.
    /// Returns the entry module's identity.
    pub fn load_entry(&mut self, path: &std::path::Path) -> PhaseResult<String> {
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        let identity = self.identity_for_path(&canonical);
        self.load(canonical, identity.clone())?;
        Ok(identity)
    }

    /// Module identities in dependency order: a module's dependencies
    /// always precede it. Modules with no dependencies come first.
    #[must_use]
    pub fn topological_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut visited = std::collections::HashSet::new();
        for identity in self.cache.keys() {
            self.topo_visit(identity, &mut visited, &mut order);
        }
        order
    }

    fn topo_visit(
        &self,
        identity: &str,
        visited: &mut std::collections::HashSet<String>,
        order: &mut Vec<String>,
    ) {
        if !visited.insert(identity.to_owned()) {
            return;
        }
        if let Some(module) = self.cache.get(identity) {
            for dep in &module.deps {
                self.topo_visit(dep, visited, order);
            }
        }
        order.push(identity.to_owned());
    }

    fn identity_for_path(&self, path: &std::path::Path) -> String {
        let relative = path.strip_prefix(&self.project_root).unwrap_or(path);
        let mut identity = relative.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/");
        if let Some(stripped) = identity.strip_suffix(".ail") {
            identity = stripped.to_owned();
        }
        identity.trim_start_matches('/').to_owned()
    }

    /// Loads one module by path, recursing into its imports. Cached
    /// modules are returned as-is; a module already on the load stack is
    /// a circular dependency (`LDR002`).
    fn load(&mut self, path: PathBuf, identity: String) -> PhaseResult<()> {
        if self.cache.contains_key(&identity) {
            return Ok(());
        }
        if let Some(position) = self.stack.iter().position(|i| i == &identity) {
            let mut cycle: Vec<String> = self.stack[position..].to_vec();
            cycle.push(identity.clone());
            return Err(vec![
                Report::new(
                    Phase::Loader,
                    "LDR002",
                    format!("circular module dependency: {}", cycle.join(" -> ")),
                )
                .with_data("cycle", serde_json::json!(cycle)),
            ]);
        }

        let bytes = std::fs::read(&path).map_err(|err| {
            vec![Report::new(
                Phase::Loader,
                "LDR001",
                format!("cannot read module `{identity}` at {}: {err}", path.display()),
            )]
        })?;
        let (file, reports) = parse_source(&identity, &bytes);
        let errors: Vec<Report> = reports.into_iter().filter(Report::is_error).collect();
        if !errors.is_empty() {
            return Err(errors);
        }

        self.validate_header(&identity, &file)?;
        self.validate_exports(&identity, &file)?;

        self.stack.push(identity.clone());
        let result = self.load_imports(&path, &identity, &file);
        self.stack.pop();
        let (deps, imports) = result?;

        self.cache.insert(
            identity.clone(),
            Rc::new(Module {
                identity,
                path,
                file,
                deps,
                imports,
            }),
        );
        Ok(())
    }

    /// A declared module name must match the file's identity (`MOD001`);
    /// a missing header defaults to the identity.
    fn validate_header(&self, identity: &str, file: &File) -> PhaseResult<()> {
        if let Some(header) = &file.module {
            if header.path != identity {
                return Err(vec![
                    Report::new(
                        Phase::Module,
                        "MOD001",
                        format!("module declares name `{}` but lives at `{identity}`", header.path),
                    )
                    .with_span(identity, header.span)
                    .with_fix(format!("rename the module header to `module {identity}`"), 0.9),
                ]);
            }
        }
        Ok(())
    }

    fn validate_exports(&self, identity: &str, file: &File) -> PhaseResult<()> {
        let mut seen = std::collections::HashSet::new();
        for name in file.export_names() {
            if !seen.insert(name) {
                return Err(vec![Report::new(
                    Phase::Module,
                    "MOD003",
                    format!("duplicate export `{name}` in module `{identity}`"),
                )]);
            }
        }
        Ok(())
    }

    #[expect(clippy::type_complexity, reason = "internal pair of dep lists")]
    fn load_imports(
        &mut self,
        path: &std::path::Path,
        identity: &str,
        file: &File,
    ) -> PhaseResult<(Vec<String>, Vec<(String, Option<Vec<String>>)>)> {
        let mut deps = Vec::new();
        let mut imports = Vec::new();
        for import in &file.imports {
            if registry().is_builtin_module(&import.path) {
                // synthetic module: validate selective imports against the
                // builtin registry
                if let Some(symbols) = &import.symbols {
                    for symbol in symbols {
                        if registry().get(&import.path, symbol).is_none() {
                            return Err(vec![
                                Report::new(
                                    Phase::Loader,
                                    "LDR003",
                                    format!("`{symbol}` is not exported by {}", import.path),
                                )
                                .with_span(identity, import.span),
                            ]);
                        }
                    }
                }
                imports.push((import.path.clone(), import.symbols.clone()));
                continue;
            }

            let (dep_path, dep_identity) = self.resolve(&import.path, path, identity, import.span)?;
            self.load(dep_path, dep_identity.clone())?;
            let dep = self.cache[&dep_identity].clone();
            if let Some(symbols) = &import.symbols {
                let exported = dep.file.export_names();
                for symbol in symbols {
                    if !exported.contains(&symbol.as_str()) {
                        return Err(vec![
                            Report::new(
                                Phase::Loader,
                                "LDR003",
                                format!("`{symbol}` is not exported by {dep_identity}"),
                            )
                            .with_span(identity, import.span),
                        ]);
                    }
                }
            }
            deps.push(dep_identity.clone());
            imports.push((dep_identity, import.symbols.clone()));
        }
        Ok((deps, imports))
    }

    /// Applies the resolution precedence. Returns the file path plus the
    /// resulting module identity.
    fn resolve(
        &self,
        import: &str,
        current_path: &std::path::Path,
        current_identity: &str,
        span: crate::source::Span,
    ) -> PhaseResult<(PathBuf, String)> {
        let not_found = |tried: Vec<PathBuf>| {
            vec![
                Report::new(Phase::Loader, "LDR001", format!("module `{import}` not found"))
                    .with_span(current_identity, span)
                    .with_data(
                        "tried",
                        serde_json::json!(tried.iter().map(|p| p.display().to_string()).collect::<Vec<_>>()),
                    ),
            ]
        };

        // 1. explicitly relative
        if import.starts_with("./") || import.starts_with("../") {
            let dir = current_path.parent().unwrap_or(std::path::Path::new("."));
            let candidate = dir.join(format!("{import}.ail"));
            let candidate = candidate.canonicalize().unwrap_or(candidate);
            if candidate.is_file() {
                let identity = self.identity_for_path(&candidate);
                return Ok((candidate, identity));
            }
            return Err(not_found(vec![candidate]));
        }

        // 2. stdlib
        if let Some(rest) = import.strip_prefix("std/") {
            if let Some(stdlib) = &self.stdlib_root {
                let candidate = stdlib.join(format!("{rest}.ail"));
                if candidate.is_file() {
                    return Ok((candidate, import.to_owned()));
                }
            }
            return Err(not_found(
                self.stdlib_root
                    .iter()
                    .map(|root| root.join(format!("{rest}.ail")))
                    .collect(),
            ));
        }

        // 3. project-relative, then search paths
        if import.contains('/') {
            let mut tried = Vec::new();
            let candidate = self.project_root.join(format!("{import}.ail"));
            if candidate.is_file() {
                return Ok((candidate, import.to_owned()));
            }
            tried.push(candidate);
            let matches: Vec<PathBuf> = self
                .search_paths
                .iter()
                .map(|root| root.join(format!("{import}.ail")))
                .filter(|p| p.is_file())
                .collect();
            match matches.len() {
                0 => {
                    tried.extend(self.search_paths.iter().map(|root| root.join(format!("{import}.ail"))));
                    return Err(not_found(tried));
                }
                1 => return Ok((matches.into_iter().next().expect("one match"), import.to_owned())),
                _ => {
                    return Err(vec![
                        Report::new(
                            Phase::Loader,
                            "LDR004",
                            format!("import `{import}` matches multiple search paths"),
                        )
                        .with_span(current_identity, span),
                    ]);
                }
            }
        }

        // 4. bare name: next to the current file, then the project root
        let dir = current_path.parent().unwrap_or(std::path::Path::new("."));
        let sibling = dir.join(format!("{import}.ail"));
        if sibling.is_file() {
            let sibling = sibling.canonicalize().unwrap_or(sibling);
            let identity = self.identity_for_path(&sibling);
            return Ok((sibling, identity));
        }
        let rooted = self.project_root.join(format!("{import}.ail"));
        if rooted.is_file() {
            return Ok((rooted, import.to_owned()));
        }
        Err(not_found(vec![sibling, rooted]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_module(dir: &std::path::Path, name: &str, contents: &str) {
        let path = dir.join(format!("{name}.ail"));
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, contents).unwrap();
    }

    fn temp_project(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ailang-loader-{tag}-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn loads_dependencies_in_topological_order() {
        let root = temp_project("topo");
        write_module(&root, "lib/a", "module lib/a\nexport func one() -> Int { 1 }\n");
        write_module(
            &root,
            "lib/b",
            "module lib/b\nimport lib/a (one)\nexport func two() -> Int { one() + 1 }\n",
        );
        write_module(
            &root,
            "main",
            "module main\nimport lib/b (two)\nexport func main() -> Int { two() }\n",
        );
        let mut loader = ModuleLoader::new(root.clone()).with_search_paths(Vec::new());
        let entry = loader.load_entry(&root.join("main.ail")).unwrap();
        assert_eq!(entry, "main");
        let order = loader.topological_order();
        let pos = |name: &str| order.iter().position(|i| i == name).unwrap();
        assert!(pos("lib/a") < pos("lib/b"));
        assert!(pos("lib/b") < pos("main"));
    }

    #[test]
    fn cycle_is_ldr002_with_full_cycle() {
        let root = temp_project("cycle");
        write_module(&root, "a", "module a\nimport b\n");
        write_module(&root, "b", "module b\nimport c\n");
        write_module(&root, "c", "module c\nimport a\n");
        let mut loader = ModuleLoader::new(root.clone());
        let errors = loader.load_entry(&root.join("a.ail")).unwrap_err();
        assert_eq!(errors[0].code, "LDR002");
        let cycle = errors[0].data.get("cycle").unwrap().as_array().unwrap();
        assert_eq!(cycle.len(), 4, "cycle should name a -> b -> c -> a: {cycle:?}");
    }

    #[test]
    fn header_mismatch_is_mod001() {
        let root = temp_project("header");
        write_module(&root, "actual", "module wrong/name\n");
        let mut loader = ModuleLoader::new(root.clone());
        let errors = loader.load_entry(&root.join("actual.ail")).unwrap_err();
        assert_eq!(errors[0].code, "MOD001");
    }

    #[test]
    fn missing_header_is_defaulted() {
        let root = temp_project("noheader");
        write_module(&root, "plain", "export func f() -> Int { 1 }\n");
        let mut loader = ModuleLoader::new(root.clone());
        let entry = loader.load_entry(&root.join("plain.ail")).unwrap();
        assert_eq!(entry, "plain");
    }

    #[test]
    fn selective_import_must_be_exported() {
        let root = temp_project("selective");
        write_module(&root, "lib/a", "module lib/a\nfunc hidden() -> Int { 1 }\n");
        write_module(&root, "main", "module main\nimport lib/a (hidden)\n");
        let mut loader = ModuleLoader::new(root.clone());
        let errors = loader.load_entry(&root.join("main.ail")).unwrap_err();
        assert_eq!(errors[0].code, "LDR003");
    }

    #[test]
    fn builtin_modules_need_no_files() {
        let root = temp_project("builtin");
        write_module(
            &root,
            "main",
            "module main\nimport std/io (println)\nexport func main() -> Int ! {IO} { println(\"hi\"); 0 }\n",
        );
        let mut loader = ModuleLoader::new(root.clone());
        loader.load_entry(&root.join("main.ail")).unwrap();
        let module = loader.get("main").unwrap();
        assert!(module.deps.is_empty());
        assert_eq!(module.imports[0].0, "std/io");
    }

    #[test]
    fn unknown_builtin_symbol_is_ldr003() {
        let root = temp_project("badbuiltin");
        write_module(&root, "main", "module main\nimport std/io (frobnicate)\n");
        let mut loader = ModuleLoader::new(root.clone());
        let errors = loader.load_entry(&root.join("main.ail")).unwrap_err();
        assert_eq!(errors[0].code, "LDR003");
    }

    #[test]
    fn duplicate_export_is_mod003() {
        let root = temp_project("dupexport");
        write_module(
            &root,
            "main",
            "module main\nexport func f() -> Int { 1 }\nexport func f() -> Int { 2 }\n",
        );
        let mut loader = ModuleLoader::new(root.clone());
        let errors = loader.load_entry(&root.join("main.ail")).unwrap_err();
        assert_eq!(errors[0].code, "MOD003");
    }

    #[test]
    fn relative_import_resolves_from_current_file() {
        let root = temp_project("relative");
        write_module(&root, "nested/util", "module nested/util\nexport func u() -> Int { 7 }\n");
        write_module(
            &root,
            "nested/main",
            "module nested/main\nimport ./util (u)\nexport func main() -> Int { u() }\n",
        );
        let mut loader = ModuleLoader::new(root.clone());
        loader.load_entry(&root.join("nested/main.ail")).unwrap();
        assert!(loader.get("nested/util").is_some());
    }
}
