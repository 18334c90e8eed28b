//! Module loading: the module graph, cycle detection, and export sets.
//!
//! Given a bare module name, the loader searches the configured module
//! paths in order; the first match wins and the resolved path is cached so
//! repeated imports reuse one record. Importing a module that is still
//! being loaded is a cycle, reported once as `M002` with the chain; the
//! modules on the chain are poisoned and skipped by later phases, while
//! unrelated modules keep compiling.
//!
//! After loading, [`ModuleSet::order`] holds the dependency-first
//! (reverse postorder) sequence the checker processes.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::{IndexMap, IndexSet};
use sablec_lex::LexOptions;
use sablec_par::{ExportStmt, Parser, Stmt, StmtKind};
use sablec_util::{FxHashMap, FxHashSet, Pos, ReportCode, Reporter, Symbol};

/// Exported symbols of a module, partitioned by kind.
#[derive(Clone, Debug, Default)]
pub struct ExportSet {
    pub functions: IndexSet<Symbol>,
    pub classes: IndexSet<Symbol>,
    pub variables: IndexSet<Symbol>,
    pub types: IndexSet<Symbol>,
}

impl ExportSet {
    /// True when any partition contains `name`.
    pub fn contains(&self, name: Symbol) -> bool {
        self.functions.contains(&name)
            || self.classes.contains(&name)
            || self.variables.contains(&name)
            || self.types.contains(&name)
    }

    /// Total number of exported symbols.
    pub fn len(&self) -> usize {
        self.functions.len() + self.classes.len() + self.variables.len() + self.types.len()
    }

    /// True when nothing is exported.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One loaded module.
#[derive(Debug)]
pub struct ModuleRecord {
    pub name: Symbol,
    pub path: PathBuf,
    pub ast: Vec<Stmt>,
    pub exports: ExportSet,
    pub deps: Vec<Symbol>,
    /// Set once the checker has processed the module.
    pub compiled: bool,
    /// Set when the module participates in an import cycle or failed to
    /// load; poisoned modules are skipped by the checker.
    pub poisoned: bool,
}

/// The result of loading: records plus the dependency-first check order.
#[derive(Debug)]
pub struct ModuleSet {
    pub records: IndexMap<Symbol, ModuleRecord>,
    pub order: Vec<Symbol>,
    pub entry: Symbol,
    /// One past the largest expression id allocated by any parser.
    pub expr_count: u32,
}

impl ModuleSet {
    /// Record lookup by name.
    pub fn get(&self, name: Symbol) -> Option<&ModuleRecord> {
        self.records.get(&name)
    }
}

/// The module loader.
pub struct ModuleLoader<'a> {
    search_paths: Vec<PathBuf>,
    reporter: &'a Reporter,
    options: LexOptions,
    records: IndexMap<Symbol, ModuleRecord>,
    by_path: FxHashMap<PathBuf, Symbol>,
    in_progress: Vec<Symbol>,
    next_expr_id: u32,
}

impl<'a> ModuleLoader<'a> {
    /// Create a loader over the given search paths.
    pub fn new(search_paths: Vec<PathBuf>, reporter: &'a Reporter, options: LexOptions) -> Self {
        Self {
            search_paths,
            reporter,
            options,
            records: IndexMap::new(),
            by_path: FxHashMap::default(),
            in_progress: Vec::new(),
            next_expr_id: 0,
        }
    }

    /// Load from an in-memory source string (the entry module).
    pub fn load_source(mut self, source: &str, filename: &str) -> ModuleSet {
        let entry = module_name_of(Path::new(filename));
        self.in_progress.push(entry);
        self.load_module_source(entry, PathBuf::from(filename), source);
        self.in_progress.pop();
        self.finish(entry)
    }

    /// Load the entry module from disk.
    pub fn load_file(mut self, path: &Path) -> ModuleSet {
        let entry = module_name_of(path);
        let pos = Pos::new(Symbol::intern(&path.display().to_string()), 0, 0);
        match read_module(path, pos, self.reporter) {
            Some(source) => {
                self.in_progress.push(entry);
                self.load_module_source(entry, path.to_path_buf(), &source);
                self.in_progress.pop();
            }
            None => {
                self.records.insert(
                    entry,
                    ModuleRecord {
                        name: entry,
                        path: path.to_path_buf(),
                        ast: Vec::new(),
                        exports: ExportSet::default(),
                        deps: Vec::new(),
                        compiled: false,
                        poisoned: true,
                    },
                );
            }
        }
        self.finish(entry)
    }

    fn finish(self, entry: Symbol) -> ModuleSet {
        let order = compute_order(&self.records, entry);
        ModuleSet {
            records: self.records,
            order,
            entry,
            expr_count: self.next_expr_id,
        }
    }

    fn load_module_source(&mut self, name: Symbol, path: PathBuf, source: &str) {
        let filename = path.display().to_string();
        let tokens =
            sablec_lex::tokenize_with(source, &filename, self.reporter, self.options);
        let mut parser = Parser::with_start_id(tokens, self.reporter, self.next_expr_id);
        let ast = parser.parse();
        self.next_expr_id = parser.next_expr_id();

        let deps = collect_deps(&ast);
        let exports = collect_exports(&ast, self.reporter);

        self.by_path.insert(path.clone(), name);
        self.records.insert(
            name,
            ModuleRecord {
                name,
                path,
                ast,
                exports,
                deps: deps.iter().map(|(d, _)| *d).collect(),
                compiled: false,
                poisoned: false,
            },
        );

        for (dep, pos) in deps {
            self.load_dependency(dep, pos);
        }
    }

    fn load_dependency(&mut self, name: Symbol, pos: Pos) {
        // A dependency still on the in-progress stack is a cycle.
        if let Some(start) = self.in_progress.iter().position(|&m| m == name) {
            let mut chain: Vec<&str> = self.in_progress[start..]
                .iter()
                .map(|m| m.as_str())
                .collect();
            chain.push(name.as_str());
            self.reporter.error(
                ReportCode::M002,
                format!("circular module dependency: {}", chain.join(" -> ")),
                pos,
            );
            // Poison every module on the chain; the rest still compile.
            for member in &self.in_progress[start..] {
                if let Some(rec) = self.records.get_mut(member) {
                    rec.poisoned = true;
                }
            }
            if let Some(rec) = self.records.get_mut(&name) {
                rec.poisoned = true;
            }
            return;
        }
        if self.records.contains_key(&name) {
            return;
        }

        let Some(path) = self.locate(name) else {
            self.reporter.error(
                ReportCode::M004,
                format!("module '{}' not found in module paths", name),
                pos,
            );
            return;
        };

        // A different import spelling resolving to an already-loaded path
        // reuses the record.
        if let Some(&existing) = self.by_path.get(&path) {
            if existing != name {
                return;
            }
        }

        let Some(source) = read_module(&path, pos, self.reporter) else {
            return;
        };
        self.in_progress.push(name);
        self.load_module_source(name, path, &source);
        self.in_progress.pop();
    }

    /// First match over the search paths wins.
    fn locate(&self, name: Symbol) -> Option<PathBuf> {
        let file = format!("{}.sbl", name);
        self.search_paths
            .iter()
            .map(|dir| dir.join(&file))
            .find(|candidate| candidate.is_file())
    }
}

/// Module name from a path: the file stem.
fn module_name_of(path: &Path) -> Symbol {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("<main>");
    Symbol::intern(stem)
}

/// Read a module's source with scoped file access.
fn read_module(path: &Path, pos: Pos, reporter: &Reporter) -> Option<String> {
    if !path.is_file() {
        reporter.error(
            ReportCode::I001,
            format!("file not found: {}", path.display()),
            pos,
        );
        return None;
    }
    match fs::read_to_string(path) {
        Ok(source) => Some(source),
        Err(err) => {
            reporter.error(
                ReportCode::I003,
                format!("failed to read {}: {}", path.display(), err),
                pos,
            );
            None
        }
    }
}

/// Top-level imports of a module.
fn collect_deps(ast: &[Stmt]) -> Vec<(Symbol, Pos)> {
    let mut deps = Vec::new();
    let mut seen = FxHashSet::default();
    for stmt in ast {
        if let StmtKind::Import(import) = &stmt.kind {
            if seen.insert(import.module) {
                deps.push((import.module, import.pos));
            }
        }
    }
    deps
}

/// Build a module's export set from its `export` statements. Only
/// top-level declarations may be exported.
fn collect_exports(ast: &[Stmt], reporter: &Reporter) -> ExportSet {
    let mut exports = ExportSet::default();

    let classify = |stmt: &Stmt, exports: &mut ExportSet| match &stmt.kind {
        StmtKind::Func(f) => {
            exports.functions.insert(f.name);
        }
        StmtKind::Class(c) => {
            exports.classes.insert(c.name);
            exports.types.insert(c.name);
        }
        StmtKind::Enum(e) => {
            exports.types.insert(e.name);
        }
        StmtKind::Trait(t) => {
            exports.types.insert(t.name);
        }
        StmtKind::Let(l) => {
            exports.variables.insert(l.name);
        }
        _ => {}
    };

    for stmt in ast {
        let StmtKind::Export(export) = &stmt.kind else {
            continue;
        };
        match export {
            ExportStmt::Decl(decl) => classify(decl, &mut exports),
            ExportStmt::Name(name) => {
                let decl = ast.iter().find(|s| {
                    declared_name(s).map(|n| n == *name).unwrap_or(false)
                });
                match decl {
                    Some(decl) => classify(decl, &mut exports),
                    None => reporter.error(
                        ReportCode::M010,
                        format!("export of undeclared name '{}'", name),
                        stmt.pos,
                    ),
                }
            }
        }
    }
    exports
}

/// The name a top-level statement declares, if any.
fn declared_name(stmt: &Stmt) -> Option<Symbol> {
    match &stmt.kind {
        StmtKind::Func(f) => Some(f.name),
        StmtKind::Class(c) => Some(c.name),
        StmtKind::Enum(e) => Some(e.name),
        StmtKind::Trait(t) => Some(t.name),
        StmtKind::Let(l) => Some(l.name),
        StmtKind::Export(ExportStmt::Decl(inner)) => declared_name(inner),
        _ => None,
    }
}

/// Dependency-first order (reverse postorder of the import DAG).
fn compute_order(records: &IndexMap<Symbol, ModuleRecord>, entry: Symbol) -> Vec<Symbol> {
    let mut order = Vec::new();
    let mut visited = FxHashSet::default();
    let mut stack = FxHashSet::default();

    fn visit(
        name: Symbol,
        records: &IndexMap<Symbol, ModuleRecord>,
        visited: &mut FxHashSet<Symbol>,
        stack: &mut FxHashSet<Symbol>,
        order: &mut Vec<Symbol>,
    ) {
        if visited.contains(&name) || stack.contains(&name) {
            return;
        }
        let Some(record) = records.get(&name) else {
            return;
        };
        stack.insert(name);
        for dep in &record.deps {
            visit(*dep, records, visited, stack, order);
        }
        stack.remove(&name);
        visited.insert(name);
        order.push(name);
    }

    // Non-entry roots (loaded but unreachable) still get an order slot.
    visit(entry, records, &mut visited, &mut stack, &mut order);
    for name in records.keys() {
        visit(*name, records, &mut visited, &mut stack, &mut order);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_module(dir: &Path, name: &str, source: &str) {
        let mut f = fs::File::create(dir.join(format!("{}.sbl", name))).unwrap();
        f.write_all(source.as_bytes()).unwrap();
    }

    fn load(dir: &Path, source: &str) -> (ModuleSet, Reporter) {
        let reporter = Reporter::new();
        let loader = ModuleLoader::new(
            vec![dir.to_path_buf()],
            &reporter,
            LexOptions::default(),
        );
        let set = loader.load_source(source, "main.sbl");
        (set, reporter)
    }

    #[test]
    fn test_single_module_no_imports() {
        let dir = tempfile::tempdir().unwrap();
        let (set, reporter) = load(dir.path(), "let x = 1\n");
        assert!(!reporter.has_errors());
        assert_eq!(set.order.len(), 1);
        assert_eq!(set.entry.as_str(), "main");
    }

    #[test]
    fn test_import_resolves_through_search_path() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "geom", "export def area() -> int:\n    return 4\n");
        let (set, reporter) = load(dir.path(), "import geom\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert_eq!(set.records.len(), 2);
        // Dependencies come first in check order.
        assert_eq!(set.order[0].as_str(), "geom");
        assert_eq!(set.order[1].as_str(), "main");
    }

    #[test]
    fn test_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let (_, reporter) = load(dir.path(), "import nothere\n");
        let diags = reporter.diagnostics();
        assert!(diags.iter().any(|d| d.code == ReportCode::M004));
    }

    #[test]
    fn test_cyclic_import_reported_once_with_chain() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "a", "import b\n");
        write_module(dir.path(), "b", "import a\n");
        let (set, reporter) = load(dir.path(), "import a\n");
        let cycles: Vec<_> = reporter
            .diagnostics()
            .into_iter()
            .filter(|d| d.code == ReportCode::M002)
            .collect();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].message.contains("a -> b -> a"));
        // Both cycle members are poisoned.
        assert!(set.get(Symbol::intern("a")).unwrap().poisoned);
        assert!(set.get(Symbol::intern("b")).unwrap().poisoned);
        assert!(!set.get(Symbol::intern("main")).unwrap().poisoned);
    }

    #[test]
    fn test_diamond_dependencies_load_once() {
        let dir = tempfile::tempdir().unwrap();
        write_module(dir.path(), "base", "export def id() -> int:\n    return 1\n");
        write_module(dir.path(), "left", "import base\n");
        write_module(dir.path(), "right", "import base\n");
        let (set, reporter) = load(dir.path(), "import left\nimport right\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        assert_eq!(set.records.len(), 4);
        // base precedes both importers.
        let pos =
            |n: &str| set.order.iter().position(|m| m.as_str() == n).unwrap();
        assert!(pos("base") < pos("left"));
        assert!(pos("base") < pos("right"));
        assert!(pos("left") < pos("main"));
    }

    #[test]
    fn test_export_collection() {
        let dir = tempfile::tempdir().unwrap();
        write_module(
            dir.path(),
            "lib",
            "export def f() -> int:\n    return 1\ndef hidden() -> int:\n    return 2\nexport class C:\n    x: int\nlet v = 3\nexport v\n",
        );
        let (set, reporter) = load(dir.path(), "import lib\n");
        assert!(!reporter.has_errors(), "{:?}", reporter.diagnostics());
        let lib = set.get(Symbol::intern("lib")).unwrap();
        assert!(lib.exports.functions.contains(&Symbol::intern("f")));
        assert!(!lib.exports.contains(Symbol::intern("hidden")));
        assert!(lib.exports.classes.contains(&Symbol::intern("C")));
        assert!(lib.exports.variables.contains(&Symbol::intern("v")));
    }

    #[test]
    fn test_export_of_undeclared_name() {
        let dir = tempfile::tempdir().unwrap();
        let (_, reporter) = load(dir.path(), "export ghost\n");
        assert!(reporter
            .diagnostics()
            .iter()
            .any(|d| d.code == ReportCode::M010));
    }
}
