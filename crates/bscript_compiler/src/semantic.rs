//! The reference resolver: builds a module's exports during the
//! pre-semantic stage and binds every type reference during the semantic
//! stage.

use bscript_ast::{
    Builtin, DeclarationKind, ExportKind, ExportedType, ModuleExports, Path, QualifiedName, ResolvedConst,
    ResolvedField, ResolvedScript, ResolvedType, ScriptTree, TypeRef, TypeShape,
};
use bscript_core::text::TextSpan;
use bscript_core::{StringId, StringPool};
use bscript_diagnostics::{messages, FatalError, Reporter};
use indexmap::IndexSet;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::toolchain::{Lookup, ScriptResolver, TypeLookup};

#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceResolver;

impl ScriptResolver for ReferenceResolver {
    fn declare(&self, module: &QualifiedName, tree: &ScriptTree, strings: &StringPool, reporter: &Reporter)
        -> ModuleExports {
        let mut exports = ModuleExports::new(module.clone());
        let mut declared = FxHashSet::default();

        for declaration in &tree.declarations {
            let name = text(strings, declaration.name.symbol);
            if !declared.insert(name) {
                reporter.report(&messages::DUPLICATE_TYPE_0, Some(declaration.name.span), &[name]);
                continue;
            }
            let (kind, members) = match &declaration.kind {
                DeclarationKind::Struct(fields) => {
                    if fields.is_empty() {
                        reporter.report(&messages::EMPTY_STRUCT_0, Some(declaration.name.span), &[name]);
                    }
                    let members = fields.iter().map(|field| (field.name.symbol, field.name.span));
                    (ExportKind::Struct, collect_members(name, members, strings, reporter))
                }
                DeclarationKind::Enum(variants) => {
                    if variants.is_empty() {
                        reporter.report(&messages::EMPTY_ENUM_0, Some(declaration.name.span), &[name]);
                    }
                    let members = variants.iter().map(|variant| (variant.symbol, variant.span));
                    (ExportKind::Enum, collect_members(name, members, strings, reporter))
                }
                DeclarationKind::Const(_) => continue,
            };
            exports.types.insert(name.to_string(), ExportedType { kind, members });
        }

        if exports.get(module.name()).is_none() {
            let module_name = module.to_string();
            reporter.report(&messages::MODULE_0_MUST_DECLARE_TYPE_1, None, &[&module_name, module.name()]);
        }
        exports
    }

    fn resolve(
        &self,
        exports: &ModuleExports,
        tree: &ScriptTree,
        strings: &StringPool,
        lookup: &dyn TypeLookup,
        reporter: &Reporter,
    ) -> Result<ResolvedScript, FatalError> {
        let mut resolver = Resolver {
            exports,
            strings,
            lookup,
            reporter,
            script: ResolvedScript::new(exports.module.clone()),
        };
        let mut spans = FxHashMap::default();

        for declaration in &tree.declarations {
            let name = text(strings, declaration.name.symbol);
            if spans.contains_key(name) {
                // Duplicates were reported while declaring.
                continue;
            }
            spans.insert(name, declaration.name.span);
            match &declaration.kind {
                DeclarationKind::Struct(fields) => {
                    let mut resolved = Vec::with_capacity(fields.len());
                    for field in fields {
                        if let Some(ty) = resolver.resolve_field_type(&field.ty)? {
                            resolved.push(ResolvedField {
                                name: text(strings, field.name.symbol).to_string(),
                                ty,
                            });
                        }
                    }
                    resolver.script.types.push(ResolvedType {
                        name: name.to_string(),
                        shape: TypeShape::Struct(resolved),
                    });
                }
                DeclarationKind::Enum(_) => {
                    let variants = exports
                        .get(name)
                        .map(|exported| exported.members.iter().cloned().collect())
                        .unwrap_or_default();
                    resolver.script.types.push(ResolvedType {
                        name: name.to_string(),
                        shape: TypeShape::Enum(variants),
                    });
                }
                DeclarationKind::Const(path) => {
                    if let Some(constant) = resolver.resolve_const(name, path)? {
                        resolver.script.constants.push(constant);
                    }
                }
            }
        }

        resolver.check_containment(&spans);
        Ok(resolver.script)
    }
}

fn text(strings: &StringPool, symbol: StringId) -> &str {
    strings.get_str(symbol).unwrap_or_default()
}

fn collect_members(
    owner: &str,
    members: impl Iterator<Item = (StringId, TextSpan)>,
    strings: &StringPool,
    reporter: &Reporter,
) -> IndexSet<String> {
    let mut collected = IndexSet::new();
    for (symbol, span) in members {
        let member = text(strings, symbol);
        if !collected.insert(member.to_string()) {
            reporter.report(&messages::DUPLICATE_MEMBER_0_IN_1, Some(span), &[member, owner]);
        }
    }
    collected
}

/// What a path resolved to.
struct Target {
    ty: TypeRef,
    /// `None` for builtins.
    exported: Option<ExportedType>,
    member: Option<String>,
}

struct Resolver<'r> {
    exports: &'r ModuleExports,
    strings: &'r StringPool,
    lookup: &'r dyn TypeLookup,
    reporter: &'r Reporter,
    script: ResolvedScript,
}

impl Resolver<'_> {
    fn resolve_field_type(&mut self, path: &Path) -> Result<Option<TypeRef>, FatalError> {
        let Some(target) = self.resolve_target(path)? else {
            return Ok(None);
        };
        if target.member.is_some() {
            let display = path.display(self.strings);
            self.reporter
                .report(&messages::_0_REFERS_TO_A_MEMBER_NOT_A_TYPE, Some(path.span()), &[&display]);
            return Ok(None);
        }
        Ok(Some(target.ty))
    }

    fn resolve_const(&mut self, name: &str, path: &Path) -> Result<Option<ResolvedConst>, FatalError> {
        let Some(target) = self.resolve_target(path)? else {
            return Ok(None);
        };
        let span = Some(path.span());
        let (Some(exported), Some(member)) = (&target.exported, &target.member) else {
            self.reporter.report(&messages::CONSTANT_0_NEEDS_A_MEMBER, span, &[name]);
            return Ok(None);
        };
        let type_display = target.ty.to_string();
        if exported.kind != ExportKind::Enum {
            self.reporter.report(&messages::_0_IS_NOT_AN_ENUM, span, &[&type_display]);
            return Ok(None);
        }
        let Some(ordinal) = exported.ordinal(member) else {
            self.reporter
                .report(&messages::TYPE_0_HAS_NO_MEMBER_1, span, &[&type_display, member]);
            return Ok(None);
        };
        Ok(Some(ResolvedConst {
            name: name.to_string(),
            variant: member.clone(),
            ty: target.ty,
            ordinal,
        }))
    }

    /// Builtins first, then this module's own types, then the namespace
    /// index.
    fn resolve_target(&mut self, path: &Path) -> Result<Option<Target>, FatalError> {
        let segments: Vec<&str> = path
            .segments
            .iter()
            .map(|segment| text(self.strings, segment.symbol))
            .collect();
        let span = Some(path.span());

        if let [single] = segments[..] {
            if let Some(builtin) = Builtin::from_name(single) {
                return Ok(Some(Target {
                    ty: TypeRef::Builtin(builtin),
                    exported: None,
                    member: None,
                }));
            }
        }
        if let Some(target) = self.local_target(&segments) {
            return Ok(Some(target));
        }

        let display = segments.join(":");
        match self.lookup.lookup(&display)? {
            Lookup::Found {
                exports,
                type_name,
                member,
            } => {
                let Some(exported) = exports.get(&type_name) else {
                    self.reporter.report(&messages::CANNOT_FIND_TYPE_0, span, &[&display]);
                    return Ok(None);
                };
                if exports.module != self.exports.module {
                    self.script.dependencies.insert(exports.module.to_string());
                }
                Ok(Some(Target {
                    ty: exports.type_ref(&type_name),
                    exported: Some(exported.clone()),
                    member,
                }))
            }
            Lookup::Failed { module } => {
                self.reporter
                    .report(&messages::TYPE_0_FROM_FAILED_MODULE_1, span, &[&display, &module]);
                Ok(None)
            }
            Lookup::Missing => {
                self.reporter.report(&messages::CANNOT_FIND_TYPE_0, span, &[&display]);
                Ok(None)
            }
        }
    }

    fn local_target(&self, segments: &[&str]) -> Option<Target> {
        let (name, member) = match segments {
            [name] => (*name, None),
            [name, member] => (*name, Some(member.to_string())),
            _ => return None,
        };
        let exported = self.exports.get(name)?;
        Some(Target {
            ty: self.exports.type_ref(name),
            exported: Some(exported.clone()),
            member,
        })
    }

    /// Report every struct of this module that contains itself by value,
    /// directly or through other structs of this module.
    fn check_containment(&self, spans: &FxHashMap<&str, TextSpan>) {
        let module = self.exports.module.to_string();
        let mut edges: FxHashMap<&str, Vec<&str>> = FxHashMap::default();
        for ty in &self.script.types {
            if let TypeShape::Struct(fields) = &ty.shape {
                let targets = fields
                    .iter()
                    .filter_map(|field| match &field.ty {
                        TypeRef::Named {
                            module: owner,
                            qualified,
                        } if *owner == module => qualified.rsplit(':').next(),
                        _ => None,
                    })
                    .collect();
                edges.insert(ty.name.as_str(), targets);
            }
        }

        for ty in &self.script.types {
            let start = ty.name.as_str();
            let mut stack: Vec<&str> = edges.get(start).cloned().unwrap_or_default();
            let mut seen = FxHashSet::default();
            while let Some(current) = stack.pop() {
                if current == start {
                    self.reporter
                        .report(&messages::STRUCT_0_CONTAINS_ITSELF, spans.get(start).copied(), &[start]);
                    break;
                }
                if seen.insert(current) {
                    if let Some(next) = edges.get(current) {
                        stack.extend(next.iter().copied());
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use bscript_diagnostics::CollectingSink;
    use pretty_assertions::assert_eq;

    /// Answers lookups from a fixed table; anything else is missing.
    struct Table(Vec<(&'static str, Lookup)>);

    impl TypeLookup for Table {
        fn lookup(&self, path: &str) -> Result<Lookup, FatalError> {
            Ok(self
                .0
                .iter()
                .find(|(known, _)| *known == path)
                .map(|(_, lookup)| lookup.clone())
                .unwrap_or(Lookup::Missing))
        }
    }

    struct Outcome {
        exports: ModuleExports,
        resolved: ResolvedScript,
        codes: Vec<u32>,
    }

    fn run(module: &str, source: &str, lookup: &dyn TypeLookup) -> Outcome {
        let sink = Arc::new(CollectingSink::new());
        let reporter = Reporter::new("test.bs", sink.clone());
        let mut strings = StringPool::new();
        let tree = bscript_parser::parse_source(source.as_bytes(), &mut strings, &reporter)
            .unwrap()
            .unwrap();
        let module = QualifiedName::parse(module).unwrap();
        let exports = ReferenceResolver.declare(&module, &tree, &strings, &reporter);
        let resolved = ReferenceResolver
            .resolve(&exports, &tree, &strings, lookup, &reporter)
            .unwrap();
        Outcome {
            exports,
            resolved,
            codes: sink.diagnostics().iter().map(|d| d.code).collect(),
        }
    }

    fn exported(module: &str, name: &str, kind: ExportKind, members: &[&str]) -> Lookup {
        let mut exports = ModuleExports::new(QualifiedName::parse(module).unwrap());
        exports.types.insert(
            name.to_string(),
            ExportedType {
                kind,
                members: members.iter().map(|m| m.to_string()).collect(),
            },
        );
        Lookup::Found {
            exports: Arc::new(exports),
            type_name: name.to_string(),
            member: None,
        }
    }

    fn field_types(script: &ResolvedScript, name: &str) -> Vec<String> {
        match &script.find_type(name).unwrap().shape {
            TypeShape::Struct(fields) => fields.iter().map(|field| field.ty.to_string()).collect(),
            TypeShape::Enum(_) => Vec::new(),
        }
    }

    // ========================================================================
    // Declaring
    // ========================================================================

    #[test]
    fn test_declare_collects_types_in_order() {
        let outcome = run("m:S", "struct S { a: int }\nenum E { A, B }\nconst C = E:B", &Table(vec![]));
        assert_eq!(outcome.codes, Vec::<u32>::new());
        let names: Vec<&str> = outcome.exports.types.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["S", "E"]);
        assert_eq!(outcome.exports.get("E").unwrap().ordinal("B"), Some(1));
        assert_eq!(outcome.exports.secondary_types().collect::<Vec<_>>(), vec!["E"]);
    }

    #[test]
    fn test_declare_reports_local_problems() {
        let outcome = run("m:Main", "struct A { x: int, x: int }\nenum A { Q }\nenum Empty {}", &Table(vec![]));
        assert_eq!(outcome.codes, vec![2003, 2002, 2005, 2001]);
    }

    // ========================================================================
    // Resolving
    // ========================================================================

    #[test]
    fn test_resolves_builtins_and_local_types() {
        let outcome = run("shapes:Line", "struct Line { from: Point, width: float }\nstruct Point { x: int }", &Table(vec![]));
        assert_eq!(outcome.codes, Vec::<u32>::new());
        assert_eq!(field_types(&outcome.resolved, "Line"), vec!["shapes:Point", "float"]);
        assert!(outcome.resolved.dependencies.is_empty());
    }

    #[test]
    fn test_constant_checks() {
        let source = "struct S { a: int }\nenum E { A }\nconst C1 = E\nconst C2 = S:a\nconst C3 = E:Z\nconst C4 = int\nconst C5 = E:A";
        let outcome = run("S", source, &Table(vec![]));
        assert_eq!(outcome.codes, vec![2107, 2104, 2102, 2107]);
        let constants: Vec<(&str, u32)> = outcome
            .resolved
            .constants
            .iter()
            .map(|constant| (constant.name.as_str(), constant.ordinal))
            .collect();
        assert_eq!(constants, vec![("C5", 0)]);
    }

    #[test]
    fn test_member_is_not_a_field_type() {
        let outcome = run("S", "struct S { a: E:A }\nenum E { A }", &Table(vec![]));
        assert_eq!(outcome.codes, vec![2105]);
    }

    #[test]
    fn test_struct_cycles_are_reported() {
        let outcome = run("S", "struct S { t: T }\nstruct T { s: S }\nstruct U { s: S }", &Table(vec![]));
        assert_eq!(outcome.codes, vec![2106, 2106]);
    }

    #[test]
    fn test_lookup_outcomes() {
        let mut kind = exported("geo:Kind", "Kind", ExportKind::Enum, &["Square", "Circle"]);
        if let Lookup::Found { member, .. } = &mut kind {
            *member = Some("Circle".to_string());
        }
        let table = Table(vec![
            ("geo:Vec2", exported("geo:Vec2", "Vec2", ExportKind::Struct, &["x", "y"])),
            ("geo:Kind:Circle", kind),
            ("gone:Thing", Lookup::Failed { module: "gone:Thing".to_string() }),
        ]);
        let source = "struct S { p: geo:Vec2, q: gone:Thing, r: Nope }\nconst K = geo:Kind:Circle";
        let outcome = run("S", source, &table);

        assert_eq!(outcome.codes, vec![2103, 2101]);
        assert_eq!(field_types(&outcome.resolved, "S"), vec!["geo:Vec2"]);
        let dependencies: Vec<&str> = outcome.resolved.dependencies.iter().map(String::as_str).collect();
        assert_eq!(dependencies, vec!["geo:Kind", "geo:Vec2"]);
        let constant = &outcome.resolved.constants[0];
        assert_eq!((constant.variant.as_str(), constant.ordinal), ("Circle", 1));
    }
}
