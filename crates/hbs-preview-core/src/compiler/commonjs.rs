//! ES module to CommonJS lowering, used when a CommonJS companion module
//! `require()`s a TypeScript file.
//!
//! Runs on the stripped, hygienic module. Imports become `require()` calls
//! and exports become assignments to `exports`; bindings are copied, not
//! live.

use swc_common::{sync::Lrc, FileName, SourceMap};
use swc_ecma_ast::{
    ClassDecl, Decl, DefaultDecl, EsVersion, ExportSpecifier, Expr, FnDecl, ImportSpecifier, Module, ModuleDecl,
    ModuleExportName, ModuleItem, ObjectPatProp, Pat, Stmt, TsModuleRef,
};
use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax};

use super::CompilerError;

/// Rewrite `module` so it runs inside a CommonJS wrapper.
pub(super) fn to_commonjs(module: Module, cm: &Lrc<SourceMap>) -> Result<Module, CompilerError> {
    let Module { span, body, shebang } = module;
    let mut lowering = Lowering {
        cm,
        body: Vec::with_capacity(body.len() + 1),
        temps: 0,
    };

    lowering.emit("Object.defineProperty(exports, \"__esModule\", { value: true });")?;
    for item in body {
        match item {
            ModuleItem::Stmt(stmt) => lowering.body.push(ModuleItem::Stmt(stmt)),
            ModuleItem::ModuleDecl(decl) => lowering.lower(decl)?,
        }
    }

    Ok(Module {
        span,
        body: lowering.body,
        shebang,
    })
}

struct Lowering<'a> {
    cm: &'a Lrc<SourceMap>,
    body: Vec<ModuleItem>,
    temps: usize,
}

impl Lowering<'_> {
    fn lower(&mut self, decl: ModuleDecl) -> Result<(), CompilerError> {
        match decl {
            ModuleDecl::Import(import) => {
                if import.type_only {
                    return Ok(());
                }
                if import.specifiers.is_empty() {
                    return self.emit(&format!("require({});", js_string(&import.src.value)?));
                }
                let module = self.require(&import.src.value)?;
                for specifier in import.specifiers {
                    match specifier {
                        ImportSpecifier::Default(s) => self.emit(&format!(
                            "const {} = {module}.__esModule ? {module}.default : {module};",
                            s.local.sym
                        ))?,
                        ImportSpecifier::Namespace(s) => self.emit(&format!("const {} = {module};", s.local.sym))?,
                        ImportSpecifier::Named(s) if !s.is_type_only => {
                            let imported = s
                                .imported
                                .as_ref()
                                .map_or_else(|| s.local.sym.to_string(), export_name);
                            self.emit(&format!("const {} = {module}{};", s.local.sym, member(&imported)?))?;
                        }
                        ImportSpecifier::Named(_) => {}
                    }
                }
                Ok(())
            }
            ModuleDecl::ExportDecl(export) => {
                let names = declared_names(&export.decl);
                self.body.push(ModuleItem::Stmt(Stmt::Decl(export.decl)));
                for name in names {
                    self.emit(&format!("exports{} = {name};", member(&name)?))?;
                }
                Ok(())
            }
            ModuleDecl::ExportNamed(named) => {
                if named.type_only {
                    return Ok(());
                }
                let source = match &named.src {
                    Some(src) => Some(self.require(&src.value)?),
                    None => None,
                };
                for specifier in named.specifiers {
                    let (exported, value) = match specifier {
                        ExportSpecifier::Named(s) if s.is_type_only => continue,
                        ExportSpecifier::Named(s) => {
                            let orig = export_name(&s.orig);
                            let exported = s.exported.as_ref().map_or_else(|| orig.clone(), export_name);
                            let value = match &source {
                                Some(module) => format!("{module}{}", member(&orig)?),
                                None => orig,
                            };
                            (exported, value)
                        }
                        ExportSpecifier::Namespace(s) => {
                            let module = source.clone().ok_or_else(|| unsupported("`export * as` needs a source"))?;
                            (export_name(&s.name), module)
                        }
                        ExportSpecifier::Default(s) => {
                            let module = source.clone().ok_or_else(|| unsupported("`export x from` needs a source"))?;
                            (s.exported.sym.to_string(), format!("{module}.default"))
                        }
                    };
                    self.emit(&format!("exports{} = {value};", member(&exported)?))?;
                }
                Ok(())
            }
            ModuleDecl::ExportDefaultDecl(export) => match export.decl {
                DefaultDecl::Fn(f) => match f.ident.clone() {
                    Some(ident) => {
                        let name = ident.sym.to_string();
                        self.body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Fn(FnDecl {
                            ident,
                            declare: false,
                            function: f.function,
                        }))));
                        self.emit(&format!("exports.default = {name};"))
                    }
                    None => self.assign("exports.default = 0;", Expr::Fn(f)),
                },
                DefaultDecl::Class(c) => match c.ident.clone() {
                    Some(ident) => {
                        let name = ident.sym.to_string();
                        self.body.push(ModuleItem::Stmt(Stmt::Decl(Decl::Class(ClassDecl {
                            ident,
                            declare: false,
                            class: c.class,
                        }))));
                        self.emit(&format!("exports.default = {name};"))
                    }
                    None => self.assign("exports.default = 0;", Expr::Class(c)),
                },
                DefaultDecl::TsInterfaceDecl(_) => Ok(()),
            },
            ModuleDecl::ExportDefaultExpr(export) => self.assign("exports.default = 0;", *export.expr),
            ModuleDecl::ExportAll(all) => {
                if all.type_only {
                    return Ok(());
                }
                let module = self.require(&all.src.value)?;
                self.emit(&format!(
                    "for (const key of Object.keys({module})) if (key !== \"default\" && !(key in exports)) exports[key] = {module}[key];"
                ))
            }
            ModuleDecl::TsExportAssignment(export) => self.assign("module.exports = 0;", *export.expr),
            ModuleDecl::TsImportEquals(decl) => {
                if decl.is_type_only {
                    return Ok(());
                }
                let TsModuleRef::TsExternalModuleRef(external) = &decl.module_ref else {
                    return Err(unsupported("`import x = Namespace.member`"));
                };
                let name = decl.id.sym.to_string();
                self.emit(&format!("const {name} = require({});", js_string(&external.expr.value)?))?;
                if decl.is_export {
                    self.emit(&format!("exports{} = {name};", member(&name)?))?;
                }
                Ok(())
            }
            ModuleDecl::TsNamespaceExport(_) => Ok(()),
        }
    }

    /// `const __moduleN = require(src);`, returning the binding name.
    fn require(&mut self, src: &str) -> Result<String, CompilerError> {
        self.temps += 1;
        let name = format!("__module{}", self.temps);
        self.emit(&format!("const {name} = require({});", js_string(src)?))?;
        Ok(name)
    }

    fn emit(&mut self, code: &str) -> Result<(), CompilerError> {
        let stmts = parse_stmts(self.cm, code)?;
        self.body.extend(stmts.into_iter().map(ModuleItem::Stmt));
        Ok(())
    }

    /// Emit the single assignment in `template` with `value` as its right side.
    fn assign(&mut self, template: &str, value: Expr) -> Result<(), CompilerError> {
        let mut stmts = parse_stmts(self.cm, template)?;
        let Some(Stmt::Expr(stmt)) = stmts.first_mut() else {
            return Err(CompilerError::transform_error(format!("bad assignment template: {template}")));
        };
        let Expr::Assign(assign) = &mut *stmt.expr else {
            return Err(CompilerError::transform_error(format!("bad assignment template: {template}")));
        };
        assign.right = Box::new(value);
        self.body.extend(stmts.into_iter().map(ModuleItem::Stmt));
        Ok(())
    }
}

fn parse_stmts(cm: &Lrc<SourceMap>, code: &str) -> Result<Vec<Stmt>, CompilerError> {
    let fm = cm.new_source_file(Lrc::new(FileName::Anon), code.to_string());
    let lexer = Lexer::new(
        Syntax::Es(EsSyntax::default()),
        EsVersion::EsNext,
        StringInput::from(&*fm),
        None,
    );
    Parser::new_from(lexer)
        .parse_script()
        .map(|script| script.body)
        .map_err(|e| CompilerError::transform_error(format!("CommonJS lowering: {}", e.kind().msg())))
}

fn unsupported(what: &str) -> CompilerError {
    CompilerError::unsupported(format!("{what} cannot be converted to CommonJS"))
}

fn js_string(value: &str) -> Result<String, CompilerError> {
    serde_json::to_string(value).map_err(|e| CompilerError::transform_error(e.to_string()))
}

/// Property access for `name`: `.name` when it is an identifier.
fn member(name: &str) -> Result<String, CompilerError> {
    let mut chars = name.chars();
    let is_ident = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$');
    if is_ident {
        Ok(format!(".{name}"))
    } else {
        Ok(format!("[{}]", js_string(name)?))
    }
}

fn export_name(name: &ModuleExportName) -> String {
    match name {
        ModuleExportName::Ident(ident) => ident.sym.to_string(),
        ModuleExportName::Str(s) => s.value.to_string(),
    }
}

fn declared_names(decl: &Decl) -> Vec<String> {
    let mut names = Vec::new();
    match decl {
        Decl::Fn(f) => names.push(f.ident.sym.to_string()),
        Decl::Class(c) => names.push(c.ident.sym.to_string()),
        Decl::Var(var) => {
            for declarator in &var.decls {
                pat_names(&declarator.name, &mut names);
            }
        }
        _ => {}
    }
    names
}

fn pat_names(pat: &Pat, out: &mut Vec<String>) {
    match pat {
        Pat::Ident(binding) => out.push(binding.id.sym.to_string()),
        Pat::Array(array) => {
            for elem in array.elems.iter().flatten() {
                pat_names(elem, out);
            }
        }
        Pat::Object(object) => {
            for prop in &object.props {
                match prop {
                    ObjectPatProp::KeyValue(kv) => pat_names(&kv.value, out),
                    ObjectPatProp::Assign(assign) => out.push(assign.key.sym.to_string()),
                    ObjectPatProp::Rest(rest) => pat_names(&rest.arg, out),
                }
            }
        }
        Pat::Rest(rest) => pat_names(&rest.arg, out),
        Pat::Assign(assign) => pat_names(&assign.left, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use crate::compiler::{CompilerBackend, ModuleKind, SwcBackend, TranspileSpec};

    fn lower(source: &str) -> String {
        let spec = TranspileSpec::new("/p/helpers.ts").with_module(ModuleKind::CommonJS);
        SwcBackend::new().transpile(&spec, source).unwrap().code
    }

    #[test]
    fn test_exports_become_assignments() {
        let code = lower(
            "export const a: number = 1, { b, c: [d] } = { b: 2, c: [3] };\n\
             export function shout(s: string) { return s.toUpperCase(); }\n\
             const hidden = 4;\n\
             export { hidden as visible };\n\
             export default class Card {}\n",
        );
        assert!(code.contains("__esModule"), "{code}");
        for line in [
            "exports.a = a",
            "exports.b = b",
            "exports.d = d",
            "exports.shout = shout",
            "exports.visible = hidden",
            "exports.default = Card",
        ] {
            assert!(code.contains(line), "missing {line}:\n{code}");
        }
        assert!(!code.contains("export "), "{code}");
    }

    #[test]
    fn test_imports_become_requires() {
        let code = lower(
            "import fmt, { pad as p } from './fmt';\n\
             import * as all from './all';\n\
             import type { Card } from './types';\n\
             import './side-effect';\n\
             export * from './more';\n\
             export default (x: Card) => p(fmt(x), all);\n",
        );
        assert!(code.contains("require(\"./fmt\")"), "{code}");
        assert!(code.contains(".pad"), "{code}");
        assert!(code.contains("require(\"./all\")"), "{code}");
        assert!(code.contains("require(\"./side-effect\")"), "{code}");
        assert!(code.contains("require(\"./more\")"), "{code}");
        assert!(!code.contains("./types"), "{code}");
        assert!(code.contains("exports.default ="), "{code}");
        assert!(!code.contains("import "), "{code}");
    }

    #[test]
    fn test_non_identifier_export_names() {
        let code = lower("const x = 1;\nexport { x as 'kebab-name' };\n");
        assert!(code.contains("exports[\"kebab-name\"] = x"), "{code}");
    }
}
