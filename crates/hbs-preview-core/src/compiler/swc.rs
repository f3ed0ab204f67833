//! SWC compiler backend implementation.
//!
//! Strips TypeScript syntax and re-emits the module as plain ES module
//! JavaScript, or as CommonJS when the spec asks for it. No type checking
//! happens here; every file compiles in isolation.

#![allow(clippy::default_trait_access)]

use std::path::Path;

use super::spec::{EsTarget, ModuleKind};
use super::{CompilerBackend, CompilerError, Diagnostic, TranspileOutput, TranspileSpec};

/// SWC-based compiler backend.
///
/// `SwcBackend` is `Send + Sync`; each call to `transpile` is independent.
#[derive(Debug, Clone, Default)]
pub struct SwcBackend {
    _private: (),
}

impl SwcBackend {
    /// Create a new SWC backend with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self { _private: () }
    }
}

impl CompilerBackend for SwcBackend {
    fn name(&self) -> &'static str {
        "swc"
    }

    fn transpile(
        &self,
        spec: &TranspileSpec,
        source: &str,
    ) -> Result<TranspileOutput, CompilerError> {
        if !spec.input_within_root() {
            let root = spec
                .root_dir
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            return Err(CompilerError::outside_root_dir(format!(
                "File '{}' is not under rootDir '{root}'",
                spec.input_path.display()
            )));
        }

        if spec.module == ModuleKind::NodeNext {
            return Err(CompilerError::unsupported(format!(
                "module output '{}' cannot be executed by the preview engine",
                spec.module
            )));
        }

        if source.trim().is_empty() {
            return Ok(TranspileOutput::new(""));
        }

        compile_with_swc(spec, source, crate::paths::is_typescript(&spec.input_path))
    }
}

fn compile_with_swc(
    spec: &TranspileSpec,
    source: &str,
    is_ts: bool,
) -> Result<TranspileOutput, CompilerError> {
    use swc_common::{comments::SingleThreadedComments, sync::Lrc, FileName, Globals, Mark, SourceMap, Spanned, GLOBALS};
    use swc_ecma_ast::{EsVersion, Program};
    use swc_ecma_codegen::{text_writer::JsWriter, Emitter};
    use swc_ecma_parser::{lexer::Lexer, EsSyntax, Parser, StringInput, Syntax, TsSyntax};
    use swc_ecma_transforms_base::{fixer::fixer, hygiene::hygiene, resolver};
    use swc_ecma_transforms_typescript::strip;
    use swc_ecma_visit::FoldWith;

    let cm: Lrc<SourceMap> = Default::default();

    let filename = spec
        .input_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("module.ts");
    let fm = cm.new_source_file(
        Lrc::new(FileName::Custom(filename.to_string())),
        source.to_string(),
    );

    let syntax = if is_ts {
        Syntax::Typescript(TsSyntax {
            decorators: spec.decorators,
            ..Default::default()
        })
    } else {
        Syntax::Es(EsSyntax {
            decorators: spec.decorators,
            ..Default::default()
        })
    };

    let target = match spec.target {
        EsTarget::ES5 => EsVersion::Es5,
        EsTarget::ES2015 => EsVersion::Es2015,
        EsTarget::ES2016 => EsVersion::Es2016,
        EsTarget::ES2017 => EsVersion::Es2017,
        EsTarget::ES2018 => EsVersion::Es2018,
        EsTarget::ES2019 => EsVersion::Es2019,
        EsTarget::ES2020 => EsVersion::Es2020,
        EsTarget::ES2021 => EsVersion::Es2021,
        EsTarget::ES2022 | EsTarget::ES2023 | EsTarget::ES2024 => EsVersion::Es2022,
        EsTarget::ESNext => EsVersion::EsNext,
    };

    let comments = SingleThreadedComments::default();
    let lexer = Lexer::new(syntax, target, StringInput::from(&*fm), Some(&comments));
    let mut parser = Parser::new_from(lexer);

    let diagnostic = |err: &swc_ecma_parser::error::Error| {
        let loc = cm.lookup_char_pos(err.span().lo);
        Diagnostic::error(err.kind().msg().into_owned()).with_location(
            spec.input_path.clone(),
            loc.line as u32,
            loc.col.0 as u32 + 1,
        )
    };

    let module = match parser.parse_module() {
        Ok(module) => module,
        Err(e) => {
            let diag = diagnostic(&e);
            return Err(CompilerError::parse_error(format!(
                "Failed to parse {}",
                spec.input_path.display()
            ))
            .with_diagnostics(vec![diag]));
        }
    };

    let recovered: Vec<Diagnostic> = parser.take_errors().iter().map(diagnostic).collect();
    if !recovered.is_empty() {
        return Err(CompilerError::parse_error(format!(
            "Failed to parse {}",
            spec.input_path.display()
        ))
        .with_diagnostics(recovered));
    }

    let output = GLOBALS.set(&Globals::default(), || -> Result<_, CompilerError> {
        let unresolved_mark = Mark::new();
        let top_level_mark = Mark::new();

        let mut program = Program::Module(module);
        program = program.fold_with(&mut resolver(unresolved_mark, top_level_mark, is_ts));
        if is_ts {
            program = program.fold_with(&mut strip(unresolved_mark, top_level_mark));
        }

        let mut module = match program {
            Program::Module(m) => m,
            Program::Script(s) => swc_ecma_ast::Module {
                span: s.span,
                body: s
                    .body
                    .into_iter()
                    .map(swc_ecma_ast::ModuleItem::Stmt)
                    .collect(),
                shebang: s.shebang,
            },
        };

        module = module.fold_with(&mut hygiene());
        if spec.module == ModuleKind::CommonJS {
            module = super::commonjs::to_commonjs(module, &cm)?;
        }
        Ok(module.fold_with(&mut fixer(Some(&comments))))
    })?;

    let mut buf = Vec::new();
    {
        let writer = JsWriter::new(cm.clone(), "\n", &mut buf, None);
        let mut emitter = Emitter {
            cfg: swc_ecma_codegen::Config::default().with_target(target),
            cm: cm.clone(),
            comments: Some(&comments),
            wr: writer,
        };

        emitter
            .emit_module(&output)
            .map_err(|e| CompilerError::transform_error(format!("Failed to emit: {e}")))?;
    }

    let code = String::from_utf8(buf)
        .map_err(|e| CompilerError::transform_error(format!("Invalid UTF-8 output: {e}")))?;

    Ok(TranspileOutput::new(code))
}

/// Transpile a single file with default options.
pub fn transpile_file(path: &Path, source: &str) -> Result<TranspileOutput, CompilerError> {
    SwcBackend::new().transpile(&TranspileSpec::new(path), source)
}
