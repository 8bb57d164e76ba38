// headers.rs — Template header validation.
//
// Validates `{@param}` / `{@prop}` declarations: duplicate names,
// prop placement, and declared-type parsing. When type checking is
// disabled the declared types are left as Unknown and no type
// diagnostics are produced, but duplicate detection still runs.

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};
use crate::types::TempoType;

pub struct ResolveHeadersPass {
    /// Parse declared types; false when all type checking is disabled.
    pub parse_types: bool,
}

impl FilePass for ResolveHeadersPass {
    fn id(&self) -> PassId {
        PassId::ResolveHeaders
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        let path = file.path.clone();
        for template in &mut file.templates {
            let is_element = template.kind == TemplateKind::Element;

            // Duplicate detection. When a @param and a @prop collide the
            // diagnostic is attached to the @param declaration's name.
            for i in 0..template.decls.len() {
                for j in 0..i {
                    if template.decls[i].name != template.decls[j].name {
                        continue;
                    }
                    let (first, second) = (&template.decls[j], &template.decls[i]);
                    let blamed = if first.kind != second.kind {
                        if first.kind == DeclKind::Param { first } else { second }
                    } else {
                        second
                    };
                    let other = if std::ptr::eq(blamed, first) { second } else { first };
                    sink.report(
                        Diagnostic::error(
                            SourceLocation::from_span(&path, blamed.name_span),
                            format!("duplicate declaration of '{}'", blamed.name),
                        )
                        .with_code(codes::E0200)
                        .with_related(
                            SourceLocation::from_span(&path, other.name_span),
                            "also declared here",
                        ),
                    );
                }
            }

            for decl in &mut template.decls {
                if decl.kind == DeclKind::Prop && !is_element {
                    sink.report(
                        Diagnostic::error(
                            SourceLocation::from_span(&path, decl.name_span),
                            format!("@prop '{}' is only allowed in element templates", decl.name),
                        )
                        .with_code(codes::E0203),
                    );
                }
                if self.parse_types {
                    match TempoType::parse(&decl.type_text) {
                        Some(ty) => decl.ty = ty,
                        None => {
                            sink.report(
                                Diagnostic::error(
                                    SourceLocation::from_span(&path, decl.name_span),
                                    format!(
                                        "unknown type '{}' in declaration of '{}'",
                                        decl.type_text, decl.name
                                    ),
                                )
                                .with_code(codes::E0202),
                            );
                            decl.ty = TempoType::Unknown;
                        }
                    }
                }
            }
        }
    }
}
