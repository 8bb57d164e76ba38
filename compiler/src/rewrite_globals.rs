// rewrite_globals.rs — Compile-time global substitution.
//
// RewriteGlobals replaces references to configured globals with constant
// literals; it must run before anything that forbids unknown globals.
// CheckGlobals then rejects whatever survived (omitted when unknown
// globals are allowed).

use std::collections::HashMap;

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

/// A compile-time global value supplied by configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum GlobalValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl GlobalValue {
    /// Parse a CLI-style definition value: `true`, `42`, `1.5`, or a
    /// quoted/bare string.
    pub fn parse(text: &str) -> GlobalValue {
        match text {
            "true" => return GlobalValue::Bool(true),
            "false" => return GlobalValue::Bool(false),
            _ => {}
        }
        if let Ok(n) = text.parse::<i64>() {
            return GlobalValue::Int(n);
        }
        if let Ok(x) = text.parse::<f64>() {
            return GlobalValue::Float(x);
        }
        let unquoted = text
            .strip_prefix('\'')
            .and_then(|t| t.strip_suffix('\''))
            .unwrap_or(text);
        GlobalValue::Str(unquoted.to_string())
    }

    fn to_expr_kind(&self) -> ExprKind {
        match self {
            GlobalValue::Bool(b) => ExprKind::Bool(*b),
            GlobalValue::Int(n) => ExprKind::Int(*n),
            GlobalValue::Float(x) => ExprKind::Float(*x),
            GlobalValue::Str(s) => ExprKind::Str(s.clone()),
        }
    }
}

pub struct RewriteGlobalsPass {
    globals: HashMap<String, GlobalValue>,
}

impl RewriteGlobalsPass {
    pub fn new(globals: HashMap<String, GlobalValue>) -> Self {
        Self { globals }
    }
}

impl FilePass for RewriteGlobalsPass {
    fn id(&self) -> PassId {
        PassId::RewriteGlobals
    }

    fn run(&mut self, file: &mut FileNode, ids: &mut IdGenerator, _sink: &mut ErrorSink) {
        for template in &mut file.templates {
            visit_exprs_mut(&mut template.body, &mut |expr| {
                let substitution = match &expr.kind {
                    ExprKind::Global { name } => self.globals.get(name),
                    _ => None,
                };
                if let Some(value) = substitution {
                    // The literal is a new node and gets a fresh id; the
                    // location stays on the original reference.
                    expr.kind = value.to_expr_kind();
                    expr.base.id = ids.fresh();
                }
            });
        }
    }
}

/// Rejects globals that survived substitution.
pub struct CheckGlobalsPass;

impl FilePass for CheckGlobalsPass {
    fn id(&self) -> PassId {
        PassId::CheckGlobals
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        for template in &file.templates {
            visit_exprs(&template.body, &mut |expr| {
                if let ExprKind::Global { name } = &expr.kind {
                    sink.report(
                        Diagnostic::error(
                            expr.base.loc.clone(),
                            format!("unknown global '{name}'"),
                        )
                        .with_code(codes::E0302),
                    );
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_fileset, SourceFile};

    fn parse(src: &str) -> (FileSetNode, IdGenerator, ErrorSink) {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let fileset = parse_fileset(
            vec![SourceFile::new("test.tpl", src, FileKind::Src)],
            &mut ids,
            &mut sink,
        );
        assert!(!sink.has_errors());
        (fileset, ids, sink)
    }

    #[test]
    fn substitutes_configured_global() {
        let (mut fileset, mut ids, mut sink) =
            parse("{namespace ns}\n{template .foo}{app.DEBUG}{/template}\n");
        let globals = HashMap::from([("app.DEBUG".to_string(), GlobalValue::Bool(true))]);
        RewriteGlobalsPass::new(globals).run(&mut fileset.files[0], &mut ids, &mut sink);
        match &fileset.files[0].templates[0].body[0].kind {
            StmtKind::Print(n) => assert!(matches!(n.expr.kind, ExprKind::Bool(true))),
            other => panic!("expected print, got {:?}", other),
        }
        assert!(!sink.has_errors());
    }

    #[test]
    fn substituted_node_gets_fresh_id() {
        let (mut fileset, mut ids, mut sink) =
            parse("{namespace ns}\n{template .foo}{app.LIMIT}{/template}\n");
        let before = ids.allocated();
        let globals = HashMap::from([("app.LIMIT".to_string(), GlobalValue::Int(10))]);
        RewriteGlobalsPass::new(globals).run(&mut fileset.files[0], &mut ids, &mut sink);
        assert_eq!(ids.allocated(), before + 1);
    }

    #[test]
    fn unknown_global_reported_by_check() {
        let (mut fileset, mut ids, mut sink) =
            parse("{namespace ns}\n{template .foo}{app.MISSING}{/template}\n");
        RewriteGlobalsPass::new(HashMap::new()).run(&mut fileset.files[0], &mut ids, &mut sink);
        CheckGlobalsPass.run(&mut fileset.files[0], &mut ids, &mut sink);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics()[0].code, Some(codes::E0302));
    }

    #[test]
    fn parse_global_values() {
        assert_eq!(GlobalValue::parse("true"), GlobalValue::Bool(true));
        assert_eq!(GlobalValue::parse("42"), GlobalValue::Int(42));
        assert_eq!(GlobalValue::parse("2.5"), GlobalValue::Float(2.5));
        assert_eq!(
            GlobalValue::parse("'hi'"),
            GlobalValue::Str("hi".to_string())
        );
    }
}
