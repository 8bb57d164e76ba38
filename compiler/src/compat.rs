// compat.rs — Legacy expression compatibility.
//
// `v1Expression('...')` is the escape hatch for expressions written in
// the legacy syntax. When the compatibility option is off, any use is
// rejected here; when it is on, the expression is carried through
// untyped for the backend to deal with.

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

pub struct CheckV1ExpressionsPass {
    pub allow: bool,
}

impl FilePass for CheckV1ExpressionsPass {
    fn id(&self) -> PassId {
        PassId::CheckV1Expressions
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        if self.allow {
            return;
        }
        for template in &file.templates {
            visit_exprs(&template.body, &mut |expr| {
                if matches!(expr.kind, ExprKind::V1Expression(_)) {
                    sink.report(
                        Diagnostic::error(
                            expr.base.loc.clone(),
                            "v1 expression syntax is not supported",
                        )
                        .with_code(codes::E0204)
                        .with_hint("rewrite the expression, or enable allow_v1_expression"),
                    );
                }
            });
        }
    }
}
