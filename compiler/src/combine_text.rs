// combine_text.rs — Raw-text coalescing.
//
// Merges runs of adjacent raw-text siblings under the same parent into
// one node. Earlier passes are free to fragment text (HtmlRewrite,
// Optimize splicing, DesugarHtml); backends require no two consecutive
// raw-text siblings, so this runs last. The merged node keeps the first
// component's node and its location is widened to span from the first
// component's start to the last component's end. Idempotent.

use crate::ast::*;
use crate::diag::ErrorSink;
use crate::id::IdGenerator;
use crate::pass::{FileSetPass, PassId, PassResult};
use crate::registry::TemplateRegistry;

pub struct CombineRawTextPass;

impl FileSetPass for CombineRawTextPass {
    fn id(&self) -> PassId {
        PassId::CombineRawText
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        _registry: &mut TemplateRegistry,
        _sink: &mut ErrorSink,
    ) -> PassResult {
        for file in fileset
            .files
            .iter_mut()
            .filter(|f| f.kind == FileKind::Src)
        {
            for template in &mut file.templates {
                combine_block(&mut template.body);
            }
        }
        PassResult::Continue
    }
}

pub(crate) fn combine_block(stmts: &mut Vec<StmtNode>) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        for (_, block) in stmt.child_blocks_mut() {
            combine_block(block);
        }
        // Empty fragments disappear entirely.
        if matches!(&stmt.kind, StmtKind::RawText(t) if t.is_empty()) {
            continue;
        }
        if let StmtKind::RawText(text) = &stmt.kind {
            if let Some(prev) = stmts.last_mut() {
                if let StmtKind::RawText(prev_text) = &mut prev.kind {
                    prev_text.push_str(text);
                    prev.base.loc = prev.base.loc.span_to(&stmt.base.loc);
                    continue;
                }
            }
        }
        stmts.push(stmt);
    }
}
