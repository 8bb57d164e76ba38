// desugar_html.rs — The inverse of HtmlRewrite.
//
// Collapses tag/attribute/text structural nodes back into raw text for
// backends that cannot consume HTML nodes. Dynamic attribute content
// stays as its own node between the serialized text pieces; the
// CombineRawText pass merges the fragments afterwards. Idempotent: a
// second run finds no HTML nodes and changes nothing.

use crate::ast::*;
use crate::diag::ErrorSink;
use crate::id::{IdGenerator, NodeId};
use crate::pass::{FileSetPass, PassId, PassResult};
use crate::registry::TemplateRegistry;

pub struct DesugarHtmlPass;

impl FileSetPass for DesugarHtmlPass {
    fn id(&self) -> PassId {
        PassId::DesugarHtml
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        ids: &mut IdGenerator,
        _registry: &mut TemplateRegistry,
        _sink: &mut ErrorSink,
    ) -> PassResult {
        for file in fileset
            .files
            .iter_mut()
            .filter(|f| f.kind == FileKind::Src)
        {
            for template in &mut file.templates {
                let template_id = template.base.id;
                desugar_block(&mut template.body, template_id, ids);
            }
            assign_parents_file(file);
        }
        PassResult::Continue
    }
}

fn desugar_block(stmts: &mut Vec<StmtNode>, owner: NodeId, ids: &mut IdGenerator) {
    let old = std::mem::take(stmts);
    for mut stmt in old {
        for (block_owner, block) in stmt.child_blocks_mut() {
            desugar_block(block, block_owner, ids);
        }
        match stmt.kind {
            StmtKind::HtmlOpenTag(tag) => {
                emit_open_tag(tag, &stmt.base.loc, stmts, ids);
            }
            StmtKind::HtmlCloseTag(tag) => {
                stmts.push(raw(
                    ids,
                    &stmt.base.loc,
                    format!("</{}>", tag.tag_name),
                ));
            }
            _ => stmts.push(stmt),
        }
    }
    for stmt in stmts.iter_mut() {
        stmt.base.parent = Some(owner);
    }
}

fn emit_open_tag(
    tag: HtmlOpenTagNode,
    loc: &SourceLocation,
    out: &mut Vec<StmtNode>,
    ids: &mut IdGenerator,
) {
    out.push(raw(ids, loc, format!("<{}", tag.tag_name)));
    for attr in tag.attrs {
        match attr.kind {
            StmtKind::HtmlAttribute(a) => {
                match a.value {
                    Some(value) => {
                        out.push(raw(ids, &attr.base.loc, format!(" {}=\"", a.name)));
                        if let StmtKind::HtmlAttributeValue(v) = value.kind {
                            out.extend(v.children);
                        }
                        out.push(raw(ids, &attr.base.loc, "\"".to_string()));
                    }
                    None => {
                        out.push(raw(ids, &attr.base.loc, format!(" {}", a.name)));
                    }
                }
            }
            // Dynamic attribute content keeps its node, separated by a
            // space so the serialized tag stays well-formed.
            _ => {
                out.push(raw(ids, &attr.base.loc, " ".to_string()));
                out.push(attr);
            }
        }
    }
    if tag.self_closing && !crate::html_rewrite::is_void_element(&tag.tag_name) {
        out.push(raw(ids, loc, "/>".to_string()));
    } else {
        out.push(raw(ids, loc, ">".to_string()));
    }
}

fn raw(ids: &mut IdGenerator, loc: &SourceLocation, text: String) -> StmtNode {
    StmtNode::new(ids.fresh(), loc.clone(), StmtKind::RawText(text))
}
