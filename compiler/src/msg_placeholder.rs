// msg_placeholder.rs — Placeholder insertion for translatable messages.
//
// Inside `{msg}` subtrees every non-text child is wrapped in a
// placeholder node with a stable synthetic name computed from its
// structural position and content. Names are collide-free within the
// enclosing message: repeats get a numeric suffix (`NAME`, `NAME_1`).
// Placeholder identity is preserved by later rewrites (the optimizer
// simplifies inside a placeholder, never through it).

use std::collections::HashSet;

use crate::ast::*;
use crate::diag::ErrorSink;
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

pub struct InsertMsgPlaceholdersPass;

impl FilePass for InsertMsgPlaceholdersPass {
    fn id(&self) -> PassId {
        PassId::InsertMsgPlaceholders
    }

    fn run(&mut self, file: &mut FileNode, ids: &mut IdGenerator, _sink: &mut ErrorSink) {
        for template in &mut file.templates {
            insert_in_block(&mut template.body, ids);
        }
        assign_parents_file(file);
    }
}

fn insert_in_block(stmts: &mut [StmtNode], ids: &mut IdGenerator) {
    for stmt in stmts {
        if let StmtKind::Msg(msg) = &mut stmt.kind {
            wrap_children(msg, ids);
            continue;
        }
        for (_, block) in stmt.child_blocks_mut() {
            insert_in_block(block, ids);
        }
    }
}

fn wrap_children(msg: &mut MsgNode, ids: &mut IdGenerator) {
    let mut used: HashSet<String> = HashSet::new();
    let children = std::mem::take(&mut msg.children);
    msg.children = children
        .into_iter()
        .map(|child| match &child.kind {
            StmtKind::RawText(_) | StmtKind::Placeholder(_) => child,
            _ => {
                let base_name = placeholder_base_name(&child);
                let name = uniquify(base_name, &mut used);
                let loc = child.base.loc.clone();
                StmtNode::new(
                    ids.fresh(),
                    loc,
                    StmtKind::Placeholder(PlaceholderNode {
                        name,
                        children: vec![child],
                    }),
                )
            }
        })
        .collect();
}

fn uniquify(base: String, used: &mut HashSet<String>) -> String {
    if used.insert(base.clone()) {
        return base;
    }
    let mut n = 1;
    loop {
        let candidate = format!("{base}_{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

/// Derive the stable placeholder name from the wrapped content.
fn placeholder_base_name(stmt: &StmtNode) -> String {
    match &stmt.kind {
        StmtKind::Print(n) => match &n.expr.kind {
            ExprKind::Var { name, .. } => upper_snake(name),
            ExprKind::Global { name } => {
                upper_snake(name.rsplit('.').next().unwrap_or(name))
            }
            _ => "XXX".to_string(),
        },
        StmtKind::HtmlOpenTag(n) => {
            let tag = tag_word(&n.tag_name);
            if n.self_closing {
                tag
            } else {
                format!("START_{tag}")
            }
        }
        StmtKind::HtmlCloseTag(n) => format!("END_{}", tag_word(&n.tag_name)),
        StmtKind::Call(_) => "XXX".to_string(),
        _ => "XXX".to_string(),
    }
}

/// Conventional words for common tags; everything else uses the tag
/// name itself.
fn tag_word(tag_name: &str) -> String {
    match tag_name.to_ascii_lowercase().as_str() {
        "a" => "LINK".to_string(),
        "b" => "BOLD".to_string(),
        "i" => "ITALIC".to_string(),
        "em" => "EMPHASIS".to_string(),
        "br" => "BREAK".to_string(),
        "p" => "PARAGRAPH".to_string(),
        other => other.to_ascii_uppercase().replace('-', "_"),
    }
}

fn upper_snake(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() && prev_lower {
            out.push('_');
        }
        prev_lower = c.is_ascii_lowercase() || c.is_ascii_digit();
        if c == '.' || c == '-' {
            out.push('_');
        } else {
            out.push(c.to_ascii_uppercase());
        }
    }
    out
}
