// dump.rs — Stable line-oriented AST dump.
//
// Used by `--emit ast`, snapshot tests, and debugging. The format is
// part of the test surface: node ids and byte offsets are deliberately
// omitted so dumps compare structurally across runs and stay readable.

use std::fmt::Write as _;

use crate::ast::*;

pub fn dump_fileset(fileset: &FileSetNode) -> String {
    let mut out = String::new();
    for file in &fileset.files {
        let kind = match file.kind {
            FileKind::Src => "src",
            FileKind::Dep => "dep",
            FileKind::IndirectDep => "indirect_dep",
        };
        let _ = writeln!(out, "FILE {} kind={} namespace={}", file.path, kind, file.namespace);
        for template in &file.templates {
            dump_template(template, 1, &mut out);
        }
    }
    out
}

pub fn dump_template(template: &TemplateNode, depth: usize, out: &mut String) {
    let kind = match &template.kind {
        TemplateKind::Regular => "template".to_string(),
        TemplateKind::Element => "element".to_string(),
        TemplateKind::Delegate {
            variant,
            priority,
            package,
        } => {
            let mut s = "deltemplate".to_string();
            if let Some(v) = variant {
                let _ = write!(s, " variant={v}");
            }
            let _ = write!(s, " priority={priority}");
            match package {
                Some(p) => {
                    let _ = write!(s, " package={p}");
                }
                None => s.push_str(" default"),
            }
            s
        }
    };
    let visibility = match template.visibility {
        Visibility::Public => "public",
        Visibility::Private => "private",
    };
    let autoescape = match template.autoescape {
        AutoescapeMode::Strict => "strict",
        AutoescapeMode::Contextual => "contextual",
    };
    indent(depth, out);
    let _ = writeln!(
        out,
        "TEMPLATE {} [{kind}] visibility={visibility} autoescape={autoescape} kind={}",
        template.fq_name,
        template.content_kind.as_str(),
    );
    for decl in &template.decls {
        indent(depth + 1, out);
        let kind = match decl.kind {
            DeclKind::Param => "@param",
            DeclKind::Prop => "@prop",
        };
        let optional = if decl.required { "" } else { "?" };
        let _ = writeln!(out, "{kind}{optional} {}: {}", decl.name, decl.type_text);
    }
    dump_block(&template.body, depth + 1, out);
}

fn dump_block(stmts: &[StmtNode], depth: usize, out: &mut String) {
    for stmt in stmts {
        dump_stmt(stmt, depth, out);
    }
}

fn dump_stmt(stmt: &StmtNode, depth: usize, out: &mut String) {
    indent(depth, out);
    match &stmt.kind {
        StmtKind::RawText(text) => {
            let _ = writeln!(out, "RAW_TEXT {:?}", text);
        }
        StmtKind::Print(n) => {
            let mut line = format!("PRINT {}", render_expr(&n.expr));
            for d in &n.directives {
                line.push('|');
                line.push_str(&d.name);
                if !d.args.is_empty() {
                    line.push(':');
                    line.push_str(
                        &d.args.iter().map(render_expr).collect::<Vec<_>>().join(","),
                    );
                }
            }
            let _ = writeln!(out, "{line}");
        }
        StmtKind::Msg(n) => {
            let _ = writeln!(out, "MSG desc={:?}", n.desc);
            dump_block(&n.children, depth + 1, out);
        }
        StmtKind::If(n) => {
            let _ = writeln!(out, "IF");
            for branch in &n.branches {
                indent(depth + 1, out);
                let _ = writeln!(out, "BRANCH {}", render_expr(&branch.cond));
                dump_block(&branch.body, depth + 2, out);
            }
            if let Some(else_body) = &n.else_body {
                indent(depth + 1, out);
                let _ = writeln!(out, "ELSE");
                dump_block(else_body, depth + 2, out);
            }
        }
        StmtKind::Switch(n) => {
            let _ = writeln!(out, "SWITCH {}", render_expr(&n.scrutinee));
            for case in &n.cases {
                indent(depth + 1, out);
                let _ = writeln!(
                    out,
                    "CASE {}",
                    case.exprs.iter().map(render_expr).collect::<Vec<_>>().join(", ")
                );
                dump_block(&case.body, depth + 2, out);
            }
            if let Some(default) = &n.default {
                indent(depth + 1, out);
                let _ = writeln!(out, "DEFAULT");
                dump_block(default, depth + 2, out);
            }
        }
        StmtKind::For(n) => {
            let _ = writeln!(out, "FOR ${} in {}", n.var, render_expr(&n.seq));
            dump_block(&n.body, depth + 1, out);
            if let Some(if_empty) = &n.if_empty {
                indent(depth + 1, out);
                let _ = writeln!(out, "IFEMPTY");
                dump_block(if_empty, depth + 2, out);
            }
        }
        StmtKind::Let(n) => match &n.value {
            LetValue::Expr(e) => {
                let _ = writeln!(out, "LET ${} = {}", n.var, render_expr(e));
            }
            LetValue::Block { kind, body } => {
                let _ = writeln!(out, "LET ${} kind={}", n.var, kind.as_str());
                dump_block(body, depth + 1, out);
            }
        },
        StmtKind::Call(n) => {
            match &n.target {
                CallTarget::Template { name, resolved } => {
                    let shown = resolved.as_deref().unwrap_or(name.as_str());
                    let _ = writeln!(out, "CALL {shown}");
                }
                CallTarget::Delegate { name, variant } => match variant {
                    Some(v) => {
                        let _ = writeln!(out, "DELCALL {name} variant={v}");
                    }
                    None => {
                        let _ = writeln!(out, "DELCALL {name}");
                    }
                },
            }
            for param in &n.params {
                indent(depth + 1, out);
                match &param.value {
                    CallParamValue::Expr(e) => {
                        let _ = writeln!(out, "PARAM {} = {}", param.name, render_expr(e));
                    }
                    CallParamValue::Block { kind, body } => {
                        let _ = writeln!(out, "PARAM {} kind={}", param.name, kind.as_str());
                        dump_block(body, depth + 2, out);
                    }
                }
            }
        }
        StmtKind::VeLog(n) => {
            let _ = writeln!(out, "VELOG {}", n.name);
            dump_block(&n.children, depth + 1, out);
        }
        StmtKind::HtmlOpenTag(n) => {
            let close = if n.self_closing { " self-closing" } else { "" };
            let _ = writeln!(out, "HTML_OPEN <{}>{close}", n.tag_name);
            dump_block(&n.attrs, depth + 1, out);
        }
        StmtKind::HtmlCloseTag(n) => {
            let _ = writeln!(out, "HTML_CLOSE </{}>", n.tag_name);
        }
        StmtKind::HtmlAttribute(n) => {
            let _ = writeln!(out, "HTML_ATTR {}", n.name);
            if let Some(value) = n.value.as_deref() {
                dump_stmt(value, depth + 1, out);
            }
        }
        StmtKind::HtmlAttributeValue(n) => {
            let _ = writeln!(out, "HTML_ATTR_VALUE");
            dump_block(&n.children, depth + 1, out);
        }
        StmtKind::Placeholder(n) => {
            let _ = writeln!(out, "PLACEHOLDER {}", n.name);
            dump_block(&n.children, depth + 1, out);
        }
    }
}

fn indent(depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

/// Render an expression on one line, fully parenthesized for nesting.
pub fn render_expr(expr: &ExprNode) -> String {
    match &expr.kind {
        ExprKind::Null => "null".to_string(),
        ExprKind::Bool(b) => b.to_string(),
        ExprKind::Int(n) => n.to_string(),
        ExprKind::Float(x) => format!("{x:?}"),
        ExprKind::Str(s) => format!("'{s}'"),
        ExprKind::List(items) => format!(
            "[{}]",
            items.iter().map(render_expr).collect::<Vec<_>>().join(", ")
        ),
        ExprKind::Var { name, .. } => format!("${name}"),
        ExprKind::Global { name } => name.clone(),
        ExprKind::Not(inner) => format!("not {}", render_expr(inner)),
        ExprKind::Neg(inner) => format!("-{}", render_expr(inner)),
        ExprKind::Binary { op, lhs, rhs } => format!(
            "({} {} {})",
            render_expr(lhs),
            op.as_str(),
            render_expr(rhs)
        ),
        ExprKind::Conditional {
            cond,
            then,
            otherwise,
        } => format!(
            "({} ? {} : {})",
            render_expr(cond),
            render_expr(then),
            render_expr(otherwise)
        ),
        ExprKind::Call { name, args } => format!(
            "{name}({})",
            args.iter().map(render_expr).collect::<Vec<_>>().join(", ")
        ),
        ExprKind::V1Expression(text) => format!("v1Expression('{text}')"),
    }
}
