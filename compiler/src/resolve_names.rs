// resolve_names.rs — Name resolution.
//
// Assigns every variable reference to a declaration in an enclosing
// scope: a header declaration, a `{let}` binding, or a `{for}` loop
// variable. Scopes nest by command containment; a `let`/`for` binding
// shadows an outer binding of the same name within its subtree only.
// Partial call targets (`.foo`) are resolved through the file's
// namespace here; whether the target exists is a fileset-phase concern.
//
// Preconditions: parsed file with consistent parent links.
// Postconditions: every Var expression carries a VarDefn or an
//   "undefined variable" diagnostic was reported at its location.
// Failure modes: none; resolution continues past errors.

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

pub struct ResolveNamesPass;

impl FilePass for ResolveNamesPass {
    fn id(&self) -> PassId {
        PassId::ResolveNames
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        let namespace = file.namespace.clone();
        for template in &mut file.templates {
            let mut resolver = Resolver {
                template_fq: template.fq_name.clone(),
                namespace: &namespace,
                header: template.decls.iter().map(|d| d.name.clone()).collect(),
                scope: Vec::new(),
                sink,
            };
            resolver.resolve_block(&mut template.body);
        }
    }
}

struct Resolver<'a> {
    template_fq: String,
    namespace: &'a str,
    header: Vec<String>,
    /// Innermost binding last. Each entry is (name, definition).
    scope: Vec<(String, VarDefn)>,
    sink: &'a mut ErrorSink,
}

impl<'a> Resolver<'a> {
    fn resolve_block(&mut self, stmts: &mut [StmtNode]) {
        let mark = self.scope.len();
        for stmt in stmts {
            let own_id = stmt.base.id;

            // The statement's own expressions see the scope as it stands:
            // a `let` initializer cannot reference its own binding, a
            // `for` sequence cannot reference the loop variable.
            for expr in stmt.exprs_mut() {
                self.resolve_expr(expr);
            }

            if let StmtKind::Call(n) = &mut stmt.kind {
                if let CallTarget::Template { name, resolved } = &mut n.target {
                    if resolved.is_none() {
                        *resolved = Some(if let Some(rest) = name.strip_prefix('.') {
                            format!("{}.{}", self.namespace, rest)
                        } else {
                            name.clone()
                        });
                    }
                }
            }

            match &mut stmt.kind {
                StmtKind::For(n) => {
                    self.scope
                        .push((n.var.clone(), VarDefn::LoopVar { node: own_id }));
                    self.resolve_block(&mut n.body);
                    self.scope.pop();
                    if let Some(if_empty) = n.if_empty.as_mut() {
                        self.resolve_block(if_empty);
                    }
                }
                StmtKind::Let(n) => {
                    if let LetValue::Block { body, .. } = &mut n.value {
                        self.resolve_block(body);
                    }
                    // Visible to later siblings until the block ends.
                    self.scope
                        .push((n.var.clone(), VarDefn::Let { node: own_id }));
                }
                _ => {
                    for (_, block) in stmt.child_blocks_mut() {
                        self.resolve_block(block);
                    }
                }
            }
        }
        self.scope.truncate(mark);
    }

    fn resolve_expr(&mut self, expr: &mut ExprNode) {
        if let ExprKind::Var { name, defn } = &mut expr.kind {
            let found = self
                .scope
                .iter()
                .rev()
                .find(|(bound, _)| bound == name)
                .map(|(_, d)| d.clone())
                .or_else(|| {
                    self.header.iter().any(|h| h == name).then(|| VarDefn::Header {
                        template: self.template_fq.clone(),
                    })
                });
            match found {
                Some(d) => *defn = Some(d),
                None => {
                    self.sink.report(
                        Diagnostic::error(
                            expr.base.loc.clone(),
                            format!("undefined variable '${name}'"),
                        )
                        .with_code(codes::E0201)
                        .with_hint("declare it with @param or bind it with {let}"),
                    );
                }
            }
            return;
        }
        for child in expr.children_mut() {
            self.resolve_expr(child);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse_fileset, SourceFile};

    fn resolve(src: &str) -> (FileSetNode, ErrorSink) {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut fileset = parse_fileset(
            vec![SourceFile::new("test.tpl", src, FileKind::Src)],
            &mut ids,
            &mut sink,
        );
        assert!(!sink.has_errors(), "parse failed: {:#?}", sink.diagnostics());
        let mut pass = ResolveNamesPass;
        pass.run(&mut fileset.files[0], &mut ids, &mut sink);
        (fileset, sink)
    }

    fn collect_defns(fileset: &FileSetNode) -> Vec<(String, Option<VarDefn>)> {
        let mut out = Vec::new();
        for (_, template) in fileset.templates() {
            visit_exprs(&template.body, &mut |expr| {
                if let ExprKind::Var { name, defn } = &expr.kind {
                    out.push((name.clone(), defn.clone()));
                }
            });
        }
        out
    }

    #[test]
    fn header_param_resolves() {
        let (fileset, sink) = resolve(
            "{namespace ns}\n{template .foo}\n{@param name: string}\n{$name}{/template}\n",
        );
        assert!(!sink.has_errors());
        let defns = collect_defns(&fileset);
        assert_eq!(defns.len(), 1);
        assert!(
            matches!(&defns[0].1, Some(VarDefn::Header { template }) if template == "ns.foo")
        );
    }

    #[test]
    fn undefined_variable_reported_once_at_location() {
        let (_, sink) = resolve("{namespace ns}\n{template .foo}{$x}{/template}\n");
        assert_eq!(sink.error_count(), 1);
        let diag = &sink.diagnostics()[0];
        assert_eq!(diag.code, Some(codes::E0201));
        assert!(diag.message.contains("$x"));
        use chumsky::span::Span as _;
        // `{$x}` — the reference spans the `$x` inside the braces.
        assert_eq!(diag.loc.span.start(), 31);
        assert_eq!(diag.loc.span.end(), 33);
    }

    #[test]
    fn let_binding_visible_to_later_siblings() {
        let (fileset, sink) =
            resolve("{namespace ns}\n{template .foo}{let $a: 1 /}{$a}{/template}\n");
        assert!(!sink.has_errors());
        let defns = collect_defns(&fileset);
        assert!(matches!(&defns[0].1, Some(VarDefn::Let { .. })));
    }

    #[test]
    fn let_binding_not_visible_in_own_initializer() {
        let (_, sink) = resolve("{namespace ns}\n{template .foo}{let $a: $a /}{/template}\n");
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn let_binding_scoped_to_block() {
        let (_, sink) = resolve(
            "{namespace ns}\n{template .foo}{if true}{let $a: 1 /}{$a}{/if}{$a}{/template}\n",
        );
        // The use inside the {if} resolves; the one after does not.
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn loop_variable_shadows_param() {
        let (fileset, sink) = resolve(
            "{namespace ns}\n{template .foo}\n{@param x: list<int>}\n{for $x in $x}{$x}{/for}{/template}\n",
        );
        assert!(!sink.has_errors());
        let defns = collect_defns(&fileset);
        // Sequence `$x` resolves to the header, body `$x` to the loop.
        assert!(matches!(&defns[0].1, Some(VarDefn::Header { .. })));
        assert!(matches!(&defns[1].1, Some(VarDefn::LoopVar { .. })));
    }

    #[test]
    fn loop_variable_not_visible_in_ifempty() {
        let (_, sink) = resolve(
            "{namespace ns}\n{template .foo}{for $x in [1]}{$x}{ifempty}{$x}{/for}{/template}\n",
        );
        assert_eq!(sink.error_count(), 1);
    }

    #[test]
    fn partial_call_target_resolved_through_namespace() {
        let (fileset, sink) =
            resolve("{namespace ns}\n{template .foo}{call .bar /}{/template}\n");
        assert!(!sink.has_errors());
        let template = &fileset.files[0].templates[0];
        match &template.body[0].kind {
            StmtKind::Call(n) => match &n.target {
                CallTarget::Template { resolved, .. } => {
                    assert_eq!(resolved.as_deref(), Some("ns.bar"))
                }
                other => panic!("expected template target, got {:?}", other),
            },
            other => panic!("expected call, got {:?}", other),
        }
    }
}
