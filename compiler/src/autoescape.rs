// autoescape.rs — Contextual autoescaping.
//
// Rewrites every print directive chain in strict HTML templates to be
// context-appropriate: plain text gets escapeHtml, attribute values get
// escapeHtmlAttribute (URI and on* event attributes get their own
// escapers), dynamic attribute lists get filterHtmlAttributes. Prints
// that already carry an escaping directive (or an explicit
// noAutoescape) are left alone.
//
// Strict templates that call a contextual (legacy) template get a
// synthetic strict derivative of the callee: the callee is cloned with
// fresh node ids, escaped, registered through the registry's
// synthetic-template channel, and the call is retargeted. Dependent
// passes observe the new templates after reindex.
//
// Input invariants: HtmlRewrite has run; type resolution has run unless
// type checking is disabled. This is the one pass that consults the
// diagnostic sink: it declines entirely when any earlier pass reported
// an error, since escaping decisions on a broken tree are meaningless.

use std::collections::BTreeMap;

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FileSetPass, PassId, PassResult};
use crate::registry::{TemplateMeta, TemplateRegistry};

/// Directives that make a print context-safe (or explicitly opt out).
const ESCAPING_DIRECTIVES: &[&str] = &[
    "escapeHtml",
    "escapeHtmlAttribute",
    "escapeUri",
    "filterNormalizeUri",
    "escapeJsValue",
    "escapeJsString",
    "filterHtmlAttributes",
    "text",
    "noAutoescape",
];

const DERIVED_SUFFIX: &str = "__autoescaped";

pub struct AutoescapePass;

impl FileSetPass for AutoescapePass {
    fn id(&self) -> PassId {
        PassId::Autoescape
    }

    fn is_registry_producer(&self) -> bool {
        true
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        if sink.has_errors() {
            return PassResult::Continue;
        }

        // Contextual callees reached from strict templates need strict
        // derivatives.
        let mut derivations: BTreeMap<String, String> = BTreeMap::new();
        for file in fileset.files.iter().filter(|f| f.kind == FileKind::Src) {
            for template in &file.templates {
                if template.autoescape != AutoescapeMode::Strict {
                    continue;
                }
                visit_stmts(&template.body, &mut |stmt| {
                    if let StmtKind::Call(call) = &stmt.kind {
                        if let CallTarget::Template { resolved: Some(fq), .. } = &call.target {
                            if let Some(meta) = registry.basic(fq) {
                                if meta.autoescape == AutoescapeMode::Contextual
                                    && !meta.synthetic
                                {
                                    derivations
                                        .insert(fq.clone(), format!("{fq}{DERIVED_SUFFIX}"));
                                }
                            }
                        }
                    }
                });
            }
        }

        for (orig, derived) in &derivations {
            if registry.basic(derived).is_some() {
                // A user template occupying the derived name would make
                // the retarget ambiguous; leave the call contextual.
                continue;
            }
            let Some((file_idx, template_idx)) = find_template(fileset, orig) else {
                continue;
            };
            let mut clone = fileset.files[file_idx].templates[template_idx].clone();
            clone.fq_name = derived.clone();
            clone.autoescape = AutoescapeMode::Strict;
            clone.visibility = Visibility::Private;
            renumber_template(&mut clone, ids);
            escape_template(&mut clone);
            // Postcondition on our own subroutine: the derivative must
            // leave no print unescaped. Reaching a report here is a
            // pipeline bug, not a user error.
            let mut internal = ErrorSink::exploding();
            assert_escaped(&clone, &mut internal);

            let file = &mut fileset.files[file_idx];
            let meta =
                TemplateMeta::from_template(&file.path, file.kind, &file.namespace, &clone);
            file.templates.push(clone);
            assign_parents_file(file);
            registry.add_synthetic(meta);
        }
        registry.reindex();

        // Escape the strict templates themselves and retarget calls to
        // the derived implementations.
        for file in fileset
            .files
            .iter_mut()
            .filter(|f| f.kind == FileKind::Src)
        {
            for template in &mut file.templates {
                if template.autoescape != AutoescapeMode::Strict {
                    continue;
                }
                escape_template(template);
                visit_stmts_mut(&mut template.body, &mut |stmt| {
                    if let StmtKind::Call(call) = &mut stmt.kind {
                        if let CallTarget::Template { resolved: Some(fq), .. } = &mut call.target
                        {
                            if let Some(derived) = derivations.get(fq) {
                                *fq = derived.clone();
                            }
                        }
                    }
                });
            }
        }

        PassResult::Continue
    }
}

fn find_template(fileset: &FileSetNode, fq: &str) -> Option<(usize, usize)> {
    for (fi, file) in fileset.files.iter().enumerate() {
        for (ti, template) in file.templates.iter().enumerate() {
            if template.fq_name == fq {
                return Some((fi, ti));
            }
        }
    }
    None
}

// ── Escaper ─────────────────────────────────────────────────────────────────

#[derive(Clone)]
enum EscCtx {
    Text,
    AttrValue { attr_name: String },
}

fn escape_template(template: &mut TemplateNode) {
    if template.content_kind != ContentKind::Html {
        return;
    }
    escape_block(&mut template.body, &EscCtx::Text);
}

fn escape_block(stmts: &mut [StmtNode], ctx: &EscCtx) {
    for stmt in stmts {
        match &mut stmt.kind {
            StmtKind::Print(p) => {
                if !has_escaping_directive(p) {
                    let span = stmt.base.loc.span;
                    p.directives.push(PrintDirective {
                        name: directive_for(ctx).to_string(),
                        args: Vec::new(),
                        span,
                    });
                }
            }
            StmtKind::HtmlOpenTag(tag) => {
                for attr in &mut tag.attrs {
                    match &mut attr.kind {
                        StmtKind::HtmlAttribute(a) => {
                            let attr_name = a.name.clone();
                            if let Some(value) = a.value.as_mut() {
                                if let StmtKind::HtmlAttributeValue(v) = &mut value.kind {
                                    escape_block(
                                        &mut v.children,
                                        &EscCtx::AttrValue { attr_name },
                                    );
                                }
                            }
                        }
                        // Dynamic attribute content in tag position.
                        StmtKind::Print(p) => {
                            if !has_escaping_directive(p) {
                                let span = attr.base.loc.span;
                                p.directives.push(PrintDirective {
                                    name: "filterHtmlAttributes".to_string(),
                                    args: Vec::new(),
                                    span,
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
            StmtKind::Let(n) => {
                if let LetValue::Block { kind, body } = &mut n.value {
                    if *kind == ContentKind::Html {
                        escape_block(body, &EscCtx::Text);
                    }
                }
            }
            StmtKind::Call(n) => {
                for param in &mut n.params {
                    if let CallParamValue::Block { kind, body } = &mut param.value {
                        if *kind == ContentKind::Html {
                            escape_block(body, &EscCtx::Text);
                        }
                    }
                }
            }
            _ => {}
        }
        // Control-flow and message children stay in the current context.
        if matches!(
            stmt.kind,
            StmtKind::Msg(_)
                | StmtKind::If(_)
                | StmtKind::Switch(_)
                | StmtKind::For(_)
                | StmtKind::VeLog(_)
                | StmtKind::Placeholder(_)
        ) {
            for (_, block) in stmt.child_blocks_mut() {
                escape_block(block, ctx);
            }
        }
    }
}

fn has_escaping_directive(p: &PrintNode) -> bool {
    p.directives
        .iter()
        .any(|d| ESCAPING_DIRECTIVES.contains(&d.name.as_str()))
}

fn directive_for(ctx: &EscCtx) -> &'static str {
    match ctx {
        EscCtx::Text => "escapeHtml",
        EscCtx::AttrValue { attr_name } => {
            let name = attr_name.to_ascii_lowercase();
            if name.starts_with("on") {
                "escapeJsValue"
            } else if matches!(name.as_str(), "href" | "src" | "action" | "formaction") {
                "filterNormalizeUri"
            } else {
                "escapeHtmlAttribute"
            }
        }
    }
}

/// Escaper postcondition: every print in an HTML template carries an
/// escaping directive.
fn assert_escaped(template: &TemplateNode, sink: &mut ErrorSink) {
    if template.content_kind != ContentKind::Html {
        return;
    }
    visit_stmts(&template.body, &mut |stmt| {
        if let StmtKind::Print(p) = &stmt.kind {
            if !has_escaping_directive(p) {
                sink.report(
                    Diagnostic::error(
                        stmt.base.loc.clone(),
                        "print left unescaped by the autoescaper",
                    )
                    .with_code(codes::E0801),
                );
            }
        }
    });
}

// ── CheckContextualUsage ────────────────────────────────────────────────────

/// Post-escape contextual sanity: strict templates may not opt out with
/// noAutoescape, and calls to attributes-kind templates belong in tag
/// position.
pub struct CheckContextualUsagePass;

impl FileSetPass for CheckContextualUsagePass {
    fn id(&self) -> PassId {
        PassId::CheckContextualUsage
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        for file in fileset.files.iter().filter(|f| f.kind == FileKind::Src) {
            for template in &file.templates {
                if template.autoescape == AutoescapeMode::Strict {
                    visit_stmts(&template.body, &mut |stmt| {
                        if let StmtKind::Print(p) = &stmt.kind {
                            if p.directives.iter().any(|d| d.name == "noAutoescape") {
                                sink.report(
                                    Diagnostic::error(
                                        stmt.base.loc.clone(),
                                        "noAutoescape is not allowed in a strict template",
                                    )
                                    .with_code(codes::E0801),
                                );
                            }
                        }
                    });
                }
                if template.content_kind == ContentKind::Html {
                    check_attr_calls(&template.body, false, registry, sink);
                }
            }
        }
        PassResult::Continue
    }
}

fn check_attr_calls(
    stmts: &[StmtNode],
    in_tag: bool,
    registry: &TemplateRegistry,
    sink: &mut ErrorSink,
) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Call(call) => {
                if !in_tag {
                    if let CallTarget::Template { resolved: Some(fq), .. } = &call.target {
                        if let Some(meta) = registry.basic(fq) {
                            if meta.content_kind == ContentKind::Attributes {
                                sink.report(
                                    Diagnostic::error(
                                        stmt.base.loc.clone(),
                                        format!(
                                            "'{fq}' produces attributes and can only be called inside an HTML tag"
                                        ),
                                    )
                                    .with_code(codes::E0801),
                                );
                            }
                        }
                    }
                }
            }
            StmtKind::HtmlOpenTag(tag) => {
                check_attr_calls(&tag.attrs, true, registry, sink);
            }
            _ => {}
        }
        if !matches!(stmt.kind, StmtKind::HtmlOpenTag(_)) {
            for (_, block) in stmt_blocks_for_check(stmt) {
                check_attr_calls(block, in_tag, registry, sink);
            }
        }
    }
}

fn stmt_blocks_for_check(stmt: &StmtNode) -> Vec<((), &[StmtNode])> {
    let mut out: Vec<((), &[StmtNode])> = Vec::new();
    match &stmt.kind {
        StmtKind::Msg(n) => out.push(((), &n.children)),
        StmtKind::If(n) => {
            for b in &n.branches {
                out.push(((), &b.body));
            }
            if let Some(e) = &n.else_body {
                out.push(((), e));
            }
        }
        StmtKind::Switch(n) => {
            for c in &n.cases {
                out.push(((), &c.body));
            }
            if let Some(d) = &n.default {
                out.push(((), d));
            }
        }
        StmtKind::For(n) => {
            out.push(((), &n.body));
            if let Some(e) = &n.if_empty {
                out.push(((), e));
            }
        }
        StmtKind::Let(n) => {
            if let LetValue::Block { body, .. } = &n.value {
                out.push(((), body));
            }
        }
        StmtKind::Call(n) => {
            for p in &n.params {
                if let CallParamValue::Block { body, .. } = &p.value {
                    out.push(((), body));
                }
            }
        }
        StmtKind::VeLog(n) => out.push(((), &n.children)),
        StmtKind::Placeholder(n) => out.push(((), &n.children)),
        _ => {}
    }
    out
}

// ── AssertStrictAutoescaping ────────────────────────────────────────────────

pub struct AssertStrictAutoescapingPass;

impl FileSetPass for AssertStrictAutoescapingPass {
    fn id(&self) -> PassId {
        PassId::AssertStrictAutoescaping
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        _registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        for file in fileset.files.iter().filter(|f| f.kind == FileKind::Src) {
            for template in &file.templates {
                if template.autoescape != AutoescapeMode::Strict {
                    sink.report(
                        Diagnostic::error(
                            template.base.loc.clone(),
                            format!(
                                "template '{}' must use strict autoescaping",
                                template.fq_name
                            ),
                        )
                        .with_code(codes::E0800),
                    );
                }
            }
        }
        PassResult::Continue
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html_rewrite::HtmlRewritePass;
    use crate::parser::{parse_fileset, SourceFile};
    use crate::pass::FilePass;
    use crate::resolve_names::ResolveNamesPass;

    fn escaped(src: &str) -> (FileSetNode, TemplateRegistry, ErrorSink) {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut fileset = parse_fileset(
            vec![SourceFile::new("test.tpl", src, FileKind::Src)],
            &mut ids,
            &mut sink,
        );
        assert!(!sink.has_errors(), "parse failed: {:#?}", sink.diagnostics());
        ResolveNamesPass.run(&mut fileset.files[0], &mut ids, &mut sink);
        HtmlRewritePass.run(&mut fileset.files[0], &mut ids, &mut sink);
        let mut registry = TemplateRegistry::build(&fileset, &mut sink);
        registry.begin_producer_pass();
        AutoescapePass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        registry.end_producer_pass();
        (fileset, registry, sink)
    }

    fn print_directives(fileset: &FileSetNode, template_idx: usize) -> Vec<Vec<String>> {
        let mut out = Vec::new();
        visit_stmts(
            &fileset.files[0].templates[template_idx].body,
            &mut |stmt| {
                if let StmtKind::Print(p) = &stmt.kind {
                    out.push(p.directives.iter().map(|d| d.name.clone()).collect());
                }
            },
        );
        out
    }

    #[test]
    fn text_context_gets_escape_html() {
        let (fileset, _, sink) = escaped(
            "{namespace ns}\n{template .foo}\n{@param name: string}\n<b>{$name}</b>{/template}\n",
        );
        assert!(!sink.has_errors());
        assert_eq!(print_directives(&fileset, 0), vec![vec!["escapeHtml".to_string()]]);
    }

    #[test]
    fn uri_attribute_gets_uri_filter() {
        let (fileset, _, sink) = escaped(
            "{namespace ns}\n{template .foo}\n{@param url: uri}\n<a href=\"{$url}\">x</a>{/template}\n",
        );
        assert!(!sink.has_errors());
        assert_eq!(
            print_directives(&fileset, 0),
            vec![vec!["filterNormalizeUri".to_string()]]
        );
    }

    #[test]
    fn event_handler_attribute_gets_js_escaper() {
        let (fileset, _, _) = escaped(
            "{namespace ns}\n{template .foo}\n{@param js: string}\n<b onclick=\"{$js}\">x</b>{/template}\n",
        );
        assert_eq!(
            print_directives(&fileset, 0),
            vec![vec!["escapeJsValue".to_string()]]
        );
    }

    #[test]
    fn plain_attribute_gets_attribute_escaper() {
        let (fileset, _, _) = escaped(
            "{namespace ns}\n{template .foo}\n{@param c: string}\n<b class=\"{$c}\">x</b>{/template}\n",
        );
        assert_eq!(
            print_directives(&fileset, 0),
            vec![vec!["escapeHtmlAttribute".to_string()]]
        );
    }

    #[test]
    fn existing_escaping_directive_untouched() {
        let (fileset, _, _) = escaped(
            "{namespace ns}\n{template .foo}\n{@param name: string}\n{$name|escapeUri}{/template}\n",
        );
        assert_eq!(
            print_directives(&fileset, 0),
            vec![vec!["escapeUri".to_string()]]
        );
    }

    #[test]
    fn declines_when_errors_already_reported() {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut fileset = parse_fileset(
            vec![SourceFile::new(
                "test.tpl",
                "{namespace ns}\n{template .foo}{$x}{/template}\n",
                FileKind::Src,
            )],
            &mut ids,
            &mut sink,
        );
        ResolveNamesPass.run(&mut fileset.files[0], &mut ids, &mut sink);
        assert!(sink.has_errors());
        HtmlRewritePass.run(&mut fileset.files[0], &mut ids, &mut sink);
        let mut registry = TemplateRegistry::build(&fileset, &mut sink);
        registry.begin_producer_pass();
        AutoescapePass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        registry.end_producer_pass();
        // No escaping happened.
        assert_eq!(print_directives(&fileset, 0), vec![Vec::<String>::new()]);
    }

    #[test]
    fn contextual_callee_gets_strict_derivative() {
        let src = "{namespace ns}\n\
             {template .legacy autoescape=\"contextual\"}\n{@param v: string}\n{$v}{/template}\n\
             {template .foo}{call .legacy}{param v: 'x' /}{/call}{/template}\n";
        let (fileset, registry, sink) = escaped(src);
        assert!(!sink.has_errors());

        let derived = registry.basic("ns.legacy__autoescaped").expect("derived template");
        assert!(derived.synthetic);
        assert_eq!(derived.autoescape, AutoescapeMode::Strict);

        // The fileset contains the derived template, escaped.
        let derived_idx = fileset.files[0]
            .templates
            .iter()
            .position(|t| t.fq_name == "ns.legacy__autoescaped")
            .expect("derived in fileset");
        assert_eq!(
            print_directives(&fileset, derived_idx),
            vec![vec!["escapeHtml".to_string()]]
        );

        // The original legacy template is untouched.
        assert_eq!(print_directives(&fileset, 0), vec![Vec::<String>::new()]);

        // The strict caller was retargeted.
        let caller_idx = fileset.files[0]
            .templates
            .iter()
            .position(|t| t.fq_name == "ns.foo")
            .unwrap();
        let mut target = None;
        visit_stmts(&fileset.files[0].templates[caller_idx].body, &mut |stmt| {
            if let StmtKind::Call(c) = &stmt.kind {
                if let CallTarget::Template { resolved, .. } = &c.target {
                    target = resolved.clone();
                }
            }
        });
        assert_eq!(target.as_deref(), Some("ns.legacy__autoescaped"));
    }

    #[test]
    fn derived_ids_stay_unique() {
        let src = "{namespace ns}\n\
             {template .legacy autoescape=\"contextual\"}\n{@param v: string}\nx{$v}{/template}\n\
             {template .foo}{call .legacy /}{/template}\n";
        let (fileset, _, _) = escaped(src);
        let ids = crate::ast::collect_ids(&fileset);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(ids.len(), unique.len());
    }

    #[test]
    fn no_autoescape_in_strict_flagged_by_contextual_usage() {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut fileset = parse_fileset(
            vec![SourceFile::new(
                "test.tpl",
                "{namespace ns}\n{template .foo}\n{@param v: string}\n{$v|noAutoescape}{/template}\n",
                FileKind::Src,
            )],
            &mut ids,
            &mut sink,
        );
        ResolveNamesPass.run(&mut fileset.files[0], &mut ids, &mut sink);
        let mut registry = TemplateRegistry::build(&fileset, &mut sink);
        CheckContextualUsagePass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics()[0].code, Some(codes::E0801));
    }

    #[test]
    fn assert_strict_flags_contextual_template() {
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut fileset = parse_fileset(
            vec![SourceFile::new(
                "test.tpl",
                "{namespace ns}\n{template .foo autoescape=\"contextual\"}x{/template}\n",
                FileKind::Src,
            )],
            &mut ids,
            &mut sink,
        );
        let mut registry = TemplateRegistry::build(&fileset, &mut sink);
        AssertStrictAutoescapingPass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        assert_eq!(sink.error_count(), 1);
        assert_eq!(sink.diagnostics()[0].code, Some(codes::E0800));
    }
}
