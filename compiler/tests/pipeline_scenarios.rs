// End-to-end pipeline scenarios: literal template sources through the
// default pipeline, checking registry contents, tree shape, and the
// exact diagnostics surfaced to the caller.

use ttc::ast::{FileKind, FileSetNode, StmtKind};
use ttc::diag::{codes, ErrorSink};
use ttc::id::IdGenerator;
use ttc::parser::{parse_fileset, SourceFile};
use ttc::pass::{PassContinuationRule, PassId};
use ttc::pipeline::{PassManager, PassManagerBuilder};
use ttc::registry::TemplateRegistry;
use ttc::types::TempoType;

fn compile_with(
    sources: Vec<SourceFile>,
    builder: PassManagerBuilder,
) -> (FileSetNode, TemplateRegistry, ErrorSink) {
    let mut ids = IdGenerator::new();
    let mut sink = ErrorSink::new();
    let mut fileset = parse_fileset(sources, &mut ids, &mut sink);
    let mut manager = builder.build().expect("manager construction");
    let registry = manager.run(&mut fileset, &mut ids, &mut sink);
    (fileset, registry, sink)
}

fn compile(src: &str) -> (FileSetNode, TemplateRegistry, ErrorSink) {
    compile_with(
        vec![SourceFile::new("test.tpl", src, FileKind::Src)],
        PassManager::builder(),
    )
}

/// Scenario 1: constant-true conditional collapses to its body.
#[test]
fn constant_if_folds_to_single_raw_text() {
    let (fileset, registry, sink) =
        compile("{namespace ns}\n{template .foo}{if true}hi{/if}{/template}\n");

    assert_eq!(sink.diagnostics().len(), 0, "{:#?}", sink.diagnostics());
    assert!(registry.basic("ns.foo").is_some());

    let body = &fileset.files[0].templates[0].body;
    assert_eq!(body.len(), 1);
    assert!(matches!(&body[0].kind, StmtKind::RawText(t) if t == "hi"));
}

/// Scenario 2: an undefined variable produces exactly one diagnostic,
/// the reference types as unknown, and later passes stay quiet.
#[test]
fn undefined_variable_single_diagnostic_no_cascade() {
    let (fileset, _, sink) =
        compile("{namespace ns}\n{template .foo}{$x + 1}{/template}\n");

    assert_eq!(sink.diagnostics().len(), 1, "{:#?}", sink.diagnostics());
    let diag = &sink.diagnostics()[0];
    assert_eq!(diag.code, Some(codes::E0201));
    assert!(diag.message.contains("$x"));
    assert_eq!(diag.loc.file, "test.tpl");

    // ResolveExpressionTypes still ran and degraded to unknown.
    let mut var_ty = None;
    for (_, template) in fileset.templates() {
        ttc::ast::visit_exprs(&template.body, &mut |expr| {
            if matches!(&expr.kind, ttc::ast::ExprKind::Var { name, .. } if name == "x") {
                var_ty = Some(expr.ty.clone());
            }
        });
    }
    assert_eq!(var_ty, Some(TempoType::Unknown));
}

/// Scenario 3: STOP_AFTER ResolveNames skips everything downstream.
#[test]
fn stop_after_resolve_names_skips_later_passes() {
    let (_, _, sink) = compile_with(
        vec![SourceFile::new(
            "test.tpl",
            "{namespace ns}\n{template .foo}{$x}{/template}\n",
            FileKind::Src,
        )],
        PassManager::builder()
            .add_continuation_rule(PassId::ResolveNames, PassContinuationRule::StopAfterPass),
    );
    // Exactly the ResolveNames diagnostic; nothing from
    // ResolveExpressionTypes or later passes.
    assert_eq!(sink.diagnostics().len(), 1);
    assert_eq!(sink.diagnostics()[0].code, Some(codes::E0201));
}

/// Scenario 4: duplicate fully-qualified names; first wins, second is
/// reported.
#[test]
fn duplicate_template_reported_on_second_occurrence() {
    let (_, registry, sink) = compile(
        "{namespace ns}\n{template .foo}first{/template}\n{template .foo}second{/template}\n",
    );
    assert_eq!(sink.error_count(), 1);
    let diag = &sink.diagnostics()[0];
    assert_eq!(diag.code, Some(codes::E0400));

    // The second occurrence carries the diagnostic.
    use chumsky::span::Span as _;
    let second_offset = "{namespace ns}\n{template .foo}first{/template}\n".len();
    assert_eq!(diag.loc.span.start(), second_offset);

    // The registry holds the first.
    let meta = registry.basic("ns.foo").unwrap();
    assert_eq!(meta.loc.span.start(), "{namespace ns}\n".len());
}

/// Scenario 5: an element declaring both `{@param s}` and `{@prop s}`;
/// the diagnostic lands on the @param declaration's name.
#[test]
fn duplicate_param_prop_declaration() {
    let (_, _, sink) = compile(
        "{namespace ns}\n{element .btn}\n{@param s: bool}\n{@prop s: bool}\nx{/element}\n",
    );
    assert_eq!(sink.diagnostics().len(), 1, "{:#?}", sink.diagnostics());
    let diag = &sink.diagnostics()[0];
    assert_eq!(diag.code, Some(codes::E0200));
    use chumsky::span::Span as _;
    let param_name_offset = "{namespace ns}\n{element .btn}\n{@param ".len();
    assert_eq!(diag.loc.span.start(), param_name_offset);
}

/// Scenario 6: message placeholders survive the whole pipeline with a
/// stable name; the text prefix ends up as one raw-text node.
#[test]
fn msg_placeholder_stable_through_pipeline() {
    let (fileset, _, sink) = compile(
        "{namespace ns}\n{template .foo}\n{@param name: string}\n{msg desc=\"greeting\"}Hello {$name}{/msg}{/template}\n",
    );
    assert_eq!(sink.diagnostics().len(), 0, "{:#?}", sink.diagnostics());

    let template = &fileset.files[0].templates[0];
    let msg = template
        .body
        .iter()
        .find_map(|s| match &s.kind {
            StmtKind::Msg(m) => Some(m),
            _ => None,
        })
        .expect("msg survived the pipeline");

    assert_eq!(msg.children.len(), 2);
    assert!(matches!(&msg.children[0].kind, StmtKind::RawText(t) if t == "Hello "));
    match &msg.children[1].kind {
        StmtKind::Placeholder(p) => {
            assert_eq!(p.name, "NAME");
            match &p.children[0].kind {
                StmtKind::Print(print) => {
                    // The autoescaper rewrote the chain inside the
                    // placeholder without disturbing its identity.
                    assert_eq!(print.directives.len(), 1);
                    assert_eq!(print.directives[0].name, "escapeHtml");
                }
                other => panic!("expected print inside placeholder, got {:?}", other),
            }
        }
        other => panic!("expected placeholder, got {:?}", other),
    }
}

/// The full pipeline leaves parents consistent and ids unique on a
/// fileset exercising most node kinds.
#[test]
fn pipeline_invariants_on_mixed_fileset() {
    let src = "{namespace ns}\n\
         {template .page}\n\
         {@param title: string}\n\
         {@param items: list<string>}\n\
         <div class=\"page\"><h1>{$title}</h1>\n\
         {for $item in $items}<p>{$item}</p>{ifempty}none{/for}\n\
         {call .footer}{param year: 2024 /}{/call}</div>{/template}\n\
         {template .footer}\n\
         {@param year: int}\n\
         <span>{$year}</span>{/template}\n";
    let (fileset, registry, sink) = compile(src);
    assert_eq!(sink.error_count(), 0, "{:#?}", sink.diagnostics());
    assert_eq!(registry.len(), 2);

    assert!(ttc::ast::parent_mismatches(&fileset).is_empty());
    let ids = ttc::ast::collect_ids(&fileset);
    let unique: std::collections::HashSet<_> = ids.iter().collect();
    assert_eq!(ids.len(), unique.len());
}

/// Calls across files resolve and check compatibly.
#[test]
fn cross_file_calls_check_out() {
    let sources = vec![
        SourceFile::new(
            "main.tpl",
            "{namespace app}\n{template .main}{call widgets.button}{param label: 'go' /}{/call}{/template}\n",
            FileKind::Src,
        ),
        SourceFile::new(
            "widgets.tpl",
            "{namespace widgets}\n{template .button}\n{@param label: string}\n<b>{$label}</b>{/template}\n",
            FileKind::Src,
        ),
    ];
    let (_, registry, sink) = compile_with(sources, PassManager::builder());
    assert_eq!(sink.error_count(), 0, "{:#?}", sink.diagnostics());
    assert!(registry.basic("app.main").is_some());
    assert!(registry.basic("widgets.button").is_some());
}
