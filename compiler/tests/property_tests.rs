// Property-based tests for pipeline invariants.
//
// Three categories:
// 1. Determinism: the same fileset and configuration produce
//    structurally equal trees and identical diagnostic lists
// 2. Pure-rewrite idempotence: optimize, desugar, and combine-raw-text
//    applied twice equal applied once
// 3. Tree invariants: unique node ids and consistent parent links at
//    every observable point
//
// Uses proptest with explicit configuration to prevent CI flakiness.

use proptest::prelude::*;

use ttc::ast::{self, FileKind, FileSetNode};
use ttc::combine_text::CombineRawTextPass;
use ttc::desugar_html::DesugarHtmlPass;
use ttc::diag::{Diagnostic, ErrorSink};
use ttc::id::IdGenerator;
use ttc::optimize::OptimizePass;
use ttc::parser::{parse_fileset, SourceFile};
use ttc::pass::FileSetPass;
use ttc::pipeline::PassManager;
use ttc::registry::TemplateRegistry;
use ttc::types::TempoType;

// ── Template source generator ───────────────────────────────────────────────

/// Generate a small valid template body using only declared params.
fn arb_body_element() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z ]{1,10}".prop_map(|t| t),
        Just("{$p0}".to_string()),
        Just("{$p1}".to_string()),
        Just("<b>bold</b>".to_string()),
        Just("{if $p0 > 3}big{else}small{/if}".to_string()),
        Just("{if true}always{/if}".to_string()),
        Just("{for $x in $items}{$x}{/for}".to_string()),
        Just("{msg desc=\"m\"}Hi {$p1}{/msg}".to_string()),
        Just("{let $tmp: $p0 + 1 /}{$tmp}".to_string()),
        Just("{switch $p0}{case 1}one{default}many{/switch}".to_string()),
    ]
}

fn arb_template_source() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_body_element(), 1..5).prop_map(|elements| {
        let mut src = String::from(
            "{namespace ns}\n{template .t}\n{@param p0: int}\n{@param p1: string}\n{@param items: list<string>}\n",
        );
        for element in &elements {
            src.push_str(element);
        }
        src.push_str("{/template}\n");
        src
    })
}

fn compile(src: &str) -> (FileSetNode, TemplateRegistry, Vec<Diagnostic>) {
    let mut ids = IdGenerator::new();
    let mut sink = ErrorSink::new();
    let mut fileset = parse_fileset(
        vec![SourceFile::new("gen.tpl", src, FileKind::Src)],
        &mut ids,
        &mut sink,
    );
    let mut manager = PassManager::builder().build().expect("manager construction");
    let registry = manager.run(&mut fileset, &mut ids, &mut sink);
    (fileset, registry, sink.into_diagnostics())
}

// ── 1. Determinism ──────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 200,
        .. ProptestConfig::default()
    })]

    #[test]
    fn pipeline_is_deterministic(src in arb_template_source()) {
        let (fileset_a, registry_a, diags_a) = compile(&src);
        let (fileset_b, registry_b, diags_b) = compile(&src);
        prop_assert_eq!(&fileset_a, &fileset_b, "trees diverge for:\n{}", src);
        prop_assert_eq!(&diags_a, &diags_b, "diagnostics diverge for:\n{}", src);
        prop_assert_eq!(
            registry_a.canonical_json(),
            registry_b.canonical_json(),
            "registries diverge for:\n{}",
            src
        );
    }

    // ── 2. Idempotence of pure rewrites ─────────────────────────────────────

    #[test]
    fn pure_rewrites_are_idempotent(src in arb_template_source()) {
        let (mut fileset, _, _) = compile(&src);
        let mut ids = IdGenerator::new();
        let mut sink = ErrorSink::new();
        let mut registry = TemplateRegistry::new();

        let once = fileset.clone();
        OptimizePass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        prop_assert_eq!(&fileset, &once, "optimize not idempotent for:\n{}", src);

        DesugarHtmlPass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        prop_assert_eq!(&fileset, &once, "desugar not idempotent for:\n{}", src);

        CombineRawTextPass.run(&mut fileset, &mut ids, &mut registry, &mut sink);
        prop_assert_eq!(&fileset, &once, "combine not idempotent for:\n{}", src);
    }

    // ── 3. Tree invariants ──────────────────────────────────────────────────

    #[test]
    fn ids_unique_and_parents_consistent(src in arb_template_source()) {
        let (fileset, _, _) = compile(&src);
        let ids = ast::collect_ids(&fileset);
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        prop_assert_eq!(ids.len(), unique.len(), "duplicate ids for:\n{}", src);
        let mismatches = ast::parent_mismatches(&fileset);
        prop_assert!(
            mismatches.is_empty(),
            "parent mismatches {:?} for:\n{}",
            mismatches,
            src
        );
    }

    #[test]
    fn generated_sources_compile_clean(src in arb_template_source()) {
        let (_, registry, diags) = compile(&src);
        prop_assert!(diags.is_empty(), "diagnostics for:\n{}\n{:#?}", src, diags);
        prop_assert_eq!(registry.len(), 1);
    }
}

// ── Type lattice laws (exhaustive) ──────────────────────────────────────────

#[test]
fn assignability_is_reflexive_and_common_commutes() {
    let all_types = [
        TempoType::Unknown,
        TempoType::Any,
        TempoType::Null,
        TempoType::Bool,
        TempoType::Int,
        TempoType::Float,
        TempoType::String,
        TempoType::Html,
        TempoType::Attributes,
        TempoType::Uri,
        TempoType::Js,
        TempoType::Css,
        TempoType::List(Box::new(TempoType::Int)),
        TempoType::List(Box::new(TempoType::String)),
    ];

    for a in &all_types {
        assert!(a.is_assignable_from(a), "{a} not assignable from itself");
    }
    for a in &all_types {
        for b in &all_types {
            assert_eq!(
                TempoType::common(a, b),
                TempoType::common(b, a),
                "common({a}, {b}) not commutative"
            );
        }
    }
}
