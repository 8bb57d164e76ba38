// pipeline.rs — Pass manager: assembly, continuation, and execution.
//
// Assembles the ordered pipeline from configuration, normalizes
// continuation rules at construction time, runs the two phases, and
// surfaces the template registry.
//
// Phase 1 applies the file-local passes to each source file (dependency
// files are registry-only). Phase 2 builds the registry once, then runs
// the fileset passes in order. A STOP_BEFORE rule marks the pipeline
// stopped and skips the named pass and everything after it; if that
// happens in phase 1, phase 2 is skipped entirely but a registry built
// from whatever was parsed is still returned. Passes never abort the
// pipeline on diagnostics; only STOP signals end it early.
//
// Preconditions: the fileset comes from the parser with consistent
//   parent links and a shared id generator.
// Postconditions: the returned registry indexes every template,
//   including synthetics added by producer passes.
// Failure modes: construction fails on a rule naming a pass that is not
//   in the assembled pipeline.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::time::Instant;

use crate::ast::{FileKind, FileSetNode};
use crate::autoescape::{AssertStrictAutoescapingPass, AutoescapePass, CheckContextualUsagePass};
use crate::check_templates::{
    CheckCallSitesPass, CheckDelegatesPass, CheckStrictDepsPass, CheckVisibilityPass,
};
use crate::combine_text::CombineRawTextPass;
use crate::compat::CheckV1ExpressionsPass;
use crate::conformance::{ConformanceConfig, ConformancePass};
use crate::debug_attrs::AddDebugAttributesPass;
use crate::desugar_html::DesugarHtmlPass;
use crate::diag::ErrorSink;
use crate::headers::ResolveHeadersPass;
use crate::html_rewrite::{HtmlRewritePass, ValidateStrictHtmlPass};
use crate::id::IdGenerator;
use crate::logging::{LoggingConfig, ValidateLoggingPass};
use crate::msg_placeholder::InsertMsgPlaceholdersPass;
use crate::optimize::OptimizePass;
use crate::parser::SourceFile;
use crate::pass::{FilePass, FileSetPass, PassContinuationRule, PassId, PassResult};
use crate::registry::TemplateRegistry;
use crate::resolve_names::ResolveNamesPass;
use crate::resolve_types::ResolveExpressionTypesPass;
use crate::rewrite_globals::{CheckGlobalsPass, GlobalValue, RewriteGlobalsPass};

/// Experimental feature flag selecting the per-block strict-HTML
/// matcher.
pub const EXPERIMENT_NEW_HTML_MATCHER: &str = "new_html_matcher";

// ── Options ─────────────────────────────────────────────────────────────────

/// Recognized pipeline options. Each one gates which passes are
/// assembled; see the builder for the mapping.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub disable_all_type_checking: bool,
    pub allow_unknown_globals: bool,
    pub allow_v1_expression: bool,
    pub desugar_html_nodes: bool,
    pub optimize: bool,
    pub autoescaper_enabled: bool,
    pub add_html_attributes_for_debugging: bool,
    pub strict_autoescaping_required: bool,
    pub allow_external_calls: bool,
    pub experimental_features: BTreeSet<String>,
    pub verbose: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            disable_all_type_checking: false,
            allow_unknown_globals: false,
            allow_v1_expression: false,
            desugar_html_nodes: true,
            optimize: true,
            autoescaper_enabled: true,
            add_html_attributes_for_debugging: true,
            strict_autoescaping_required: false,
            allow_external_calls: true,
            experimental_features: BTreeSet::new(),
            verbose: false,
        }
    }
}

// ── Build error ─────────────────────────────────────────────────────────────

/// Pass manager construction failed.
#[derive(Debug, PartialEq, Eq)]
pub enum PipelineBuildError {
    /// A continuation rule names a pass that is not in the assembled
    /// pipeline (possibly because an option disabled it).
    RuleForUnknownPass { pass: PassId },
}

impl fmt::Display for PipelineBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineBuildError::RuleForUnknownPass { pass } => write!(
                f,
                "continuation rule names pass '{}' which is not in the assembled pipeline",
                pass.name()
            ),
        }
    }
}

impl std::error::Error for PipelineBuildError {}

// ── Builder ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PassManagerBuilder {
    options: PipelineOptions,
    globals: HashMap<String, GlobalValue>,
    conformance_config: Option<ConformanceConfig>,
    logging_config: Option<LoggingConfig>,
    rules: Vec<(PassId, PassContinuationRule)>,
}

impl PassManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn define_global(mut self, name: impl Into<String>, value: GlobalValue) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn conformance_config(mut self, config: ConformanceConfig) -> Self {
        self.conformance_config = Some(config);
        self
    }

    pub fn logging_config(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    /// Register a continuation rule for a pass. CONTINUE rules are
    /// dropped at build time; STOP_AFTER_PASS is normalized to
    /// STOP_BEFORE_PASS on the next pass in the assembled list.
    pub fn add_continuation_rule(mut self, pass: PassId, rule: PassContinuationRule) -> Self {
        self.rules.push((pass, rule));
        self
    }

    pub fn build(self) -> Result<PassManager, PipelineBuildError> {
        let options = self.options;

        let mut file_passes: Vec<Box<dyn FilePass>> = Vec::new();
        file_passes.push(Box::new(RewriteGlobalsPass::new(self.globals)));
        file_passes.push(Box::new(CheckV1ExpressionsPass {
            allow: options.allow_v1_expression,
        }));
        file_passes.push(Box::new(ResolveHeadersPass {
            parse_types: !options.disable_all_type_checking,
        }));
        file_passes.push(Box::new(ResolveNamesPass));
        file_passes.push(Box::new(HtmlRewritePass));
        file_passes.push(Box::new(ValidateStrictHtmlPass {
            new_matcher: options
                .experimental_features
                .contains(EXPERIMENT_NEW_HTML_MATCHER),
        }));
        file_passes.push(Box::new(InsertMsgPlaceholdersPass));
        if !options.disable_all_type_checking {
            file_passes.push(Box::new(ResolveExpressionTypesPass));
        }
        if !options.allow_unknown_globals {
            file_passes.push(Box::new(CheckGlobalsPass));
        }
        if let Some(config) = self.conformance_config {
            file_passes.push(Box::new(ConformancePass::new(config)));
        }
        if options.add_html_attributes_for_debugging {
            file_passes.push(Box::new(AddDebugAttributesPass));
        }

        let mut fileset_passes: Vec<Box<dyn FileSetPass>> = Vec::new();
        fileset_passes.push(Box::new(CheckDelegatesPass));
        fileset_passes.push(Box::new(CheckVisibilityPass));
        if !options.disable_all_type_checking {
            fileset_passes.push(Box::new(CheckCallSitesPass));
        }
        if !options.allow_external_calls {
            fileset_passes.push(Box::new(CheckStrictDepsPass));
        }
        if let Some(config) = self.logging_config {
            if !options.disable_all_type_checking {
                fileset_passes.push(Box::new(ValidateLoggingPass::new(config)));
            }
        }
        if options.autoescaper_enabled {
            fileset_passes.push(Box::new(AutoescapePass));
            if !options.disable_all_type_checking {
                fileset_passes.push(Box::new(CheckContextualUsagePass));
            }
        }
        if options.strict_autoescaping_required {
            fileset_passes.push(Box::new(AssertStrictAutoescapingPass));
        }
        if options.optimize {
            fileset_passes.push(Box::new(OptimizePass));
        }
        if options.desugar_html_nodes {
            fileset_passes.push(Box::new(DesugarHtmlPass));
        }
        fileset_passes.push(Box::new(CombineRawTextPass));

        // Normalize continuation rules against the assembled list.
        let assembled: Vec<PassId> = file_passes
            .iter()
            .map(|p| p.id())
            .chain(fileset_passes.iter().map(|p| p.id()))
            .collect();
        let mut stop_before: HashSet<PassId> = HashSet::new();
        for (pass, rule) in self.rules {
            match rule {
                PassContinuationRule::Continue => {}
                PassContinuationRule::StopBeforePass => {
                    if !assembled.contains(&pass) {
                        return Err(PipelineBuildError::RuleForUnknownPass { pass });
                    }
                    stop_before.insert(pass);
                }
                PassContinuationRule::StopAfterPass => {
                    let Some(idx) = assembled.iter().position(|p| *p == pass) else {
                        return Err(PipelineBuildError::RuleForUnknownPass { pass });
                    };
                    // Stopping after the final pass is a no-op.
                    if let Some(next) = assembled.get(idx + 1) {
                        stop_before.insert(*next);
                    }
                }
            }
        }

        Ok(PassManager {
            file_passes,
            fileset_passes,
            stop_before,
            verbose: options.verbose,
        })
    }
}

// ── Manager ─────────────────────────────────────────────────────────────────

pub struct PassManager {
    file_passes: Vec<Box<dyn FilePass>>,
    fileset_passes: Vec<Box<dyn FileSetPass>>,
    /// Normalized continuation rules: passes to stop in front of.
    stop_before: HashSet<PassId>,
    verbose: bool,
}

impl std::fmt::Debug for PassManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassManager")
            .field("file_passes", &self.file_passes.len())
            .field("fileset_passes", &self.fileset_passes.len())
            .field("stop_before", &self.stop_before)
            .field("verbose", &self.verbose)
            .finish()
    }
}

impl PassManager {
    pub fn builder() -> PassManagerBuilder {
        PassManagerBuilder::new()
    }

    /// Pass ids in execution order, after options gating.
    pub fn pass_ids(&self) -> Vec<PassId> {
        self.file_passes
            .iter()
            .map(|p| p.id())
            .chain(self.fileset_passes.iter().map(|p| p.id()))
            .collect()
    }

    /// Run both phases over the fileset. The registry is returned even
    /// when a continuation rule stopped the pipeline early, so callers
    /// can still introspect parse-level results.
    pub fn run(
        &mut self,
        fileset: &mut FileSetNode,
        ids: &mut IdGenerator,
        sink: &mut ErrorSink,
    ) -> TemplateRegistry {
        let mut stopped = false;

        for file in fileset
            .files
            .iter_mut()
            .filter(|f| f.kind == FileKind::Src)
        {
            for pass in &mut self.file_passes {
                if self.stop_before.contains(&pass.id()) {
                    stopped = true;
                    break;
                }
                let start = Instant::now();
                pass.run(file, ids, sink);
                if self.verbose {
                    eprintln!(
                        "ttc: {} complete, {:.1}ms",
                        pass.id().name(),
                        start.elapsed().as_secs_f64() * 1000.0
                    );
                }
            }
        }

        let mut registry = TemplateRegistry::build(fileset, sink);
        if stopped {
            return registry;
        }

        for pass in &mut self.fileset_passes {
            if self.stop_before.contains(&pass.id()) {
                break;
            }
            let producer = pass.is_registry_producer();
            if producer {
                registry.begin_producer_pass();
            }
            let start = Instant::now();
            let result = pass.run(fileset, ids, &mut registry, sink);
            if producer {
                registry.end_producer_pass();
            }
            if self.verbose {
                eprintln!(
                    "ttc: {} complete, {:.1}ms",
                    pass.id().name(),
                    start.elapsed().as_secs_f64() * 1000.0
                );
            }
            if result == PassResult::Stop {
                break;
            }
        }

        registry
    }
}

// ── Provenance ──────────────────────────────────────────────────────────────

/// Provenance metadata for hermetic builds.
///
/// `sources_hash`: SHA-256 over every input path and text.
/// `registry_fingerprint`: SHA-256 of `TemplateRegistry::canonical_json()`.
#[derive(Debug, Clone)]
pub struct Provenance {
    pub sources_hash: [u8; 32],
    pub registry_fingerprint: [u8; 32],
    pub compiler_version: &'static str,
}

impl Provenance {
    pub fn sources_hash_hex(&self) -> String {
        bytes_to_hex(&self.sources_hash)
    }

    pub fn registry_fingerprint_hex(&self) -> String {
        bytes_to_hex(&self.registry_fingerprint)
    }

    /// Serialize as JSON for `--emit build-info`.
    pub fn to_json(&self) -> String {
        format!(
            "{{\n  \"sources_hash\": \"{}\",\n  \"registry_fingerprint\": \"{}\",\n  \"compiler_version\": \"{}\"\n}}\n",
            self.sources_hash_hex(),
            self.registry_fingerprint_hex(),
            self.compiler_version,
        )
    }
}

fn bytes_to_hex(bytes: &[u8; 32]) -> String {
    let mut s = String::with_capacity(64);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(s, "{:02x}", b);
    }
    s
}

/// Compute provenance from the input sources and the final registry.
/// Paths participate in the hash so renaming a file changes it.
pub fn compute_provenance(sources: &[SourceFile], registry: &TemplateRegistry) -> Provenance {
    use sha2::{Digest, Sha256};

    let sources_hash = {
        let mut hasher = Sha256::new();
        for source in sources {
            hasher.update(source.path.as_bytes());
            hasher.update([0u8]);
            hasher.update(source.text.as_bytes());
            hasher.update([0u8]);
        }
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    let registry_fingerprint = {
        let mut hasher = Sha256::new();
        hasher.update(registry.canonical_json().as_bytes());
        let result = hasher.finalize();
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&result);
        hash
    };

    Provenance {
        sources_hash,
        registry_fingerprint,
        compiler_version: env!("CARGO_PKG_VERSION"),
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_fileset;

    fn compile(
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

    fn one(src: &str) -> Vec<SourceFile> {
        vec![SourceFile::new("test.tpl", src, FileKind::Src)]
    }

    #[test]
    fn default_pipeline_order_is_stable() {
        let manager = PassManager::builder().build().unwrap();
        let ids = manager.pass_ids();
        let again = PassManager::builder().build().unwrap().pass_ids();
        assert_eq!(ids, again);
        assert_eq!(*ids.first().unwrap(), PassId::RewriteGlobals);
        assert_eq!(*ids.last().unwrap(), PassId::CombineRawText);
    }

    #[test]
    fn options_gate_passes() {
        let mut options = PipelineOptions::default();
        options.disable_all_type_checking = true;
        options.optimize = false;
        options.autoescaper_enabled = false;
        options.desugar_html_nodes = false;
        let manager = PassManager::builder().options(options).build().unwrap();
        let ids = manager.pass_ids();
        assert!(!ids.contains(&PassId::ResolveExpressionTypes));
        assert!(!ids.contains(&PassId::CheckCallSites));
        assert!(!ids.contains(&PassId::Optimize));
        assert!(!ids.contains(&PassId::Autoescape));
        assert!(!ids.contains(&PassId::CheckContextualUsage));
        assert!(!ids.contains(&PassId::DesugarHtml));
        assert!(ids.contains(&PassId::CombineRawText));
    }

    #[test]
    fn rule_for_missing_pass_fails_construction() {
        let mut options = PipelineOptions::default();
        options.optimize = false;
        let err = PassManager::builder()
            .options(options)
            .add_continuation_rule(PassId::Optimize, PassContinuationRule::StopBeforePass)
            .build()
            .unwrap_err();
        assert_eq!(
            err,
            PipelineBuildError::RuleForUnknownPass {
                pass: PassId::Optimize
            }
        );
    }

    #[test]
    fn continue_rule_is_a_no_op() {
        let (_, _, sink) = compile(
            one("{namespace ns}\n{template .foo}hi{/template}\n"),
            PassManager::builder()
                .add_continuation_rule(PassId::ResolveNames, PassContinuationRule::Continue),
        );
        assert!(!sink.has_errors());
    }

    #[test]
    fn stop_after_last_pass_is_a_no_op() {
        let (_, registry, sink) = compile(
            one("{namespace ns}\n{template .foo}hi{/template}\n"),
            PassManager::builder()
                .add_continuation_rule(PassId::CombineRawText, PassContinuationRule::StopAfterPass),
        );
        assert!(!sink.has_errors());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stop_in_phase_one_still_returns_registry() {
        let (_, registry, _) = compile(
            one("{namespace ns}\n{template .foo}hi{/template}\n"),
            PassManager::builder()
                .add_continuation_rule(PassId::ResolveNames, PassContinuationRule::StopBeforePass),
        );
        assert!(registry.basic("ns.foo").is_some());
    }

    #[test]
    fn simple_template_compiles_clean() {
        let (fileset, registry, sink) = compile(
            one("{namespace ns}\n{template .foo}{if true}hi{/if}{/template}\n"),
            PassManager::builder(),
        );
        assert!(!sink.has_errors(), "{:#?}", sink.diagnostics());
        assert!(registry.basic("ns.foo").is_some());
        assert!(crate::ast::parent_mismatches(&fileset).is_empty());
    }

    #[test]
    fn dep_files_are_not_rewritten() {
        let sources = vec![
            SourceFile::new(
                "a.tpl",
                "{namespace a}\n{template .foo}{if true}hi{/if}{/template}\n",
                FileKind::Src,
            ),
            SourceFile::new(
                "b.tpl",
                "{namespace b}\n{template .bar}{if true}hi{/if}{/template}\n",
                FileKind::Dep,
            ),
        ];
        let (fileset, registry, sink) = compile(sources, PassManager::builder());
        assert!(!sink.has_errors());
        // The source file was optimized down to raw text; the dep file
        // still carries its {if}.
        assert!(matches!(
            &fileset.files[0].templates[0].body[0].kind,
            crate::ast::StmtKind::RawText(t) if t == "hi"
        ));
        assert!(fileset.files[1].templates[0]
            .body
            .iter()
            .any(|s| matches!(s.kind, crate::ast::StmtKind::If(_))));
        // Both are in the registry.
        assert!(registry.basic("a.foo").is_some());
        assert!(registry.basic("b.bar").is_some());
    }

    #[test]
    fn provenance_is_deterministic() {
        let sources = one("{namespace ns}\n{template .foo}hi{/template}\n");
        let (_, registry, _) = compile(sources.clone(), PassManager::builder());
        let first = compute_provenance(&sources, &registry);
        let second = compute_provenance(&sources, &registry);
        assert_eq!(first.sources_hash, second.sources_hash);
        assert_eq!(first.registry_fingerprint, second.registry_fingerprint);
        let other_sources = one("{namespace ns}\n{template .foo}bye{/template}\n");
        let third = compute_provenance(&other_sources, &registry);
        assert_ne!(first.sources_hash, third.sources_hash);
    }
}
