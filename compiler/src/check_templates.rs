// check_templates.rs — Cross-template checks.
//
// Fileset-phase validation that needs the registry: delegate candidate
// uniqueness, visibility, call-site header compatibility, and strict
// dependency enforcement. Pure inspectors; diagnostics only.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FileSetPass, PassId, PassResult};
use crate::registry::{TemplateMeta, TemplateRegistry};
use crate::resolve_types::content_type;
use crate::types::TempoType;

// ── Call-site collection ────────────────────────────────────────────────────

struct CallSite<'a> {
    call: &'a CallNode,
    loc: SourceLocation,
    namespace: &'a str,
}

fn collect_calls(fileset: &FileSetNode) -> Vec<CallSite<'_>> {
    let mut sites = Vec::new();
    for file in fileset.files.iter().filter(|f| f.kind == FileKind::Src) {
        for template in &file.templates {
            visit_stmts(&template.body, &mut |stmt| {
                if let StmtKind::Call(call) = &stmt.kind {
                    sites.push(CallSite {
                        call,
                        loc: stmt.base.loc.clone(),
                        namespace: &file.namespace,
                    });
                }
            });
        }
    }
    sites
}

fn resolved_target<'a>(
    registry: &'a TemplateRegistry,
    call: &CallNode,
) -> Option<&'a TemplateMeta> {
    match &call.target {
        CallTarget::Template { resolved, name } => {
            let fq = resolved.as_deref().unwrap_or(name.as_str());
            registry.basic(fq)
        }
        CallTarget::Delegate { .. } => None,
    }
}

// ── CheckDelegates ──────────────────────────────────────────────────────────

pub struct CheckDelegatesPass;

impl FileSetPass for CheckDelegatesPass {
    fn id(&self) -> PassId {
        PassId::CheckDelegates
    }

    fn run(
        &mut self,
        _fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        let names: Vec<String> = registry.delegate_names().map(String::from).collect();
        for name in names {
            let candidates = registry.delegates(&name);
            // Within one (variant, priority, package) bucket there must
            // be at most one candidate.
            for i in 0..candidates.len() {
                for j in 0..i {
                    let (a, b) = (&candidates[j], &candidates[i]);
                    if delegate_key(a) == delegate_key(b) {
                        let (_, priority, _) = delegate_key(b);
                        sink.report(
                            Diagnostic::error(
                                b.loc.clone(),
                                format!(
                                    "duplicate delegate implementation of '{name}' at priority {priority}"
                                ),
                            )
                            .with_code(codes::E0401)
                            .with_related(a.loc.clone(), "first implementation here"),
                        );
                    }
                }
            }

            // Exactly one default per delegate group; candidates with
            // distinct variants form independent groups.
            let mut buckets: BTreeMap<Option<&str>, Vec<&TemplateMeta>> = BTreeMap::new();
            for meta in candidates {
                let (variant, _, _) = delegate_key(meta);
                buckets.entry(variant).or_default().push(meta);
            }
            for (variant, bucket) in buckets {
                let defaults: Vec<&TemplateMeta> = bucket
                    .iter()
                    .copied()
                    .filter(|m| m.is_default_delegate())
                    .collect();
                let group = match variant {
                    Some(v) => format!("delegate '{name}' variant '{v}'"),
                    None => format!("delegate '{name}'"),
                };
                if defaults.is_empty() {
                    sink.report(
                        Diagnostic::error(
                            bucket[0].loc.clone(),
                            format!("{group} has no default implementation"),
                        )
                        .with_code(codes::E0402)
                        .with_hint("declare one candidate without a package attribute"),
                    );
                    continue;
                }
                // Exact duplicates in the bucket were already reported
                // above; only distinct extra defaults count here.
                let mut priorities = BTreeSet::new();
                priorities.insert(delegate_key(defaults[0]).1);
                for meta in &defaults[1..] {
                    if !priorities.insert(delegate_key(meta).1) {
                        continue;
                    }
                    sink.report(
                        Diagnostic::error(
                            meta.loc.clone(),
                            format!("{group} has multiple default implementations"),
                        )
                        .with_code(codes::E0402)
                        .with_related(defaults[0].loc.clone(), "first default here"),
                    );
                }
            }
        }
        PassResult::Continue
    }
}

fn delegate_key(meta: &TemplateMeta) -> (Option<&str>, u32, Option<&str>) {
    match &meta.kind {
        TemplateKind::Delegate {
            variant,
            priority,
            package,
        } => (variant.as_deref(), *priority, package.as_deref()),
        _ => (None, 0, None),
    }
}

// ── CheckVisibility ─────────────────────────────────────────────────────────

pub struct CheckVisibilityPass;

impl FileSetPass for CheckVisibilityPass {
    fn id(&self) -> PassId {
        PassId::CheckVisibility
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        for site in collect_calls(fileset) {
            if let Some(meta) = resolved_target(registry, site.call) {
                if !registry.is_visible_from(meta, site.namespace) {
                    sink.report(
                        Diagnostic::error(
                            site.loc.clone(),
                            format!(
                                "template '{}' has private visibility and cannot be called from namespace '{}'",
                                meta.fq_name, site.namespace
                            ),
                        )
                        .with_code(codes::E0600)
                        .with_related(meta.loc.clone(), "declared here"),
                    );
                }
            }
        }
        PassResult::Continue
    }
}

// ── CheckCallSites ──────────────────────────────────────────────────────────

pub struct CheckCallSitesPass;

impl FileSetPass for CheckCallSitesPass {
    fn id(&self) -> PassId {
        PassId::CheckCallSites
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        for site in collect_calls(fileset) {
            let Some(meta) = resolved_target(registry, site.call) else {
                continue;
            };
            for param in &site.call.params {
                let Some(sig) = meta.params.iter().find(|p| p.name == param.name) else {
                    sink.report(
                        Diagnostic::error(
                            SourceLocation::from_span(&site.loc.file, param.name_span),
                            format!(
                                "template '{}' has no parameter '{}'",
                                meta.fq_name, param.name
                            ),
                        )
                        .with_code(codes::E0603),
                    );
                    continue;
                };
                let declared = TempoType::parse(&sig.type_text).unwrap_or(TempoType::Unknown);
                let given = match &param.value {
                    CallParamValue::Expr(e) => e.ty.clone(),
                    CallParamValue::Block { kind, .. } => content_type(*kind),
                };
                if !declared.is_assignable_from(&given) {
                    sink.report(
                        Diagnostic::error(
                            SourceLocation::from_span(&site.loc.file, param.name_span),
                            format!(
                                "parameter '{}' of '{}' expects {}, found {}",
                                param.name, meta.fq_name, declared, given
                            ),
                        )
                        .with_code(codes::E0604),
                    );
                }
            }
            for sig in meta.params.iter().filter(|p| p.required) {
                if !site.call.params.iter().any(|p| p.name == sig.name) {
                    sink.report(
                        Diagnostic::error(
                            site.loc.clone(),
                            format!(
                                "call to '{}' is missing required parameter '{}'",
                                meta.fq_name, sig.name
                            ),
                        )
                        .with_code(codes::E0602),
                    );
                }
            }
        }
        PassResult::Continue
    }
}

// ── CheckStrictDeps ─────────────────────────────────────────────────────────

pub struct CheckStrictDepsPass;

impl FileSetPass for CheckStrictDepsPass {
    fn id(&self) -> PassId {
        PassId::CheckStrictDeps
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        _ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult {
        for site in collect_calls(fileset) {
            match &site.call.target {
                CallTarget::Template { resolved, name } => {
                    let fq = resolved.as_deref().unwrap_or(name.as_str());
                    match registry.basic(fq) {
                        None => {
                            sink.report(
                                Diagnostic::error(
                                    site.loc.clone(),
                                    format!("call to unknown template '{fq}'"),
                                )
                                .with_code(codes::E0601),
                            );
                        }
                        Some(meta) if meta.file_kind == FileKind::IndirectDep => {
                            sink.report(
                                Diagnostic::error(
                                    site.loc.clone(),
                                    format!(
                                        "call to '{}' reaches through an indirect dependency",
                                        meta.fq_name
                                    ),
                                )
                                .with_code(codes::E0605)
                                .with_hint("declare the dependency directly"),
                            );
                        }
                        Some(_) => {}
                    }
                }
                // Delegates bind late; an empty candidate set is legal.
                CallTarget::Delegate { .. } => {}
            }
        }
        PassResult::Continue
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
