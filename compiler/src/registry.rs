// registry.rs — Template registry.
//
// An index over all templates in a fileset keyed by fully-qualified
// name, with delegate grouping and partial-name resolution. Built once
// after the single-file passes and frozen; the only mutation afterwards
// is the synthetic-template channel used by producer passes
// (`add_synthetic` + `reindex`), which is guarded by an explicit
// producer window. Iteration order is deterministic (sorted by name).

use std::collections::BTreeMap;

use serde_json::json;

use crate::ast::{
    AutoescapeMode, ContentKind, FileKind, FileSetNode, SourceLocation, TemplateKind,
    TemplateNode, Visibility,
};
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::NodeId;

// ── Metadata ────────────────────────────────────────────────────────────────

/// Signature of one header declaration, as recorded in the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSig {
    pub name: String,
    pub required: bool,
    pub type_text: String,
}

/// Registry record for one template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMeta {
    pub fq_name: String,
    pub file: String,
    pub file_kind: FileKind,
    pub namespace: String,
    pub kind: TemplateKind,
    pub visibility: Visibility,
    pub autoescape: AutoescapeMode,
    pub content_kind: ContentKind,
    pub params: Vec<ParamSig>,
    pub loc: SourceLocation,
    pub node_id: NodeId,
    pub synthetic: bool,
}

impl TemplateMeta {
    /// Whether this candidate is the default implementation of its
    /// delegate group (a delegate with no activation package).
    pub fn is_default_delegate(&self) -> bool {
        self.kind.is_default_delegate()
    }

    /// Build a record from a template node and its file context.
    pub fn from_template(
        file_path: &str,
        file_kind: FileKind,
        namespace: &str,
        template: &TemplateNode,
    ) -> Self {
        TemplateMeta {
            fq_name: template.fq_name.clone(),
            file: file_path.to_string(),
            file_kind,
            namespace: namespace.to_string(),
            kind: template.kind.clone(),
            visibility: template.visibility,
            autoescape: template.autoescape,
            content_kind: template.content_kind,
            params: template
                .decls
                .iter()
                .map(|d| ParamSig {
                    name: d.name.clone(),
                    required: d.required,
                    type_text: d.type_text.clone(),
                })
                .collect(),
            loc: template.base.loc.clone(),
            node_id: template.base.id,
            synthetic: false,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Template index for one fileset.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    /// Regular and element templates, keyed by fully-qualified name.
    templates: BTreeMap<String, TemplateMeta>,
    /// Delegate candidates in declaration order, keyed by delegate name.
    delegates: BTreeMap<String, Vec<TemplateMeta>>,
    /// Synthetic templates staged by a producer pass, merged on reindex.
    pending: Vec<TemplateMeta>,
    producer_window: bool,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the registry by walking every file of the fileset.
    /// Duplicate fully-qualified names are reported; the first occurrence
    /// wins (file order, then in-file order).
    pub fn build(fileset: &FileSetNode, sink: &mut ErrorSink) -> Self {
        let mut registry = TemplateRegistry::new();
        for file in &fileset.files {
            for template in &file.templates {
                let meta = TemplateMeta::from_template(
                    &file.path,
                    file.kind,
                    &file.namespace,
                    template,
                );
                registry.insert(meta, sink);
            }
        }
        registry
    }

    fn insert(&mut self, meta: TemplateMeta, sink: &mut ErrorSink) {
        if matches!(meta.kind, TemplateKind::Delegate { .. }) {
            self.delegates.entry(meta.fq_name.clone()).or_default().push(meta);
            return;
        }
        if let Some(first) = self.templates.get(&meta.fq_name) {
            sink.report(
                Diagnostic::error(
                    meta.loc.clone(),
                    format!("duplicate template '{}'", meta.fq_name),
                )
                .with_code(codes::E0400)
                .with_related(first.loc.clone(), "first defined here"),
            );
            return;
        }
        self.templates.insert(meta.fq_name.clone(), meta);
    }

    // ── Lookup ──────────────────────────────────────────────────────────────

    /// Lookup by fully-qualified name. At most one result.
    pub fn basic(&self, fq_name: &str) -> Option<&TemplateMeta> {
        self.templates.get(fq_name)
    }

    /// Resolve a partial name (`.foo`) through a file's namespace.
    pub fn resolve_partial(&self, namespace: &str, partial: &str) -> Option<&TemplateMeta> {
        if let Some(rest) = partial.strip_prefix('.') {
            self.templates.get(&format!("{namespace}.{rest}"))
        } else {
            self.templates.get(partial)
        }
    }

    /// Raw delegate candidate set for a delegate name, in declaration
    /// order, all variants.
    pub fn delegates(&self, del_name: &str) -> &[TemplateMeta] {
        self.delegates.get(del_name).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Candidates for a delegate name + variant, sorted by declared
    /// priority (highest first; declaration order breaks ties).
    pub fn delegate_candidates(
        &self,
        del_name: &str,
        variant: Option<&str>,
    ) -> Vec<&TemplateMeta> {
        let mut candidates: Vec<&TemplateMeta> = self
            .delegates(del_name)
            .iter()
            .filter(|meta| match &meta.kind {
                TemplateKind::Delegate { variant: v, .. } => v.as_deref() == variant,
                _ => false,
            })
            .collect();
        candidates.sort_by(|a, b| {
            let pa = delegate_priority(a);
            let pb = delegate_priority(b);
            pb.cmp(&pa)
        });
        candidates
    }

    /// All delegate group names, sorted.
    pub fn delegate_names(&self) -> impl Iterator<Item = &str> {
        self.delegates.keys().map(String::as_str)
    }

    /// All non-delegate templates, sorted by fully-qualified name.
    pub fn templates(&self) -> impl Iterator<Item = &TemplateMeta> {
        self.templates.values()
    }

    /// Whether a template in this registry may be called from `namespace`.
    pub fn is_visible_from(&self, meta: &TemplateMeta, namespace: &str) -> bool {
        match meta.visibility {
            Visibility::Public => true,
            Visibility::Private => meta.namespace == namespace,
        }
    }

    pub fn len(&self) -> usize {
        self.templates.len() + self.delegates.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ── Synthetic-template channel ──────────────────────────────────────────

    /// Open the mutation window around a producer pass. Called by the
    /// pass manager only.
    pub fn begin_producer_pass(&mut self) {
        self.producer_window = true;
    }

    /// Close the mutation window. Anything staged but not reindexed is a
    /// pipeline bug.
    pub fn end_producer_pass(&mut self) {
        assert!(
            self.pending.is_empty(),
            "internal: synthetic templates staged without reindex"
        );
        self.producer_window = false;
    }

    /// Stage a synthetic template. Permitted only inside a producer pass;
    /// violating that is a pipeline invariant failure, not a user error.
    pub fn add_synthetic(&mut self, mut meta: TemplateMeta) {
        assert!(
            self.producer_window,
            "internal: add_synthetic outside a producer pass"
        );
        meta.synthetic = true;
        self.pending.push(meta);
    }

    /// Merge staged synthetic templates into the index so that dependent
    /// passes observe them.
    pub fn reindex(&mut self) {
        assert!(
            self.producer_window,
            "internal: reindex outside a producer pass"
        );
        for meta in std::mem::take(&mut self.pending) {
            if matches!(meta.kind, TemplateKind::Delegate { .. }) {
                self.delegates.entry(meta.fq_name.clone()).or_default().push(meta);
            } else {
                assert!(
                    !self.templates.contains_key(&meta.fq_name),
                    "internal: synthetic template collides with '{}'",
                    meta.fq_name
                );
                self.templates.insert(meta.fq_name.clone(), meta);
            }
        }
    }

    // ── Serialization ───────────────────────────────────────────────────────

    /// Canonical compact JSON of the registry contents. Stable across
    /// runs (sorted maps, no whitespace); input to the registry
    /// fingerprint.
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(&self.to_value()).expect("registry serialization cannot fail")
    }

    /// Pretty JSON manifest for external tooling.
    pub fn manifest_json(&self) -> String {
        let mut out = serde_json::to_string_pretty(&self.to_value())
            .expect("registry serialization cannot fail");
        out.push('\n');
        out
    }

    fn to_value(&self) -> serde_json::Value {
        let templates: serde_json::Value = self
            .templates
            .values()
            .map(meta_value)
            .collect::<Vec<_>>()
            .into();
        let delegates: serde_json::Value = self
            .delegates
            .iter()
            .map(|(name, candidates)| {
                json!({
                    "name": name,
                    "candidates": candidates.iter().map(meta_value).collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>()
            .into();
        json!({
            "manifest_schema_version": 1,
            "templates": templates,
            "delegates": delegates,
        })
    }
}

fn delegate_priority(meta: &TemplateMeta) -> u32 {
    match &meta.kind {
        TemplateKind::Delegate { priority, .. } => *priority,
        _ => 0,
    }
}

fn meta_value(meta: &TemplateMeta) -> serde_json::Value {
    let (kind, variant, priority, package, default) = match &meta.kind {
        TemplateKind::Regular => ("template", None, None, None, None),
        TemplateKind::Element => ("element", None, None, None, None),
        TemplateKind::Delegate {
            variant,
            priority,
            package,
        } => (
            "deltemplate",
            variant.clone(),
            Some(*priority),
            package.clone(),
            Some(package.is_none()),
        ),
    };
    json!({
        "name": meta.fq_name,
        "file": meta.file,
        "kind": kind,
        "variant": variant,
        "priority": priority,
        "package": package,
        "default": default,
        "visibility": match meta.visibility {
            Visibility::Public => "public",
            Visibility::Private => "private",
        },
        "content_kind": meta.content_kind.as_str(),
        "params": meta.params.iter().map(|p| json!({
            "name": p.name,
            "required": p.required,
            "type": p.type_text,
        })).collect::<Vec<_>>(),
        "synthetic": meta.synthetic,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────
