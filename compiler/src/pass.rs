// pass.rs — Pass identity, descriptors, and the uniform pass traits.
//
// Declares every pass the manager can assemble, split into the two
// phases: file-local passes run per source file, fileset passes run once
// per build with the template registry. Continuation rules are keyed by
// PassId; names are derived from the declared identity (the variant
// name), never from source location.

use crate::ast::{FileNode, FileSetNode};
use crate::diag::ErrorSink;
use crate::id::IdGenerator;
use crate::registry::TemplateRegistry;

// ── Pass identifiers ────────────────────────────────────────────────────────

/// Identifies each compiler pass (parse is outside the manager).
/// Declaration order is the canonical full-pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassId {
    // File passes (phase 1)
    RewriteGlobals,
    CheckV1Expressions,
    ResolveHeaders,
    ResolveNames,
    HtmlRewrite,
    ValidateStrictHtml,
    InsertMsgPlaceholders,
    ResolveExpressionTypes,
    CheckGlobals,
    Conformance,
    AddDebugAttributes,
    // Fileset passes (phase 2)
    CheckDelegates,
    CheckVisibility,
    CheckCallSites,
    CheckStrictDeps,
    ValidateLogging,
    Autoescape,
    CheckContextualUsage,
    AssertStrictAutoescaping,
    Optimize,
    DesugarHtml,
    CombineRawText,
}

/// All pass ids in canonical order.
pub const ALL_PASSES: [PassId; 22] = [
    PassId::RewriteGlobals,
    PassId::CheckV1Expressions,
    PassId::ResolveHeaders,
    PassId::ResolveNames,
    PassId::HtmlRewrite,
    PassId::ValidateStrictHtml,
    PassId::InsertMsgPlaceholders,
    PassId::ResolveExpressionTypes,
    PassId::CheckGlobals,
    PassId::Conformance,
    PassId::AddDebugAttributes,
    PassId::CheckDelegates,
    PassId::CheckVisibility,
    PassId::CheckCallSites,
    PassId::CheckStrictDeps,
    PassId::ValidateLogging,
    PassId::Autoescape,
    PassId::CheckContextualUsage,
    PassId::AssertStrictAutoescaping,
    PassId::Optimize,
    PassId::DesugarHtml,
    PassId::CombineRawText,
];

/// Which phase a pass runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassPhase {
    File,
    FileSet,
}

impl PassId {
    /// Stable short identifier used by continuation rules and the CLI.
    pub fn name(self) -> &'static str {
        match self {
            PassId::RewriteGlobals => "RewriteGlobals",
            PassId::CheckV1Expressions => "CheckV1Expressions",
            PassId::ResolveHeaders => "ResolveHeaders",
            PassId::ResolveNames => "ResolveNames",
            PassId::HtmlRewrite => "HtmlRewrite",
            PassId::ValidateStrictHtml => "ValidateStrictHtml",
            PassId::InsertMsgPlaceholders => "InsertMsgPlaceholders",
            PassId::ResolveExpressionTypes => "ResolveExpressionTypes",
            PassId::CheckGlobals => "CheckGlobals",
            PassId::Conformance => "Conformance",
            PassId::AddDebugAttributes => "AddDebugAttributes",
            PassId::CheckDelegates => "CheckDelegates",
            PassId::CheckVisibility => "CheckVisibility",
            PassId::CheckCallSites => "CheckCallSites",
            PassId::CheckStrictDeps => "CheckStrictDeps",
            PassId::ValidateLogging => "ValidateLogging",
            PassId::Autoescape => "Autoescape",
            PassId::CheckContextualUsage => "CheckContextualUsage",
            PassId::AssertStrictAutoescaping => "AssertStrictAutoescaping",
            PassId::Optimize => "Optimize",
            PassId::DesugarHtml => "DesugarHtml",
            PassId::CombineRawText => "CombineRawText",
        }
    }

    /// Inverse of `name`, for the CLI continuation-rule surface.
    pub fn from_name(name: &str) -> Option<PassId> {
        ALL_PASSES.iter().copied().find(|p| p.name() == name)
    }

    pub fn phase(self) -> PassPhase {
        match self {
            PassId::RewriteGlobals
            | PassId::CheckV1Expressions
            | PassId::ResolveHeaders
            | PassId::ResolveNames
            | PassId::HtmlRewrite
            | PassId::ValidateStrictHtml
            | PassId::InsertMsgPlaceholders
            | PassId::ResolveExpressionTypes
            | PassId::CheckGlobals
            | PassId::Conformance
            | PassId::AddDebugAttributes => PassPhase::File,
            _ => PassPhase::FileSet,
        }
    }
}

// ── Continuation rules ──────────────────────────────────────────────────────

/// A configured continuation rule for one pass. CONTINUE is the default
/// and is dropped at manager construction; STOP_AFTER_PASS is normalized
/// into STOP_BEFORE_PASS on the successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassContinuationRule {
    Continue,
    StopBeforePass,
    StopAfterPass,
}

// ── Pass traits ─────────────────────────────────────────────────────────────

/// Outcome of a fileset pass: keep going, or terminate the pipeline
/// after the current pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassResult {
    Continue,
    Stop,
}

/// A pass over one source file. File passes share no state between
/// invocations; the id generator and sink are the only collaborators.
pub trait FilePass {
    fn id(&self) -> PassId;
    fn run(&mut self, file: &mut FileNode, ids: &mut IdGenerator, sink: &mut ErrorSink);
}

/// A pass over the whole fileset, with the template registry available.
pub trait FileSetPass {
    fn id(&self) -> PassId;

    /// Whether this pass may add synthetic templates to the registry.
    /// The manager opens the registry's producer window around it.
    fn is_registry_producer(&self) -> bool {
        false
    }

    fn run(
        &mut self,
        fileset: &mut FileSetNode,
        ids: &mut IdGenerator,
        registry: &mut TemplateRegistry,
        sink: &mut ErrorSink,
    ) -> PassResult;
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for pass in ALL_PASSES {
            assert_eq!(PassId::from_name(pass.name()), Some(pass));
        }
        assert_eq!(PassId::from_name("NoSuchPass"), None);
    }

    #[test]
    fn file_passes_precede_fileset_passes() {
        let first_fileset = ALL_PASSES
            .iter()
            .position(|p| p.phase() == PassPhase::FileSet)
            .unwrap();
        for (i, pass) in ALL_PASSES.iter().enumerate() {
            if i < first_fileset {
                assert_eq!(pass.phase(), PassPhase::File, "{:?}", pass);
            } else {
                assert_eq!(pass.phase(), PassPhase::FileSet, "{:?}", pass);
            }
        }
    }

    #[test]
    fn combine_raw_text_is_last() {
        assert_eq!(*ALL_PASSES.last().unwrap(), PassId::CombineRawText);
    }
}
