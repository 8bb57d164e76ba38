// conformance.rs — Policy conformance checking.
//
// Reads a pre-validated policy (JSON payload from configuration) and
// emits a diagnostic for each violation. Pure inspector, no mutations.
// Rules match on AST shapes: banned raw text, banned HTML attributes,
// banned functions, banned print directives.

use serde::Deserialize;

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FilePass, PassId};

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct ConformanceConfig {
    pub rules: Vec<ConformanceRule>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConformanceRule {
    pub error_message: String,
    #[serde(flatten)]
    pub kind: ConformanceRuleKind,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConformanceRuleKind {
    BannedRawText { texts: Vec<String> },
    BannedHtmlAttribute { attributes: Vec<String> },
    BannedFunction { functions: Vec<String> },
    BannedPrintDirective { directives: Vec<String> },
}

impl ConformanceConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

pub struct ConformancePass {
    config: ConformanceConfig,
}

impl ConformancePass {
    pub fn new(config: ConformanceConfig) -> Self {
        Self { config }
    }
}

impl FilePass for ConformancePass {
    fn id(&self) -> PassId {
        PassId::Conformance
    }

    fn run(&mut self, file: &mut FileNode, _ids: &mut IdGenerator, sink: &mut ErrorSink) {
        for template in &file.templates {
            for rule in &self.config.rules {
                check_rule(rule, &template.body, sink);
            }
        }
    }
}

fn check_rule(rule: &ConformanceRule, body: &[StmtNode], sink: &mut ErrorSink) {
    let mut violation = |loc: &SourceLocation| {
        sink.report(
            Diagnostic::error(loc.clone(), rule.error_message.clone()).with_code(codes::E0700),
        );
    };
    match &rule.kind {
        ConformanceRuleKind::BannedRawText { texts } => {
            visit_stmts(body, &mut |stmt| {
                if let StmtKind::RawText(t) = &stmt.kind {
                    if texts.iter().any(|banned| t.contains(banned)) {
                        violation(&stmt.base.loc);
                    }
                }
            });
        }
        ConformanceRuleKind::BannedHtmlAttribute { attributes } => {
            visit_stmts(body, &mut |stmt| {
                if let StmtKind::HtmlAttribute(a) = &stmt.kind {
                    if attributes.iter().any(|b| b.eq_ignore_ascii_case(&a.name)) {
                        violation(&stmt.base.loc);
                    }
                }
            });
        }
        ConformanceRuleKind::BannedFunction { functions } => {
            visit_exprs(body, &mut |expr| {
                if let ExprKind::Call { name, .. } = &expr.kind {
                    if functions.iter().any(|b| b == name) {
                        violation(&expr.base.loc);
                    }
                }
            });
        }
        ConformanceRuleKind::BannedPrintDirective { directives } => {
            visit_stmts(body, &mut |stmt| {
                if let StmtKind::Print(p) = &stmt.kind {
                    for d in &p.directives {
                        if directives.iter().any(|b| b == &d.name) {
                            violation(&stmt.base.loc);
                        }
                    }
                }
            });
        }
    }
}
