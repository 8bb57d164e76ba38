// logging.rs — Visual-element logging validation.
//
// `{velog Name}` annotates a subtree with a logging element. The
// configuration payload lists the known element names; validation
// rejects references to anything else. Skipped entirely when type
// checking is disabled.

use std::collections::BTreeSet;

use serde::Deserialize;

use crate::ast::*;
use crate::diag::{codes, Diagnostic, ErrorSink};
use crate::id::IdGenerator;
use crate::pass::{FileSetPass, PassId, PassResult};
use crate::registry::TemplateRegistry;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub elements: BTreeSet<String>,
}

impl LoggingConfig {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

pub struct ValidateLoggingPass {
    config: LoggingConfig,
}

impl ValidateLoggingPass {
    pub fn new(config: LoggingConfig) -> Self {
        Self { config }
    }
}

impl FileSetPass for ValidateLoggingPass {
    fn id(&self) -> PassId {
        PassId::ValidateLogging
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
                visit_stmts(&template.body, &mut |stmt| {
                    if let StmtKind::VeLog(n) = &stmt.kind {
                        if !self.config.elements.contains(&n.name) {
                            sink.report(
                                Diagnostic::error(
                                    SourceLocation::from_span(&file.path, n.name_span),
                                    format!("unknown logging element '{}'", n.name),
                                )
                                .with_code(codes::E0701),
                            );
                        }
                    }
                });
            }
        }
        PassResult::Continue
    }
}
