// ttc — Tempo Template Compiler
//
// Library root. The front end (lexer, parser) produces the AST; the
// pass pipeline (pipeline module) validates, rewrites, and simplifies
// it; backends consume the finalized fileset and template registry.

pub mod ast;
pub mod autoescape;
pub mod check_templates;
pub mod combine_text;
pub mod compat;
pub mod conformance;
pub mod debug_attrs;
pub mod desugar_html;
pub mod diag;
pub mod dump;
pub mod headers;
pub mod html_rewrite;
pub mod id;
pub mod lexer;
pub mod logging;
pub mod msg_placeholder;
pub mod optimize;
pub mod parser;
pub mod pass;
pub mod pipeline;
pub mod registry;
pub mod resolve_names;
pub mod resolve_types;
pub mod rewrite_globals;
pub mod types;
