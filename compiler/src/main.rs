// ttc — CLI driver.
//
// Thin shell over the library: read sources, run the pass pipeline,
// print diagnostics, emit the requested output. All compilation
// behavior lives in the library; this file only wires configuration.

use clap::Parser;
use std::collections::BTreeSet;
use std::path::PathBuf;

use ttc::ast::FileKind;
use ttc::conformance::ConformanceConfig;
use ttc::diag::{DiagLevel, ErrorSink};
use ttc::dump::dump_fileset;
use ttc::id::IdGenerator;
use ttc::logging::LoggingConfig;
use ttc::parser::{parse_fileset, SourceFile};
use ttc::pass::{PassContinuationRule, PassId};
use ttc::pipeline::{compute_provenance, PassManager, PipelineOptions};
use ttc::rewrite_globals::GlobalValue;

const EXIT_OK: i32 = 0;
const EXIT_COMPILE_ERROR: i32 = 1;
const EXIT_USAGE_ERROR: i32 = 2;
const EXIT_SYSTEM_ERROR: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum EmitStage {
    /// Run the pipeline and print diagnostics only.
    Diagnostics,
    /// Dump the finalized AST.
    Ast,
    /// Serialize the template registry.
    Manifest,
    /// Print source and registry hashes.
    BuildInfo,
}

#[derive(Parser, Debug)]
#[command(
    name = "ttc",
    version,
    about = "Tempo Template Compiler — compiles .tpl server-side HTML template files"
)]
struct Cli {
    /// Input .tpl source files
    #[arg(required = true)]
    sources: Vec<PathBuf>,

    /// Dependency files (registry-only, not rewritten)
    #[arg(long = "dep", value_name = "FILE")]
    deps: Vec<PathBuf>,

    /// Indirect dependency files (registry-only)
    #[arg(long = "indirect-dep", value_name = "FILE")]
    indirect_deps: Vec<PathBuf>,

    /// What to emit on stdout
    #[arg(long, value_enum, default_value = "diagnostics")]
    emit: EmitStage,

    /// Omit every type-dependent pass
    #[arg(long)]
    disable_type_checking: bool,

    /// Do not reject globals without a configured value
    #[arg(long)]
    allow_unknown_globals: bool,

    /// Accept legacy v1Expression escapes
    #[arg(long)]
    allow_v1_expressions: bool,

    /// Keep HTML nodes instead of desugaring them back to text
    #[arg(long)]
    no_desugar_html: bool,

    /// Skip the optimizer
    #[arg(long)]
    no_optimize: bool,

    /// Skip the autoescaper
    #[arg(long)]
    no_autoescape: bool,

    /// Skip the data-tpl debug attribute rewrite
    #[arg(long)]
    no_debug_attributes: bool,

    /// Require strict autoescaping on every template
    #[arg(long)]
    require_strict_autoescaping: bool,

    /// Reject calls to templates outside this fileset
    #[arg(long)]
    no_external_calls: bool,

    /// Compile-time global, e.g. --global app.DEBUG=true
    #[arg(long = "global", value_name = "NAME=VALUE")]
    globals: Vec<String>,

    /// Conformance policy JSON file
    #[arg(long, value_name = "FILE")]
    conformance: Option<PathBuf>,

    /// Logging configuration JSON file
    #[arg(long = "logging-config", value_name = "FILE")]
    logging_config: Option<PathBuf>,

    /// Experimental feature flags (e.g. new_html_matcher)
    #[arg(long = "experimental", value_name = "FLAG")]
    experimental: Vec<String>,

    /// Stop the pipeline before the named pass
    #[arg(long = "stop-before", value_name = "PASS")]
    stop_before: Vec<String>,

    /// Stop the pipeline after the named pass
    #[arg(long = "stop-after", value_name = "PASS")]
    stop_after: Vec<String>,

    /// Print per-pass timing to stderr
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(run(cli));
}

fn run(cli: Cli) -> i32 {
    // ── Read sources ──
    let mut sources = Vec::new();
    for (paths, kind) in [
        (&cli.sources, FileKind::Src),
        (&cli.deps, FileKind::Dep),
        (&cli.indirect_deps, FileKind::IndirectDep),
    ] {
        for path in paths {
            match std::fs::read_to_string(path) {
                Ok(text) => sources.push(SourceFile::new(path.display().to_string(), text, kind)),
                Err(e) => {
                    eprintln!("error: {}: {}", path.display(), e);
                    return EXIT_SYSTEM_ERROR;
                }
            }
        }
    }

    // ── Configuration ──
    let options = PipelineOptions {
        disable_all_type_checking: cli.disable_type_checking,
        allow_unknown_globals: cli.allow_unknown_globals,
        allow_v1_expression: cli.allow_v1_expressions,
        desugar_html_nodes: !cli.no_desugar_html,
        optimize: !cli.no_optimize,
        autoescaper_enabled: !cli.no_autoescape,
        add_html_attributes_for_debugging: !cli.no_debug_attributes,
        strict_autoescaping_required: cli.require_strict_autoescaping,
        allow_external_calls: !cli.no_external_calls,
        experimental_features: cli.experimental.iter().cloned().collect::<BTreeSet<_>>(),
        verbose: cli.verbose,
    };

    let mut builder = PassManager::builder().options(options);

    for definition in &cli.globals {
        let Some((name, value)) = definition.split_once('=') else {
            eprintln!("error: --global expects NAME=VALUE, found '{definition}'");
            return EXIT_USAGE_ERROR;
        };
        builder = builder.define_global(name, GlobalValue::parse(value));
    }

    if let Some(path) = &cli.conformance {
        match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|text| {
            ConformanceConfig::from_json(&text).map_err(|e| e.to_string())
        }) {
            Ok(config) => builder = builder.conformance_config(config),
            Err(e) => {
                eprintln!("error: {}: {}", path.display(), e);
                return EXIT_SYSTEM_ERROR;
            }
        }
    }

    if let Some(path) = &cli.logging_config {
        match std::fs::read_to_string(path).map_err(|e| e.to_string()).and_then(|text| {
            LoggingConfig::from_json(&text).map_err(|e| e.to_string())
        }) {
            Ok(config) => builder = builder.logging_config(config),
            Err(e) => {
                eprintln!("error: {}: {}", path.display(), e);
                return EXIT_SYSTEM_ERROR;
            }
        }
    }

    for (names, rule) in [
        (&cli.stop_before, PassContinuationRule::StopBeforePass),
        (&cli.stop_after, PassContinuationRule::StopAfterPass),
    ] {
        for name in names {
            let Some(pass) = PassId::from_name(name) else {
                eprintln!("error: unknown pass '{name}'");
                return EXIT_USAGE_ERROR;
            };
            builder = builder.add_continuation_rule(pass, rule);
        }
    }

    let mut manager = match builder.build() {
        Ok(manager) => manager,
        Err(e) => {
            eprintln!("error: {e}");
            return EXIT_USAGE_ERROR;
        }
    };

    // ── Compile ──
    let mut ids = IdGenerator::new();
    let mut sink = ErrorSink::new();
    let mut fileset = parse_fileset(sources.clone(), &mut ids, &mut sink);
    let registry = manager.run(&mut fileset, &mut ids, &mut sink);

    for diag in sink.diagnostics() {
        eprintln!("{diag}");
    }

    // ── Emit ──
    match cli.emit {
        EmitStage::Diagnostics => {
            let errors = sink.error_count();
            let warnings = sink.diagnostics().len() - errors;
            eprintln!(
                "ttc: {} error(s), {} warning(s), {} template(s)",
                errors,
                warnings,
                registry.len()
            );
        }
        EmitStage::Ast => print!("{}", dump_fileset(&fileset)),
        EmitStage::Manifest => print!("{}", registry.manifest_json()),
        EmitStage::BuildInfo => {
            let provenance = compute_provenance(&sources, &registry);
            print!("{}", provenance.to_json());
        }
    }

    if sink
        .diagnostics()
        .iter()
        .any(|d| d.level == DiagLevel::Error)
    {
        EXIT_COMPILE_ERROR
    } else {
        EXIT_OK
    }
}
