use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use ttc::ast::FileKind;
use ttc::diag::ErrorSink;
use ttc::id::IdGenerator;
use ttc::parser::{parse_fileset, SourceFile};
use ttc::pipeline::PassManager;

// Benchmark scenarios: all compile clean through the default pipeline.

const SIMPLE_TEMPLATE: &str = r#"{namespace bench}
{template .simple}
{@param name: string}
<b>Hello {$name}</b>{/template}
"#;

const BRANCHY_TEMPLATE: &str = r#"{namespace bench}
{template .branchy}
{@param count: int}
{@param items: list<string>}
{if $count > 10}<span>many</span>{elseif $count > 0}<span>some</span>{else}<span>none</span>{/if}
{for $item in $items}<p>{$item}</p>{ifempty}<p>empty</p>{/for}
{switch $count}{case 0}zero{case 1}one{default}{$count}{/switch}{/template}
"#;

const MESSAGE_TEMPLATE: &str = r#"{namespace bench}
{template .msgs}
{@param user: string}
{@param link: uri}
{msg desc="welcome banner"}Welcome back, {$user}!{/msg}
{msg desc="profile link"}Visit <a href="{$link}">your profile</a>.{/msg}{/template}
"#;

fn scenarios() -> [(&'static str, &'static str); 3] {
    [
        ("simple", SIMPLE_TEMPLATE),
        ("branchy", BRANCHY_TEMPLATE),
        ("messages", MESSAGE_TEMPLATE),
    ]
}

/// Scaling generator: n templates in one namespace, each calling the
/// next. Keeps name resolution and call-site checking busy.
fn generate_scaling_source(n_templates: usize) -> String {
    let mut src = String::from("{namespace bench}\n");
    for t in 0..n_templates {
        src.push_str(&format!("{{template .t{t}}}\n{{@param depth: int}}\n"));
        src.push_str(&format!("<div>level {t}: {{$depth + {t}}}</div>\n"));
        if t + 1 < n_templates {
            src.push_str(&format!(
                "{{call .t{}}}{{param depth: {t} /}}{{/call}}\n",
                t + 1
            ));
        }
        src.push_str("{/template}\n");
    }
    src
}

fn compile(source: &str) {
    let mut ids = IdGenerator::new();
    let mut sink = ErrorSink::new();
    let mut fileset = parse_fileset(
        vec![SourceFile::new("bench.tpl", source, FileKind::Src)],
        &mut ids,
        &mut sink,
    );
    let mut manager = PassManager::builder().build().expect("manager construction");
    let registry = manager.run(&mut fileset, &mut ids, &mut sink);
    assert!(
        !sink.has_errors(),
        "bench source produced diagnostics: {:#?}",
        sink.diagnostics()
    );
    black_box((fileset, registry));
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| {
                let mut ids = IdGenerator::new();
                let mut sink = ErrorSink::new();
                let fileset = parse_fileset(
                    vec![SourceFile::new("bench.tpl", source, FileKind::Src)],
                    &mut ids,
                    &mut sink,
                );
                black_box(fileset)
            });
        });
    }
    group.finish();
}

fn bench_pipeline(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline");
    for (name, source) in scenarios() {
        group.bench_with_input(BenchmarkId::from_parameter(name), source, |b, source| {
            b.iter(|| compile(source));
        });
    }
    group.finish();
}

fn bench_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("pipeline_scaling");
    for n in [4usize, 16, 64] {
        let source = generate_scaling_source(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &source, |b, source| {
            b.iter(|| compile(source));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_parse, bench_pipeline, bench_scaling);
criterion_main!(benches);
