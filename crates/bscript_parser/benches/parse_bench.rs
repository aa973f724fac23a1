use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use bscript_core::StringPool;
use bscript_diagnostics::{CollectingSink, Reporter};

// A module with a mix of declarations, repeated to a few hundred lines.
const MODULE_SOURCE: &str = r#"
# Geometry primitives
struct Shape {
    origin: geo:Vec2,
    size: geo:Vec2,
    fill: Color,
    visible: bool,
}

enum Color { Red, Green, Blue, Alpha }

// Defaults
const DefaultColor = Color:Blue
const Highlight = shapes:Palette:Accent
"#;

fn bench_parse(c: &mut Criterion) {
    let source = MODULE_SOURCE.repeat(20);
    c.bench_function("parse_module", |b| {
        let reporter = Reporter::new("Shape.bs", Arc::new(CollectingSink::new()));
        let mut strings = StringPool::new();
        b.iter(|| {
            let tree = bscript_parser::parse_source(black_box(source.as_bytes()), &mut strings, &reporter);
            strings.reset();
            black_box(tree)
        })
    });
}

criterion_group!(benches, bench_parse);
criterion_main!(benches);
