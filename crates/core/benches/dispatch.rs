//! Event dispatch and command routing benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use questforge_core::events::ScratchStore;
use questforge_core::{
    hook_handler, parse_input, CommandRouter, CommandSpec, EventBus, EventType, Payload, SimpleGame,
};
use serde_json::json;

/// Handler counts per event
const HANDLER_COUNTS: &[usize] = &[1, 10, 100];

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_publish");

    for &count in HANDLER_COUNTS {
        let mut bus = EventBus::new();
        for i in 0..count {
            let owner = format!("plugin_{}", i % 8);
            bus.subscribe(
                EventType::CombatTurn,
                hook_handler(|ctx, payload| {
                    let damage = payload.get("damage").and_then(|v| v.as_i64()).unwrap_or_default();
                    ctx.game.add_counter("damage_dealt", damage);
                    Ok(())
                }),
                (i % 5) as i32 * 10,
                &owner,
            );
        }

        let mut payload = Payload::new();
        payload.insert("damage".to_string(), json!(7));
        let mut game = SimpleGame::default();
        let mut scratch = ScratchStore::new();

        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, _| {
            b.iter(|| bus.publish(black_box(&EventType::CombatTurn), &payload, &mut game, &mut scratch))
        });
    }

    group.finish();
}

fn bench_dispatch_command(c: &mut Criterion) {
    let mut router = CommandRouter::new();
    for i in 0..50 {
        let spec = CommandSpec::new(format!("cmd{}", i), "Benchmark command", |_ctx, args| Ok(args.join(" ")))
            .with_alias(format!("c{}", i));
        let _ = router.register(spec, "bench");
    }

    let mut game = SimpleGame::default();
    let mut scratch = ScratchStore::new();

    c.bench_function("command_dispatch_alias", |b| {
        b.iter(|| {
            let (name, args) = parse_input(black_box("/c42 north gate")).unwrap_or_default();
            router.dispatch(&name, &args, &mut game, &mut scratch)
        })
    });
}

criterion_group!(benches, bench_publish, bench_dispatch_command);
criterion_main!(benches);
