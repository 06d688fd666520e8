//! Benchmarks for the per-line matching hot path.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};

use logengine_eval::{BuiltinHost, Engine, EngineConfig};
use logengine_parser::{load_script_str, ScriptSet};

const RULES: &str = "\
[DEFINE_MACRO]
IP=\\d+\\.\\d+\\.\\d+\\.\\d+
WORD=\\S+

[SSH_SESSION]
BEGIN=sshd\\[\\d+\\]: Accepted \\w+ for $$USER(\\w+) from $$SRC($IP)
END=sshd\\[\\d+\\]: pam_unix.*session closed for user $USER

[FETCH_ERRORS]
BEGIN=fetch failed
BEGIN_ACCUM=retry @@ATTEMPT(\\d+)
END=fetch (succeeded|abandoned)

[KERNEL_OOPS]
RULE_TIMEOUT=50
BEGIN=kernel: Oops
MATCH_TIMEOUT=5
END=kernel: rebooting
";

fn build_engine(fast: bool) -> Engine {
    let mut set = ScriptSet::new();
    load_script_str("bench.rules", RULES, &mut set);
    assert!(set.errors.is_empty());
    let mut engine = Engine::new(Box::new(BuiltinHost::new()), EngineConfig { fast });
    assert!(engine.load(&set).is_empty());
    engine
}

/// Deterministic synthetic syslog-ish stream with a low match rate.
fn gen_lines(n: usize) -> Vec<String> {
    (0..n)
        .map(|i| match i % 97 {
            0 => format!("sshd[{i}]: Accepted publickey for user{i} from 10.0.0.{}", i % 250),
            7 => format!("sshd[{i}]: pam_unix.*session closed for user user{}", i.saturating_sub(7)),
            13 => "fetch failed".to_string(),
            14 | 15 => format!("retry {}", i % 5),
            16 => "fetch succeeded".to_string(),
            _ => format!("daemon[{i}]: routine heartbeat seq={i} ok"),
        })
        .collect()
}

fn bench_process_line(c: &mut Criterion) {
    let lines = gen_lines(10_000);

    let mut group = c.benchmark_group("process_line");
    group.throughput(Throughput::Elements(lines.len() as u64));

    group.bench_function("mixed_stream_10k", |b| {
        b.iter_batched(
            || build_engine(false),
            |mut engine| {
                for (i, line) in lines.iter().enumerate() {
                    engine.process_line("bench.log", (i + 1) as u64, line);
                }
                engine.finish()
            },
            BatchSize::LargeInput,
        )
    });

    group.bench_function("mixed_stream_10k_fast", |b| {
        b.iter_batched(
            || build_engine(true),
            |mut engine| {
                for (i, line) in lines.iter().enumerate() {
                    engine.process_line("bench.log", (i + 1) as u64, line);
                }
                engine.finish()
            },
            BatchSize::LargeInput,
        )
    });

    group.finish();
}

criterion_group!(benches, bench_process_line);
criterion_main!(benches);
