use criterion::AxisScale;
use criterion::{
    black_box, criterion_group, criterion_main, BatchSize, Criterion, PlotConfiguration,
};
use st_nn::{CarryState, SequenceModule, SequenceTensor, SpiralConv, SpiralConvStack};

#[track_caller]
fn unwrap_ok<T, E: core::fmt::Debug>(context: &str, result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(error) => panic!("{context}: {error:?}"),
    }
}

fn sequence(length: usize, batch: usize, dim: usize) -> SequenceTensor {
    unwrap_ok(
        "sequence construction failed",
        SequenceTensor::from_fn(length, batch, dim, |t, b, c| {
            ((t * 31 + b * 7 + c) as f32 * 0.013).sin()
        }),
    )
}

fn bench_spiral_conv(c: &mut Criterion) {
    let mut group = c.benchmark_group("spiral_conv");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Logarithmic));

    let conv = unwrap_ok("conv construction failed", SpiralConv::new("conv", 64, Some(7)));
    for length in [64usize, 256, 1024] {
        let input = sequence(length, 4, 64);
        group.bench_function(format!("chunk_{length}x4x64"), |b| {
            b.iter_batched(
                CarryState::new,
                |mut state| {
                    black_box(unwrap_ok(
                        "spiral conv forward failed",
                        conv.forward(&input, &mut state, true),
                    ));
                },
                BatchSize::SmallInput,
            );
        });
    }

    group.finish();
}

fn bench_stack_streaming(c: &mut Criterion) {
    let mut group = c.benchmark_group("spiral_stack");
    let input = sequence(512, 2, 32);

    for chunk_len in [32usize, 128, 512] {
        group.bench_function(format!("stream_512_by_{chunk_len}"), |b| {
            b.iter_batched(
                || {
                    unwrap_ok(
                        "stack construction failed",
                        SpiralConvStack::new("stack", 4, 32, 2.0, 0.0, Some(3)),
                    )
                },
                |mut stack| {
                    stack.reset();
                    black_box(unwrap_ok(
                        "stack streaming failed",
                        stack.forward_chunked(&input, chunk_len),
                    ));
                },
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_spiral_conv, bench_stack_streaming);
criterion_main!(benches);
