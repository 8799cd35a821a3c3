//! Benchmarks for the pull-based render path
//!
//! Measures steady-state graph rendering: one second of audio through a
//! few representative topologies, offline so no device is involved.
//!
//! Run with: cargo bench --bench render_bench

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use polaron::{
    Context, ContextConfig, GainNode, OfflineRenderer, OscillatorNode, PannerNode, SourceControl,
    Waveform,
};

fn bench_single_chain(c: &mut Criterion) {
    c.bench_function("render_1s_osc_gain", |b| {
        let context = Context::new_offline(ContextConfig::default());
        let osc = OscillatorNode::new(&context, Waveform::Sine, 440.0).unwrap();
        let gain = GainNode::new(&context, 0.5).unwrap();
        osc.connect(&gain).unwrap();
        gain.connect_to_destination().unwrap();
        osc.play(0.0).unwrap();

        let mut renderer = OfflineRenderer::new(context);
        // Warm the graph so edits are applied before measurement.
        renderer.run_quanta(4);

        b.iter(|| {
            let bus = renderer.render(44_100);
            black_box(bus.channel(0).data()[0]);
        });
    });
}

fn bench_fan_in(c: &mut Criterion) {
    c.bench_function("render_1s_eight_oscillators_panned", |b| {
        let context = Context::new_offline(ContextConfig::default());
        for i in 0..8 {
            let osc =
                OscillatorNode::new(&context, Waveform::Sawtooth, 110.0 * (i + 1) as f32)
                    .unwrap();
            let panner = PannerNode::new(&context).unwrap();
            panner
                .pan()
                .unwrap()
                .set_value(i as f32 / 4.0 - 1.0)
                .unwrap();
            osc.connect(&panner).unwrap();
            panner.connect_to_destination().unwrap();
            osc.play(0.0).unwrap();
        }

        let mut renderer = OfflineRenderer::new(context);
        renderer.run_quanta(4);

        b.iter(|| {
            let bus = renderer.render(44_100);
            black_box(bus.channel(0).data()[0]);
        });
    });
}

fn bench_automated_gain(c: &mut Criterion) {
    c.bench_function("render_1s_sample_accurate_gain", |b| {
        let context = Context::new_offline(ContextConfig::default());
        let osc = OscillatorNode::new(&context, Waveform::Sine, 440.0).unwrap();
        let gain = GainNode::new(&context, 1.0).unwrap();
        let lfo = OscillatorNode::new(&context, Waveform::Sine, 2.0).unwrap();
        osc.connect(&gain).unwrap();
        gain.connect_to_destination().unwrap();
        gain.gain().unwrap().modulate_with(&lfo).unwrap();
        osc.play(0.0).unwrap();
        lfo.play(0.0).unwrap();

        let mut renderer = OfflineRenderer::new(context);
        renderer.run_quanta(4);

        b.iter(|| {
            let bus = renderer.render(44_100);
            black_box(bus.channel(0).data()[0]);
        });
    });
}

criterion_group!(
    benches,
    bench_single_chain,
    bench_fan_in,
    bench_automated_gain
);
criterion_main!(benches);
