use criterion::{black_box, criterion_group, criterion_main, Criterion};

use lightshow::audio::{calculate_channel_frequency, FftLevelAnalyzer, SpectralAnalyzer};
use lightshow::lights::{BrightnessController, RollingStats, SimulatedHardware};

const CHUNK_SIZE: usize = 2048;
const SAMPLE_RATE: u32 = 44100;

fn stereo_chunk() -> Vec<u8> {
    (0..CHUNK_SIZE)
        .flat_map(|i| {
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = ((2.0 * std::f32::consts::PI * 220.0 * t).sin() * 6000.0
                + (2.0 * std::f32::consts::PI * 3100.0 * t).sin() * 2000.0) as i16;
            let bytes = sample.to_le_bytes();
            [bytes[0], bytes[1], bytes[0], bytes[1]]
        })
        .collect()
}

fn bench_analysis(c: &mut Criterion) {
    let bands = calculate_channel_frequency(20.0, 15000.0, 8, None, None).unwrap();
    let chunk = stereo_chunk();
    let mut analyzer = FftLevelAnalyzer::new();

    c.bench_function("fft_levels_2048_stereo_8ch", |b| {
        b.iter(|| {
            analyzer
                .analyze(black_box(&chunk), CHUNK_SIZE, SAMPLE_RATE, &bands, 2)
                .unwrap()
        })
    });
}

fn bench_brightness(c: &mut Criterion) {
    let mut controller = BrightnessController::new(SimulatedHardware::new(8, &[0, 1, 2, 3]));
    let stats = RollingStats::with_priors(8, 12.0, 1.5);
    let levels = [10.5, 11.0, 11.8, 12.2, 12.9, 13.4, 14.0, 9.0];

    c.bench_function("brightness_update_8ch", |b| {
        b.iter(|| controller.update(black_box(&levels), &stats))
    });
}

criterion_group!(benches, bench_analysis, bench_brightness);
criterion_main!(benches);
