use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use mi_core::acquisition::SampleRingBuffer;
use mi_core::classification::CspModel;
use mi_core::hal::{DemoSource, PacketLayout};
use mi_core::processing::{butter_filter, compute_psd, notch_filter};
use ndarray::{Array2, Array3};

const SAMPLE_RATES: &[f64] = &[250.0, 500.0, 1000.0];
const CHANNEL_COUNTS: &[usize] = &[8, 16, 32];
const CHUNK_SIZES: &[usize] = &[10, 40, 100];

fn demo_window(rate: f64, channels: usize, seconds: f64) -> Array2<f64> {
    let mut source = DemoSource::new(rate, channels, (seconds * 1000.0) as u64).with_seed(11);
    source.generate().mapv(f64::from)
}

fn benchmark_ring_buffer(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_buffer");

    for &chunk in CHUNK_SIZES {
        for &channels in &[8, 32] {
            group.throughput(Throughput::Elements((chunk * 100) as u64));
            group.bench_with_input(
                BenchmarkId::new("append", format!("{channels}ch_{chunk}rows")),
                &(channels, chunk),
                |b, &(channels, chunk)| {
                    let buffer = SampleRingBuffer::new(2500, channels).unwrap();
                    let data = Array2::<f32>::ones((chunk, channels));
                    b.iter(|| {
                        for _ in 0..100 {
                            buffer.append(black_box(data.view())).unwrap();
                        }
                    });
                },
            );
        }
    }

    group.bench_function("get_last_1s_8ch", |b| {
        let buffer = SampleRingBuffer::new(2500, 8).unwrap();
        buffer.append(Array2::<f32>::ones((2600, 8)).view()).unwrap();
        b.iter(|| black_box(buffer.get_last(250)));
    });

    group.finish();
}

fn benchmark_filters(c: &mut Criterion) {
    let mut group = c.benchmark_group("filters");

    for &rate in SAMPLE_RATES {
        for &channels in CHANNEL_COUNTS {
            let window = demo_window(rate, channels, 1.0);
            group.throughput(Throughput::Elements((window.nrows() * channels) as u64));

            group.bench_with_input(
                BenchmarkId::new("bandpass_8_30", format!("{rate}Hz_{channels}ch")),
                &window,
                |b, window| b.iter(|| butter_filter(black_box(window.view()), rate, Some(8.0), Some(30.0), 4)),
            );

            group.bench_with_input(
                BenchmarkId::new("notch_50", format!("{rate}Hz_{channels}ch")),
                &window,
                |b, window| b.iter(|| notch_filter(black_box(window.view()), rate, 50.0, 30.0)),
            );
        }
    }

    let window = demo_window(250.0, 8, 4.0);
    group.bench_function("welch_psd_4s_8ch", |b| {
        b.iter(|| compute_psd(black_box(window.view()), 250.0, 512))
    });

    group.finish();
}

fn benchmark_csp(c: &mut Criterion) {
    let mut group = c.benchmark_group("csp");

    for &channels in &[8, 16] {
        let trials = Array3::from_shape_fn((40, channels, 250), |(t, ch, i)| {
            let gain = if (t < 20 && ch == 0) || (t >= 20 && ch == channels - 1) { 3.0 } else { 1.0 };
            gain * (((t * 31 + ch * 17 + i * 7) % 101) as f64 / 50.0 - 1.0)
        });
        let labels: Vec<usize> = (0..40).map(|t| usize::from(t >= 20)).collect();

        group.bench_with_input(BenchmarkId::new("fit", format!("{channels}ch")), &trials, |b, trials| {
            b.iter(|| {
                let mut csp = CspModel::new(4);
                csp.fit(black_box(trials.view()), &labels).unwrap();
                csp
            })
        });

        let mut csp = CspModel::new(4);
        csp.fit(trials.view(), &labels).unwrap();
        let trial = trials.index_axis(ndarray::Axis(0), 0).to_owned();
        group.bench_with_input(BenchmarkId::new("transform_trial", format!("{channels}ch")), &trial, |b, trial| {
            b.iter(|| csp.transform_trial(black_box(trial.view())).unwrap())
        });
    }

    group.finish();
}

fn benchmark_framing(c: &mut Criterion) {
    let layout = PacketLayout::new(9, 40);
    let block = Array2::from_shape_fn((40, 9), |(r, ch)| (r * 9 + ch) as f32);
    let bytes = layout.encode(&block).unwrap();

    c.bench_function("tcp_packet_decode", |b| {
        b.iter(|| layout.decode(black_box(&bytes)).unwrap())
    });
}

criterion_group!(
    benches,
    benchmark_ring_buffer,
    benchmark_filters,
    benchmark_csp,
    benchmark_framing
);
criterion_main!(benches);
