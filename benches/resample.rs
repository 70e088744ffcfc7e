use criterion::{BenchmarkId, Criterion, Throughput};
use nalgebra::{Matrix3, Rotation3, Vector3};
use ndarray::{ArrayD, IxDyn};
use register_image::{AffineTransform, Interpolation, Resampler, Volume};
use std::hint::black_box;
use std::time::Duration;

const SIZE: usize = 64;
const SPACING: f64 = 1.5;

fn synthetic_volume(size: usize, spacing: f64) -> Volume {
    let shape = [size, size, size];
    let data = ArrayD::from_shape_fn(IxDyn(&shape), |index| {
        ((index[0] * 7 + index[1] * 3 + index[2]) % 251) as f32
    });
    let affine = AffineTransform::from_parts(
        &Matrix3::from_diagonal_element(spacing),
        &Vector3::repeat(-(size as f64) * spacing / 2.0),
    );
    Volume::new(data, affine).expect("valid synthetic volume")
}

fn bench_resample(c: &mut Criterion) {
    let mut group = c.benchmark_group("resample");
    let moving = synthetic_volume(SIZE, SPACING);
    let fixed = synthetic_volume(SIZE, 1.0);
    let rotation = Rotation3::from_euler_angles(0.1, -0.05, 0.2);
    let transform =
        AffineTransform::from_parts(rotation.matrix(), &Vector3::new(2.5, -1.25, 0.75));

    group.throughput(Throughput::Elements((SIZE * SIZE * SIZE) as u64));
    group.sample_size(20);
    group.warm_up_time(Duration::from_millis(500));
    for interpolation in [Interpolation::Nearest, Interpolation::Trilinear] {
        let resampler = Resampler::new(interpolation, 0.0);
        group.bench_with_input(
            BenchmarkId::new(interpolation.to_string(), SIZE),
            &(&moving, &fixed),
            |b, (moving, fixed)| {
                b.iter(|| {
                    black_box(
                        resampler
                            .resample(black_box(moving), black_box(fixed), &transform)
                            .expect("resample succeeds"),
                    )
                })
            },
        );
    }
    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_resample(&mut criterion);
}
