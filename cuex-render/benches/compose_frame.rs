use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use cuex_core::{Element, ImageStimulus, Origin};
use cuex_render::{Presenter as _, SkiaPresenter};
use cuex_timing::HighPrecisionTimer;
use std::path::PathBuf;
use std::time::Duration;

fn stimulus() -> Element {
    let path: PathBuf = std::env::temp_dir().join("cuex-bench-stimulus.png");
    if !path.exists() {
        image::RgbaImage::from_fn(1024, 768, |x, y| image::Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255]))
            .save(&path)
            .expect("bench image");
    }
    Element::Image(ImageStimulus::new(path, Origin::Neutral))
}

fn harness() -> SkiaPresenter<HighPrecisionTimer> {
    SkiaPresenter::new(1280, 720, None, HighPrecisionTimer::new()).expect("presenter")
}

pub fn bench_compose(c: &mut Criterion) {
    let element = stimulus();
    let mut g = c.benchmark_group("compose_frame");
    g.sample_size(40);

    g.bench_function("cached_image_frame", |b| {
        let mut p = harness();
        p.show_image(&element).expect("warm cache");
        b.iter(|| {
            p.show_image(black_box(&element)).expect("show");
            black_box(p.frame().data()[0]);
        })
    });

    g.bench_function("crosshair_with_mirror", |b| {
        b.iter_batched(
            || {
                let mut p = harness();
                let mirror = p.subscribe_mirror();
                (p, mirror)
            },
            |(mut p, mirror)| {
                p.show_crosshair(Duration::from_millis(2000)).expect("cross");
                black_box(mirror.try_recv().ok());
            },
            BatchSize::SmallInput,
        )
    });

    g.finish();
}

criterion_group!(benches, bench_compose);
criterion_main!(benches);
