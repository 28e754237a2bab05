use std::rc::Rc;

use criterion::Criterion;

use specfit::{EstimatorFactory, Fit, Spectrum};

fn load_fit() -> Fit {
    let hist = specfit::text::read_histogram("test/data/container/co60.txt").unwrap();
    let spectrum = Spectrum::new(hist).into_shared();
    let mut fit = Fit::new(Rc::new(EstimatorFactory::default()), Some(spectrum));
    fit.set_region(100.0, 140.0).unwrap();
    fit.set_peaks(&[120.4]).unwrap();
    fit.set_backgrounds(&[(100.0, 108.0), (132.0, 140.0)]).unwrap();
    fit
}

fn fitting(c: &mut Criterion) {
    let mut fit = load_fit();
    c.bench_function("fit_all_cached_engine", |b| b.iter(|| fit.fit_all().unwrap()));

    let mut fit = load_fit();
    c.bench_function("fit_all_fresh_engine", |b| {
        b.iter(|| {
            fit.set_peaks(&[120.4]).unwrap();
            fit.fit_all().unwrap()
        })
    });

    let mut fit = load_fit();
    c.bench_function("fit_peaks_edge_background", |b| {
        b.iter(|| fit.fit_peaks(None, false).unwrap())
    });
}

criterion::criterion_group!(benches, fitting);
criterion::criterion_main!(benches);
