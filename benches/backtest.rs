//! Benchmarks for pattern backtesting.

use chrono::{Days, NaiveDate};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use yapbt::prelude::*;

/// Generate a deterministic random-walk series
fn generate_series(n: usize) -> CandleSeries {
  let first = NaiveDate::from_ymd_opt(2000, 1, 3).unwrap();
  let mut candles = Vec::with_capacity(n);
  let mut price = 100.0;

  for i in 0..n {
    let change = ((i * 7 + 13) % 100) as f64 / 50.0 - 1.0; // Deterministic "random"
    let volatility = 0.5 + ((i * 3) % 10) as f64 / 10.0;

    let o = price;
    let c = price * (1.0 + change / 100.0);
    let h = o.max(c) * (1.0 + volatility / 200.0);
    let l = o.min(c) * (1.0 - volatility / 200.0);

    candles.push(Candle::new(first + Days::new(i as u64), o, h, l, c));
    price = c;
  }

  CandleSeries::new(candles).unwrap()
}

fn bench_single_pattern(c: &mut Criterion) {
  let series = generate_series(1000);

  let runner = RunnerBuilder::new()
    .add(BuiltinDetector::DoubleTops(DoubleTopsDetector::with_defaults()))
    .build()
    .unwrap();

  c.bench_function("backtest_double_tops_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(runner.run(black_box(&series)));
    })
  });
}

fn bench_all_patterns(c: &mut Criterion) {
  let series = generate_series(1000);

  let sequential = RunnerBuilder::new().with_all_defaults().build().unwrap();
  let parallel = RunnerBuilder::new().with_all_defaults().parallel(true).build().unwrap();

  c.bench_function("backtest_all_patterns_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(sequential.run(black_box(&series)));
    })
  });

  c.bench_function("backtest_all_patterns_1000_bars_parallel", |b| {
    b.iter(|| {
      let _ = black_box(parallel.run(black_box(&series)));
    })
  });
}

fn bench_scaling(c: &mut Criterion) {
  let runner = RunnerBuilder::new().with_all_defaults().full_history().build().unwrap();

  let mut group = c.benchmark_group("scaling");

  for size in [100, 500, 1000, 3000].iter() {
    let series = generate_series(*size);

    group.bench_with_input(BenchmarkId::new("backtest", size), size, |b, _| {
      b.iter(|| {
        let _ = black_box(runner.run(black_box(&series)));
      })
    });
  }

  group.finish();
}

fn bench_parallel_instruments(c: &mut Criterion) {
  let series1 = generate_series(1000);
  let series2 = generate_series(1000);
  let series3 = generate_series(1000);
  let series4 = generate_series(1000);

  let runner = RunnerBuilder::new().with_all_defaults().build().unwrap();

  let instruments: Vec<(&str, &CandleSeries)> =
    vec![("SYM1", &series1), ("SYM2", &series2), ("SYM3", &series3), ("SYM4", &series4)];

  c.bench_function("backtest_parallel_4_instruments", |b| {
    b.iter(|| {
      let _ = black_box(backtest_parallel(black_box(&runner), black_box(instruments.clone())));
    })
  });
}

fn bench_indicators(c: &mut Criterion) {
  let candles = generate_series(1000).candles().to_vec();

  c.bench_function("compute_indicators_1000_bars", |b| {
    b.iter(|| {
      let _ = black_box(CandleSeries::new(black_box(candles.clone())));
    })
  });
}

fn bench_simulate(c: &mut Criterion) {
  let series = generate_series(1000);
  let simulator = TradeSimulator::default();
  let rule = ExitRule::new(1.02, 0.98, 20);

  c.bench_function("simulate_trade", |b| {
    b.iter(|| {
      let entry = Entry::at_open(series.candles(), black_box(500), Direction::Long);
      let _ = black_box(entry.map(|e| simulator.simulate(&series, &e, &rule)));
    })
  });
}

criterion_group!(
  benches,
  bench_single_pattern,
  bench_all_patterns,
  bench_scaling,
  bench_parallel_instruments,
  bench_indicators,
  bench_simulate,
);

criterion_main!(benches);
