use std::cell::Cell;
use std::path::Path;
use std::sync::Arc;

use ctplot::data::loader::write_parquet;
use ctplot::data::{FileStore, Table, TableReader};
use ctplot::figure::{AxesKind, HistDraw, Series};
use ctplot::source::SourceKey;
use ctplot::{make_plot, Config, ParameterBag, PlotComposer, Progress};

fn names(v: &[&str]) -> Vec<String> {
    v.iter().map(|s| s.to_string()).collect()
}

/// `time, value` at 1 s spacing with `value` alternating 0 / 10.
fn alternating(rows: usize) -> Table {
    let time: Vec<f64> = (0..rows).map(|i| i as f64).collect();
    let value: Vec<f64> = (0..rows).map(|i| if i % 2 == 0 { 0.0 } else { 10.0 }).collect();
    Table::new("alternating", "/raw/alt", names(&["time", "value"]), names(&["s", "V"]), vec![time, value]).unwrap()
}

fn weather(rows: usize) -> Table {
    let time: Vec<f64> = (0..rows).map(|i| i as f64 * 600.0).collect();
    let t: Vec<f64> = (0..rows).map(|i| (i % 30) as f64 - 10.0).collect();
    let p: Vec<f64> = (0..rows).map(|i| 1000.0 + (i % 13) as f64).collect();
    Table::new(
        "weather",
        "/raw/weather",
        names(&["time", "T_a", "p"]),
        names(&["s", "°C", "hPa"]),
        vec![time, t, p],
    )
    .unwrap()
}

/// A data directory with one store holding both tables.
fn store(dir: &Path) {
    write_parquet(&dir.join("data/sample/raw/alt.parquet"), &alternating(100)).unwrap();
    write_parquet(&dir.join("data/sample/raw/weather.parquet"), &weather(500)).unwrap();
}

fn config(dir: &Path) -> Config {
    Config {
        basedir: dir.to_path_buf(),
        ..Config::default()
    }
}

fn bag(pairs: &[(&str, &str)]) -> ParameterBag {
    pairs.iter().copied().collect()
}

/// Counts how often a table is opened.
struct Counting<R> {
    inner: R,
    opened: Cell<usize>,
}

impl<R: TableReader> TableReader for Counting<R> {
    fn open(&self, key: &SourceKey) -> ctplot::Result<Table> {
        self.opened.set(self.opened.get() + 1);
        self.inner.open(key)
    }
}

#[test]
fn histogram_of_alternating_values() {
    let dir = tempfile::tempdir().unwrap();
    store(dir.path());

    let fig = make_plot(
        &bag(&[("m0", "h1"), ("s0", "data/sample:/raw/alt"), ("x0", "value"), ("x0b", "2")]),
        &config(dir.path()),
        Progress::new(),
    )
    .unwrap();

    let Series::Histogram { edges, contents, draw, .. } = &fig.main_axes().series[0] else {
        panic!("expected a histogram");
    };
    assert_eq!(edges, &vec![0.0, 5.0, 10.0]);
    assert_eq!(contents, &vec![50.0, 50.0]);
    assert_eq!(*draw, HistDraw::Step);
    assert_eq!(fig.main_axes().xlabel.as_deref(), Some("value [V]"));
}

#[test]
fn shared_source_is_read_once() {
    let dir = tempfile::tempdir().unwrap();
    store(dir.path());
    let reader = Counting {
        inner: FileStore::new(dir.path()),
        opened: Cell::new(0),
    };

    let src = "data/sample:/raw/weather";
    let fig = PlotComposer::new(&reader)
        .compose(&bag(&[
            ("m0", "xy"),
            ("s0", src),
            ("x0", "time"),
            ("y0", "T_a"),
            ("m1", "h1"),
            ("s1", " ./data/sample:/raw/weather "),
            ("x1", "p"),
            ("c1", "T_a > 0"),
        ]))
        .unwrap();

    assert_eq!(reader.opened.get(), 1);
    assert_eq!(fig.main_axes().series.len(), 2);
    assert_eq!(fig.legend.as_ref().map(|l| l.entries.len()), Some(2));
}

#[test]
fn twin_y_axis_keeps_its_own_label() {
    let dir = tempfile::tempdir().unwrap();
    store(dir.path());

    let src = "data/sample:/raw/weather";
    let fig = make_plot(
        &bag(&[
            ("m0", "xy"),
            ("s0", src),
            ("x0", "time"),
            ("y0", "p"),
            ("tw0", "y"),
            ("m1", "xy"),
            ("s1", src),
            ("x1", "time"),
            ("y1", "T_a"),
            ("tw1", ""),
        ]),
        &config(dir.path()),
        Progress::new(),
    )
    .unwrap();

    assert_eq!(fig.axes.len(), 2);
    let main = fig.axes_of(AxesKind::Main).unwrap();
    let twin = fig.axes_of(AxesKind::TwinY).unwrap();
    assert_eq!(main.ylabel.as_deref(), Some("T_a [°C]"));
    assert_eq!(main.xlabel.as_deref(), Some("time [s]"));
    assert_eq!(twin.ylabel.as_deref(), Some("p [hPa]"));
    assert_eq!(twin.xlabel, None);
    assert_eq!(twin.series[0].layer(), 0);
    assert_eq!(main.series[0].layer(), 1);
}

#[test]
fn cached_averages_replay_bit_identical() {
    let dir = tempfile::tempdir().unwrap();
    store(dir.path());
    let cfg = config(dir.path());
    let request = bag(&[
        ("m0", "xy"),
        ("s0", "data/sample:/raw/weather"),
        ("rw0", "3600"),
        ("rs0", "0.5"),
        ("x0", "time"),
        ("y0", "T_a"),
        ("m1", "xy"),
        ("s1", "data/sample:/raw/weather"),
        ("rw1", "60*60"),
        ("rs1", "1/2"),
        ("x1", "time"),
        ("y1", "rate"),
    ]);

    let cold = make_plot(&request, &cfg, Progress::new()).unwrap();
    let entries: Vec<_> = std::fs::read_dir(cfg.cache_path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.path().extension().is_some_and(|x| x == "parquet"))
        .collect();
    assert_eq!(entries.len(), 1, "both layers share one averaged source");

    let progress = Progress::new();
    let warm = make_plot(&request, &cfg, Arc::clone(&progress)).unwrap();
    assert!(progress.is_done());

    let bits = |fig: &ctplot::Figure| -> Vec<Vec<u64>> {
        fig.series()
            .map(|s| match s {
                Series::Line { x, y, .. } => x.iter().chain(y).map(|v| v.to_bits()).collect(),
                _ => Vec::new(),
            })
            .collect()
    };
    assert_eq!(bits(&cold), bits(&warm));
    assert!(!bits(&cold)[0].is_empty());
}

#[test]
fn errors_abort_the_whole_plot() {
    let dir = tempfile::tempdir().unwrap();
    store(dir.path());
    let cfg = config(dir.path());

    let err = make_plot(
        &bag(&[("m3", "xy"), ("s3", "data/sample:/raw/weather"), ("y3", "open('x')")]),
        &cfg,
        Progress::new(),
    )
    .unwrap_err();
    assert!(matches!(&err, ctplot::PlotError::Expression(m) if m.contains("layer 3")), "{err}");

    let err = make_plot(&bag(&[("m0", "pie"), ("s0", "data/sample:/raw/weather")]), &cfg, Progress::new())
        .unwrap_err();
    assert!(matches!(err, ctplot::PlotError::Config(_)));

    let err = make_plot(&bag(&[("m0", "xy"), ("s0", "data/sample:/raw/missing"), ("y0", "x")]), &cfg, Progress::new())
        .unwrap_err();
    assert!(matches!(err, ctplot::PlotError::Config(_)));
}
