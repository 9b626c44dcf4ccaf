use std::collections::BTreeMap;

use eframe::egui::{Color32, RichText, Stroke, Ui};
use egui_plot::{
    HLine, Legend, Line, LineStyle, MarkerShape, Plot, PlotPoint, PlotPoints, PlotUi, Points,
    Polygon, Text, VLine,
};

use ctplot::figure::{Axes, AxesKind, Colorbar, Figure, HistDraw, MeshDraw, Series, Style};
use ctplot::layer::Scale;

use crate::color::{layer_color, parse_color, ColorMap};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Figure plot (central panel)
// ---------------------------------------------------------------------------

/// Render the composed figure in the central panel.
pub fn figure_plot(ui: &mut Ui, state: &AppState) {
    let Some(fig) = &state.figure else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Set up a layer and press Plot");
        });
        return;
    };

    if let Some(title) = &fig.title {
        ui.vertical_centered(|ui: &mut Ui| {
            ui.label(RichText::new(title).size(1.4 * fig.font_size as f32).strong());
        });
    }
    for colorbar in fig.series().filter_map(Series::colorbar) {
        colorbar_strip(ui, colorbar);
    }

    let main = fig.main_axes();
    let names = legend_names(fig);

    let mut plot = Plot::new("figure")
        .show_grid(fig.grid)
        .allow_boxed_zoom(true)
        .allow_drag(true)
        .allow_scroll(true)
        .allow_zoom(true);
    if fig.legend.is_some() {
        plot = plot.legend(Legend::default());
    }
    if let Some(label) = axis_label(main.xlabel.as_deref(), main.xscale) {
        plot = plot.x_axis_label(label);
    }
    if let Some(label) = axis_label(main.ylabel.as_deref(), main.yscale) {
        plot = plot.y_axis_label(label);
    }
    for (lo, hi) in main.xlim.into_iter().map(|r| scaled_range(r, main.xscale)) {
        plot = plot.include_x(lo).include_x(hi);
    }
    for (lo, hi) in main.ylim.into_iter().map(|r| scaled_range(r, main.yscale)) {
        plot = plot.include_y(lo).include_y(hi);
    }

    plot.show(ui, |plot_ui: &mut PlotUi| {
        // twin axes share the canvas with the main axes
        for axes in &fig.axes {
            let scales = Scales::of(axes, main);
            if let Some(frame) = &axes.map {
                draw_map_frame(plot_ui, frame);
            }
            for series in &axes.series {
                draw_series(plot_ui, series, &scales, names.get(&series.layer()));
            }
        }
    });
}

/// Legend label per layer; twin-axis layers carry their axis label.
fn legend_names(fig: &Figure) -> BTreeMap<usize, String> {
    let Some(legend) = &fig.legend else {
        return BTreeMap::new();
    };
    legend
        .entries
        .iter()
        .map(|entry| {
            let twin = fig.axes.iter().find(|a| {
                a.kind != AxesKind::Main && a.series.iter().any(|s| s.layer() == entry.layer)
            });
            let label = match twin {
                Some(a) => {
                    let axis = if a.kind == AxesKind::TwinY { &a.ylabel } else { &a.xlabel };
                    match axis {
                        Some(l) => format!("{} ({l})", entry.label),
                        None => entry.label.clone(),
                    }
                }
                None => entry.label.clone(),
            };
            (entry.layer, label)
        })
        .collect()
}

fn axis_label(label: Option<&str>, scale: Scale) -> Option<String> {
    let label = label?;
    Some(match scale {
        Scale::Linear => label.to_string(),
        Scale::Log => format!("log10 {label}"),
    })
}

fn scaled_range((lo, hi): (f64, f64), scale: Scale) -> (f64, f64) {
    (scale_value(lo, scale), scale_value(hi, scale))
}

fn scale_value(v: f64, scale: Scale) -> f64 {
    match scale {
        Scale::Linear => v,
        Scale::Log => v.log10(),
    }
}

/// Axis scales in effect for one axes: twins inherit the shared dimension.
struct Scales {
    x: Scale,
    y: Scale,
}

impl Scales {
    fn of(axes: &Axes, main: &Axes) -> Self {
        match axes.kind {
            AxesKind::Main => Self { x: axes.xscale, y: axes.yscale },
            AxesKind::TwinX => Self { x: axes.xscale, y: main.yscale },
            AxesKind::TwinY => Self { x: main.xscale, y: axes.yscale },
        }
    }

    fn points(&self, x: &[f64], y: &[f64]) -> Vec<[f64; 2]> {
        x.iter()
            .zip(y)
            .map(|(a, b)| [scale_value(*a, self.x), scale_value(*b, self.y)])
            .filter(|[a, b]| a.is_finite() && b.is_finite())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Series
// ---------------------------------------------------------------------------

fn series_color(layer: usize, style: &Style) -> Color32 {
    style
        .get("color")
        .and_then(|c| parse_color(c))
        .unwrap_or_else(|| layer_color(layer))
}

/// Polyline with the layer colour and the `linewidth` / `linestyle`
/// options; `fill` shades down to that y value.
fn draw_line(
    plot_ui: &mut PlotUi,
    points: Vec<[f64; 2]>,
    layer: usize,
    style: &Style,
    name: Option<&String>,
    fill: Option<f32>,
) {
    let width = style
        .get("linewidth")
        .and_then(|w| w.parse::<f32>().ok())
        .unwrap_or(1.5);
    let mut line = Line::new(PlotPoints::new(points))
        .color(series_color(layer, style))
        .width(width);
    match style.get("linestyle").map(String::as_str) {
        Some("--" | "dashed") => line = line.style(LineStyle::dashed_loose()),
        Some(":" | "dotted") => line = line.style(LineStyle::dotted_loose()),
        _ => {}
    }
    if let Some(name) = name {
        line = line.name(name);
    }
    if let Some(y) = fill {
        line = line.fill(y);
    }
    plot_ui.line(line);
}

fn draw_series(plot_ui: &mut PlotUi, series: &Series, scales: &Scales, name: Option<&String>) {
    match series {
        Series::Line { layer, x, y, style } => {
            draw_line(plot_ui, scales.points(x, y), *layer, style, name, None);
        }
        Series::Scatter {
            layer,
            x,
            y,
            z,
            size,
            colorbar,
            ..
        } => {
            let map = ColorMap::new(colorbar.range);
            let radius = (size.sqrt() / 2.0).max(1.0) as f32;
            // one point set per colour band
            let mut bands: BTreeMap<u8, Vec<[f64; 2]>> = BTreeMap::new();
            for ((xv, yv), zv) in x.iter().zip(y).zip(z) {
                if !zv.is_finite() {
                    continue;
                }
                let band = (map.fraction(*zv) * 31.0).round() as u8;
                bands
                    .entry(band)
                    .or_default()
                    .extend(scales.points(&[*xv], &[*yv]));
            }
            for (band, points) in bands {
                let lo = colorbar.range.map_or(0.0, |r| r.0);
                let hi = colorbar.range.map_or(1.0, |r| r.1);
                let v = lo + (hi - lo) * f64::from(band) / 31.0;
                plot_ui.points(
                    Points::new(PlotPoints::new(points))
                        .radius(radius)
                        .shape(MarkerShape::Circle)
                        .filled(true)
                        .color(map.color_for(v)),
                );
            }
            // legend entry for the whole layer
            if let Some(name) = name {
                plot_ui.points(
                    Points::new(PlotPoints::new(Vec::new()))
                        .color(layer_color(*layer))
                        .name(name),
                );
            }
        }
        Series::Histogram {
            layer,
            draw,
            x,
            y,
            style,
            ..
        } => {
            let points = scales.points(x, y);
            match draw {
                HistDraw::Step | HistDraw::Line => draw_line(plot_ui, points, *layer, style, name, None),
                HistDraw::Fill => draw_line(plot_ui, points, *layer, style, name, Some(0.0)),
                HistDraw::Markers => {
                    let mut p = Points::new(PlotPoints::new(points))
                        .radius(3.0)
                        .color(series_color(*layer, style));
                    if let Some(name) = name {
                        p = p.name(name);
                    }
                    plot_ui.points(p);
                }
            }
        }
        Series::ErrorBars {
            layer,
            x,
            y,
            xerr,
            yerr,
            style,
            ..
        } => {
            let color = series_color(*layer, style);
            let mut markers = Points::new(PlotPoints::new(scales.points(x, y)))
                .radius(2.5)
                .color(color);
            if let Some(name) = name {
                markers = markers.name(name);
            }
            plot_ui.points(markers);
            for (i, (xv, yv)) in x.iter().zip(y).enumerate() {
                if let Some(dx) = xerr.as_ref().and_then(|e| e.get(i)) {
                    let bar = scales.points(&[xv - dx, xv + dx], &[*yv, *yv]);
                    plot_ui.line(Line::new(PlotPoints::new(bar)).color(color));
                }
                if let Some(dy) = yerr.as_ref().and_then(|e| e.get(i)) {
                    let bar = scales.points(&[*xv, *xv], &[yv - dy, yv + dy]);
                    plot_ui.line(Line::new(PlotPoints::new(bar)).color(color));
                }
            }
        }
        Series::Mesh {
            xedges,
            yedges,
            values,
            draw,
            colorbar,
            ..
        } => {
            let flat: Vec<f64> = values.iter().flatten().copied().collect();
            let range = colorbar
                .as_ref()
                .and_then(|c| c.range)
                .or_else(|| ctplot::binning::finite_range(&flat));
            let map = ColorMap::new(range);
            for (j, row) in values.iter().enumerate() {
                for (i, v) in row.iter().enumerate() {
                    if !v.is_finite() {
                        continue;
                    }
                    let (x0, x1, y0, y1) = (xedges[i], xedges[i + 1], yedges[j], yedges[j + 1]);
                    match draw {
                        MeshDraw::Color => {
                            cell(plot_ui, scales, (x0, x1, y0, y1), map.color_for(*v));
                        }
                        MeshDraw::Contour { levels, .. } => {
                            let band = levels.iter().rev().find(|l| *l <= v).copied().unwrap_or(*v);
                            cell(plot_ui, scales, (x0, x1, y0, y1), map.color_for(band));
                        }
                        MeshDraw::Boxes { sizes } => {
                            let s = sizes[j][i];
                            if s.is_finite() && s > 0.0 {
                                let center = scales.points(&[(x0 + x1) / 2.0], &[(y0 + y1) / 2.0]);
                                plot_ui.points(
                                    Points::new(PlotPoints::new(center))
                                        .shape(MarkerShape::Square)
                                        .filled(false)
                                        .radius((s.sqrt() / 2.0) as f32)
                                        .color(Color32::DARK_GRAY),
                                );
                            }
                        }
                    }
                }
            }
        }
    }
}

fn cell(plot_ui: &mut PlotUi, scales: &Scales, (x0, x1, y0, y1): (f64, f64, f64, f64), color: Color32) {
    let corners = scales.points(&[x0, x1, x1, x0], &[y0, y0, y1, y1]);
    plot_ui.polygon(
        Polygon::new(PlotPoints::new(corners))
            .fill_color(color)
            .stroke(Stroke::NONE),
    );
}

// ---------------------------------------------------------------------------
// Map background and colorbars
// ---------------------------------------------------------------------------

fn draw_map_frame(plot_ui: &mut PlotUi, frame: &ctplot::maps::MapFrame) {
    let grid = Color32::from_gray(150);
    for lat in &frame.parallels {
        plot_ui.hline(HLine::new(*lat).color(grid).style(LineStyle::dotted_loose()));
    }
    for lon in &frame.meridians {
        plot_ui.vline(VLine::new(*lon).color(grid).style(LineStyle::dotted_loose()));
    }
    if let Some(special) = &frame.special_grid {
        for lat in special.tropics_and_circles.iter().chain([&special.equator]) {
            plot_ui.hline(HLine::new(*lat).color(Color32::DARK_RED).style(LineStyle::dashed_loose()));
        }
        plot_ui.vline(VLine::new(special.prime_meridian).color(Color32::DARK_RED).style(LineStyle::dashed_loose()));
    }
    for (name, x, y) in &frame.places {
        plot_ui.points(Points::new(PlotPoints::new(vec![[*x, *y]])).radius(3.0).color(Color32::BLACK));
        plot_ui.text(Text::new(PlotPoint::new(*x, *y), name.as_str()));
    }
    let (x0, x1) = frame.lon_range;
    let (y0, y1) = frame.lat_range;
    let border = vec![[x0, y0], [x1, y0], [x1, y1], [x0, y1], [x0, y0]];
    plot_ui.line(Line::new(PlotPoints::new(border)).color(Color32::GRAY));
}

/// Colour swatches at the colorbar ticks, with the colorbar label.
fn colorbar_strip(ui: &mut Ui, colorbar: &Colorbar) {
    let map = ColorMap::new(colorbar.range);
    ui.horizontal(|ui: &mut Ui| {
        ui.label(RichText::new(&colorbar.label).strong());
        for (tick, label) in colorbar.ticks.iter().zip(&colorbar.tick_labels) {
            ui.label(RichText::new("■").color(map.color_for(*tick)));
            ui.label(label);
        }
    });
}
