//! PNG time-series plots
//!
//! Text needs a TrueType font registered with plotters at runtime. When no
//! system font is found the chart is drawn without caption, axis labels or
//! tick labels.

use std::path::PathBuf;
use std::sync::OnceLock;

use plotters::prelude::*;
use plotters::style::{register_font, FontDesc, FontFamily, FontStyle};
use tracing::{debug, error, info, warn};

use kubecop_common::Error;

use crate::metrics::MetricSeries;

const PLOT_SIZE: (u32, u32) = (1024, 640);

/// Family plotters resolves `FontFamily::SansSerif` to
const FONT_FAMILY: &str = "sans-serif";

const FONT_CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/liberation-sans/LiberationSans-Regular.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
];

static FONT_READY: OnceLock<bool> = OnceLock::new();

/// Register the first usable system font once per process
fn font_available() -> bool {
    *FONT_READY.get_or_init(|| {
        for candidate in FONT_CANDIDATES {
            let Ok(bytes) = std::fs::read(candidate) else {
                continue;
            };
            // plotters keeps a reference for the process lifetime
            let bytes: &'static [u8] = Box::leak(bytes.into_boxed_slice());
            match register_font(FONT_FAMILY, FontStyle::Normal, bytes) {
                Ok(()) => {
                    debug!(font = %candidate, "Registered plot font");
                    return true;
                }
                Err(_) => warn!(font = %candidate, "Unusable font file"),
            }
        }
        warn!("No TrueType font found, plots will have no text");
        false
    })
}

/// Lower-case and replace spaces with underscores
pub fn sanitize_name(name: &str) -> String {
    name.replace(' ', "_").to_lowercase()
}

/// Writes one PNG per plotted series into an output directory
#[derive(Debug, Clone)]
pub struct PlotSink {
    output_dir: PathBuf,
}

impl PlotSink {
    /// Plot into `output_dir`, created on first render
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// File a plot named `name` is written to
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.output_dir.join(format!("{}.png", sanitize_name(name)))
    }

    /// Render a series; returns whether the file was written
    pub fn render(&self, name: &str, timestamps: &[f64], values: &[f64], metric_label: &str) -> bool {
        match self.try_render(name, timestamps, values, metric_label) {
            Ok(path) => {
                info!(plot = %path.display(), "Saved plot");
                true
            }
            Err(e) => {
                error!(plot = %name, error = %e, "Plotting failed");
                false
            }
        }
    }

    /// Render a [`MetricSeries`]
    pub fn render_series(&self, name: &str, series: &MetricSeries, metric_label: &str) -> bool {
        self.render(name, &series.timestamps(), &series.values(), metric_label)
    }

    fn try_render(
        &self,
        name: &str,
        timestamps: &[f64],
        values: &[f64],
        metric_label: &str,
    ) -> Result<PathBuf, Error> {
        let path = self.path_for(name);
        let artifact = path.display().to_string();
        let fail = |e: &dyn std::fmt::Display| Error::artifact(&artifact, e.to_string());

        if timestamps.is_empty() || timestamps.len() != values.len() {
            return Err(fail(&format!(
                "need equal non-empty inputs, got {} timestamps and {} values",
                timestamps.len(),
                values.len()
            )));
        }

        std::fs::create_dir_all(&self.output_dir)?;

        let (x_min, x_max) = padded_range(timestamps);
        let (y_min, y_max) = padded_range(values);
        let with_text = font_available();

        // the backend borrows `path` until it is dropped
        {
            let root = BitMapBackend::new(&path, PLOT_SIZE).into_drawing_area();
            root.fill(&WHITE).map_err(|e| fail(&e))?;

            let mut builder = ChartBuilder::on(&root);
            builder.margin(20);
            if with_text {
                builder
                    .caption(
                        format!("KubeCop {metric_label} - {name}"),
                        FontDesc::new(FontFamily::SansSerif, 24.0, FontStyle::Normal),
                    )
                    .x_label_area_size(40)
                    .y_label_area_size(80);
            }
            let mut chart = builder
                .build_cartesian_2d(x_min..x_max, y_min..y_max)
                .map_err(|e| fail(&e))?;

            if with_text {
                chart
                    .configure_mesh()
                    .x_desc("Time (epoch)")
                    .y_desc(metric_label)
                    .draw()
                    .map_err(|e| fail(&e))?;
            }

            chart
                .draw_series(LineSeries::new(
                    timestamps.iter().copied().zip(values.iter().copied()),
                    &BLUE,
                ))
                .map_err(|e| fail(&e))?;

            root.present().map_err(|e| fail(&e))?;
        }
        Ok(path)
    }
}

/// Min/max of `data`, widened so a flat series still has a drawable range
fn padded_range(data: &[f64]) -> (f64, f64) {
    let min = data.iter().copied().fold(f64::INFINITY, f64::min);
    let max = data.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if (max - min).abs() < f64::EPSILON {
        (min - 1.0, max + 1.0)
    } else {
        let pad = (max - min) * 0.05;
        (min - pad, max + pad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];

    #[test]
    fn names_are_sanitized() {
        assert_eq!(
            sanitize_name("Basic load activities test_cpu"),
            "basic_load_activities_test_cpu"
        );
    }

    #[test]
    fn render_writes_png() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PlotSink::new(dir.path().join("plots"));

        let ok = sink.render(
            "Basic alert test_mem",
            &[0.0, 15.0, 30.0],
            &[1.0e8, 1.1e8, 1.05e8],
            "Memory Usage (bytes)",
        );
        assert!(ok);

        let bytes = std::fs::read(sink.path_for("Basic alert test_mem")).unwrap();
        assert!(bytes.starts_with(PNG_MAGIC));
        assert!(dir
            .path()
            .join("plots/basic_alert_test_mem.png")
            .exists());
    }

    #[test]
    fn flat_series_renders() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PlotSink::new(dir.path());
        let series = MetricSeries::new(vec![(0.0, 5.0), (1.0, 5.0)]);
        assert!(sink.render_series("flat", &series, "CPU Usage (cores)"));
    }

    #[test]
    fn render_returns_written_path_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PlotSink::new(dir.path());

        let first = sink
            .try_render("Basic alert test_cpu", &[0.0, 15.0], &[0.1, 0.2], "CPU Usage (cores)")
            .unwrap();
        assert_eq!(first, sink.path_for("Basic alert test_cpu"));

        let second = sink
            .try_render("Basic alert test_cpu", &[0.0, 15.0, 30.0], &[0.1, 0.3, 0.2], "CPU Usage (cores)")
            .unwrap();
        assert_eq!(second, first);
        assert!(std::fs::read(&second).unwrap().starts_with(PNG_MAGIC));
    }

    #[test]
    fn mismatched_inputs_fail_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = PlotSink::new(dir.path());
        assert!(!sink.render("bad", &[0.0, 1.0], &[1.0], "x"));
        assert!(!sink.render("empty", &[], &[], "x"));
        assert!(!sink.path_for("bad").exists());
    }

    #[test]
    fn padded_range_widens_flat_data() {
        assert_eq!(padded_range(&[3.0, 3.0]), (2.0, 4.0));
        let (lo, hi) = padded_range(&[0.0, 100.0]);
        assert!(lo < 0.0 && hi > 100.0);
    }
}
