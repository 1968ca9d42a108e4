// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Class-count charts
//!
//! - Terminal: Unicode bars, always available
//! - PNG: bar chart via plotters (optional feature)

use crate::metrics::ClassCounts;
use std::path::Path;

#[cfg(feature = "plotters")]
use plotters::prelude::*;

/// Default file name for the PNG chart
pub const COUNTS_CHART_FILE: &str = "predicted_sentiment_counts.png";

/// Render counts as horizontal bars scaled to `width` cells
pub fn bar_chart(title: &str, counts: &ClassCounts, width: usize) -> String {
    let max = counts.negative.max(counts.positive);
    let mut output = format!("{}\n", title);

    for (label, count) in counts.entries() {
        let cells = if max == 0 {
            0
        } else {
            ((count as f64 / max as f64) * width as f64).round() as usize
        };
        output.push_str(&format!(
            "{:<8} | {}{} {}\n",
            label,
            "█".repeat(cells),
            " ".repeat(width - cells),
            count
        ));
    }

    output
}

/// Write a bar chart PNG. Returns whether a file was written.
#[cfg(feature = "plotters")]
pub fn write_counts_png(title: &str, counts: &ClassCounts, path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    let root = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root.fill(&WHITE)?;

    let max = counts.negative.max(counts.positive).max(1) as u32;

    let mut chart = ChartBuilder::on(&root)
        .caption(title, ("sans-serif", 24))
        .margin(10)
        .x_label_area_size(35)
        .y_label_area_size(50)
        .build_cartesian_2d((0u32..1u32).into_segmented(), 0u32..(max + max / 10 + 1))?;

    chart
        .configure_mesh()
        .disable_x_mesh()
        .y_desc("Count")
        .x_label_formatter(&|v| match v {
            SegmentValue::CenterOf(0) => "NEGATIVE".to_string(),
            SegmentValue::CenterOf(1) => "POSITIVE".to_string(),
            _ => String::new(),
        })
        .draw()?;

    chart.draw_series(
        Histogram::vertical(&chart)
            .style(BLUE.mix(0.7).filled())
            .margin(40)
            .data([(0u32, counts.negative as u32), (1u32, counts.positive as u32)]),
    )?;

    root.present()?;
    tracing::info!("Saved class-count chart to {}", path.display());
    Ok(true)
}

/// Stub when plotters feature is disabled.
#[cfg(not(feature = "plotters"))]
pub fn write_counts_png(_title: &str, _counts: &ClassCounts, path: &Path) -> Result<bool, Box<dyn std::error::Error>> {
    tracing::debug!("Skipping {}: PNG charts require --features plotters", path.display());
    Ok(false)
}
