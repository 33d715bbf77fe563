use std::io::Cursor;

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;

use crate::telemetry::error::MeterError;
use crate::types::Sample;
#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
    pub current_color: RGBColor,
    pub voltage_color: RGBColor,
    pub resistance_color: RGBColor,
    /// Captions and axis labels; needs a system font.
    pub labels: bool,
}
impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 800,
            background: RGBColor(43, 43, 43),
            current_color: BLUE,
            voltage_color: GREEN,
            resistance_color: RED,
            labels: true,
        }
    }
}
/// Current, voltage and resistance of `samples` as three stacked panels.
pub fn render_window_png(samples: &[Sample], style: &PlotStyle) -> Result<Vec<u8>, MeterError> {
    if samples.is_empty() {
        return Err(MeterError::NoData);
    }
    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let panels = root.split_evenly((3, 1));
        let channels: [(&str, RGBColor, fn(&Sample) -> f64); 3] = [
            ("Current (A)", style.current_color, |s| s.effective_current()),
            ("Voltage (V)", style.voltage_color, |s| s.voltage),
            ("Resistance (Ohm)", style.resistance_color, |s| s.resistance),
        ];
        for (panel, (caption, color, value_of)) in panels.iter().zip(channels) {
            let values: Vec<f64> = samples.iter().map(value_of).collect();
            let (y_min, y_max) = padded_bounds(&values);
            let mut builder = ChartBuilder::on(panel);
            builder.margin(10);
            if style.labels {
                builder
                    .caption(caption, ("sans-serif", 18).into_font().color(&WHITE))
                    .set_label_area_size(LabelAreaPosition::Left, 80)
                    .set_label_area_size(LabelAreaPosition::Bottom, 30);
            }
            let mut chart = builder
                .build_cartesian_2d(0f64..values.len().max(2) as f64 - 1.0, y_min..y_max)?;
            if style.labels {
                chart
                    .configure_mesh()
                    .light_line_style(&WHITE.mix(0.1))
                    .y_label_formatter(&|v| format!("{v:.3e}"))
                    .draw()?;
            }
            let series = values.iter().enumerate().map(|(i, v)| (i as f64, *v));
            chart.draw_series(LineSeries::new(series, &color))?;
        }
        root.present()?;
    }
    encode_png(&buffer, style.width, style.height)
}
fn padded_bounds(values: &[f64]) -> (f64, f64) {
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let span = max - min;
    // Avoid a zero-height axis.
    let pad = if span > 0.0 {
        span * 0.1
    } else {
        (max.abs() * 0.01).max(f64::MIN_POSITIVE)
    };
    (min - pad, max + pad)
}
fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, MeterError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| MeterError::Plot("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
