use plotters::prelude::*;

use crate::{bounds, PlotResult, Series};

/// One filter to draw, with an optional pointwise standard error band
#[derive(Debug, Clone)]
pub struct FilterLine {
    pub label: String,
    pub values: Vec<f64>,
    pub std_errors: Option<Vec<f64>>,
}

impl FilterLine {
    pub fn new(label: &str, values: Vec<f64>) -> Self {
        Self {
            label: label.to_string(),
            values,
            std_errors: None,
        }
    }

    fn series(&self, offset: f64) -> Series {
        self.values
            .iter()
            .enumerate()
            .map(|(i, v)| (i as f64, v + offset * self.std_error(i)))
            .collect()
    }

    fn std_error(&self, i: usize) -> f64 {
        self.std_errors.as_ref().and_then(|s| s.get(i)).copied().unwrap_or(0.0)
    }
}

const PALETTE: [RGBColor; 4] = [BLACK, RED, BLUE, GREEN];

/// Plot filters over their flattened coefficient index.
/// Filters with standard errors get a band of two standard errors on either side.
pub fn plot_filters(filters: &[FilterLine], title: &str, filename: &str, dims: (u32, u32)) -> PlotResult {
    let lines: Vec<Series> = filters
        .iter()
        .flat_map(|f| [f.series(-2.0), f.series(2.0)])
        .collect();
    let (x_range, y_range) = bounds(&lines).ok_or("no filters to plot")?;
    debug!("plotting {} filters to {}", filters.len(), filename);

    let root_area = BitMapBackend::new(filename, dims).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut cc0 = ChartBuilder::on(&root_area)
        .margin(5)
        .set_all_label_area_size(50)
        .caption(title, ("sans-serif", 30).into_font().with_color(BLACK))
        .build_cartesian_2d(x_range, y_range)?;
    cc0.configure_mesh()
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.3}", v))
        .draw()?;

    for (i, filter) in filters.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        if filter.std_errors.is_some() {
            let mut band = filter.series(2.0);
            band.extend(filter.series(-2.0).into_iter().rev());
            cc0.draw_series(std::iter::once(Polygon::new(band, color.mix(0.2))))?;
        }
        cc0.draw_series(LineSeries::new(filter.series(0.0), &color))?
            .label(filter.label.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    cc0.configure_series_labels().border_style(BLACK).draw()?;
    root_area.present()?;

    info!("successfully plotted to {}", filename);
    Ok(())
}
