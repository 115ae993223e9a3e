use plotters::prelude::*;

use crate::{bounds, PlotResult, Series};

/// Plot objective traces (costs per iteration, log evidence per ascent step) against the iteration
pub fn plot_traces(traces: &[(&str, &[f64])], title: &str, filename: &str, dims: (u32, u32)) -> PlotResult {
    let series: Vec<Series> = traces
        .iter()
        .map(|(_, t)| t.iter().enumerate().map(|(i, v)| (i as f64, *v)).collect())
        .collect();
    let (x_range, y_range) = bounds(&series).ok_or("no traces to plot")?;

    let root_area = BitMapBackend::new(filename, dims).into_drawing_area();
    root_area.fill(&WHITE)?;

    let mut cc0 = ChartBuilder::on(&root_area)
        .margin(5)
        .set_all_label_area_size(60)
        .caption(title, ("sans-serif", 30).into_font().with_color(BLACK))
        .build_cartesian_2d(x_range, y_range)?;
    cc0.configure_mesh()
        .x_desc("iteration")
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.2}", v))
        .draw()?;

    for (i, ((label, _), line)) in traces.iter().zip(series).enumerate() {
        let color = Palette99::pick(i).to_rgba();
        cc0.draw_series(LineSeries::new(line, &color))?
            .label(*label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], color));
    }
    cc0.configure_series_labels().border_style(BLACK).draw()?;
    root_area.present()?;

    info!("successfully plotted to {}", filename);
    Ok(())
}
