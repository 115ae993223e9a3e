use plotters::prelude::*;

use crate::{bounds, PlotGather, PlotResult};

/// Plot observed responses against the train and dev predictions
pub fn plot(gather: &PlotGather, filename: &str, dims: (u32, u32)) -> PlotResult {
    info!(
        "n_targets: {}, n_train_preds: {}, n_dev_preds: {}",
        gather.targets().len(),
        gather.train_predictions().len(),
        gather.dev_predictions().len()
    );
    let (x_range, y_range) = bounds([gather.targets(), gather.train_predictions(), gather.dev_predictions()])
        .ok_or("nothing to plot")?;

    let root_area = BitMapBackend::new(filename, dims).into_drawing_area();
    root_area.fill(&WHITE)?;
    let root_area = root_area.titled(filename, ("sans-serif", 20).into_font())?;

    let mut cc0 = ChartBuilder::on(&root_area)
        .margin(5)
        .set_all_label_area_size(50)
        .caption("response", ("sans-serif", 30).into_font().with_color(BLACK))
        .build_cartesian_2d(x_range, y_range)?;
    cc0.configure_mesh()
        .x_labels(20)
        .y_labels(20)
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.3}", v))
        .draw()?;

    cc0.draw_series(LineSeries::new(gather.targets().clone(), &BLACK))?
        .label("observed")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));
    cc0.draw_series(LineSeries::new(gather.train_predictions().clone(), &RED))?
        .label("train_preds")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], RED));
    cc0.draw_series(LineSeries::new(gather.dev_predictions().clone(), &GREEN))?
        .label("dev_preds")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], GREEN));
    cc0.configure_series_labels().border_style(BLACK).draw()?;
    root_area.present()?;

    info!("successfully plotted to {}", filename);
    Ok(())
}
