//! Line plots of receptive field estimates, predictions and optimization traces

#[macro_use]
extern crate log;

mod filter_plot;
mod plot;
mod plot_gather;
mod trace_plot;

pub use filter_plot::{plot_filters, FilterLine};
pub use plot::plot;
pub use plot_gather::PlotGather;
pub use trace_plot::plot_traces;

pub type Series = Vec<(f64, f64)>;

/// Errors bubbling up from the drawing backend
pub type PlotResult = Result<(), Box<dyn std::error::Error>>;

/// Axis ranges covering every point of every series, padded when degenerate
pub(crate) fn bounds<'a, I>(series: I) -> Option<(std::ops::Range<f64>, std::ops::Range<f64>)>
where
    I: IntoIterator<Item = &'a Series>,
{
    let mut points = series.into_iter().flatten().filter(|(x, y)| x.is_finite() && y.is_finite());
    let first = points.next()?;
    let (mut x_min, mut x_max, mut y_min, mut y_max) = (first.0, first.0, first.1, first.1);
    for (x, y) in points {
        x_min = x_min.min(*x);
        x_max = x_max.max(*x);
        y_min = y_min.min(*y);
        y_max = y_max.max(*y);
    }
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }
    if y_max <= y_min {
        y_min -= 0.5;
        y_max += 0.5;
    }
    Some((x_min..x_max, y_min..y_max))
}
