use std::collections::BTreeMap;

use plotly::layout::{Axis, BarMode, Layout};
use plotly::{Bar, Plot};

use crate::data_handling::ResponseType;
use crate::stats::StatReport;

/// Grouped bar chart of the per-fold metric (CA or Q²) of every learner.
///
/// Placeholder reports and folds with an undefined metric are left out.
pub fn plot_fold_metric(results: &BTreeMap<String, StatReport>, title: &str) -> Plot {
    let mut plot = Plot::new();
    let mut metric_name = "Metric";

    for (name, report) in results {
        let (Some(response_type), Some(folds)) = (report.response_type, &report.fold_stat) else {
            continue;
        };
        metric_name = match response_type {
            ResponseType::Classification => "CA",
            ResponseType::Regression => "Q2",
        };
        let (x, y): (Vec<String>, Vec<f64>) = folds
            .iter()
            .filter_map(|f| {
                let value = match response_type {
                    ResponseType::Classification => f.ca,
                    ResponseType::Regression => f.q2,
                };
                value.map(|v| (format!("Fold {}", f.fold), v))
            })
            .unzip();
        plot.add_trace(Bar::new(x, y).name(name));
    }

    plot.set_layout(
        Layout::new()
            .title(title)
            .bar_mode(BarMode::Group)
            .x_axis(Axis::new().title("Outer fold"))
            .y_axis(Axis::new().title(metric_name)),
    );
    plot
}
