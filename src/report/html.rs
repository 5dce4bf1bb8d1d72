use std::collections::BTreeMap;

use maud::{html, PreEscaped, DOCTYPE};

use crate::report::plots::plot_fold_metric;
use crate::stats::StatReport;

const PLOTLY_JS: &str = "https://cdn.plot.ly/plotly-2.12.1.min.js";

const STYLE: &str = "body { font-family: sans-serif; margin: 2em; } \
    table { border-collapse: collapse; } \
    th, td { border: 1px solid #ccc; padding: 4px 10px; text-align: right; } \
    th:first-child, td:first-child { text-align: left; } \
    tr.unstable td { color: #a33; }";

fn fmt(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| format!("{:.3}", v))
}

/// Self-contained HTML summary of a result map.
pub fn render_html(results: &BTreeMap<String, StatReport>) -> String {
    let plot = plot_fold_metric(results, "Per-fold performance");
    let generated = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

    let markup = html! {
        (DOCTYPE)
        html {
            head {
                meta charset="utf-8";
                title { "Unbiased accuracy report" }
                script src=(PLOTLY_JS) {}
                style { (PreEscaped(STYLE)) }
            }
            body {
                h1 { "Unbiased accuracy report" }
                p { "Generated " (generated) }
                table {
                    thead {
                        tr {
                            th { "Learner" }
                            th { "CA" }
                            th { "MCC" }
                            th { "Q2" }
                            th { "RMSE" }
                            th { "Stability" }
                            th { "Stable" }
                            th { "Alert" }
                        }
                    }
                    tbody {
                        @for (name, report) in results {
                            tr class=(if report.stable { "stable" } else { "unstable" }) {
                                td { (name) }
                                @if report.is_placeholder() {
                                    td colspan="7" { "failed, no statistics" }
                                } @else {
                                    td { (fmt(report.ca)) }
                                    td { (fmt(report.mcc)) }
                                    td { (fmt(report.q2)) }
                                    td { (fmt(report.rmse)) }
                                    td { (fmt(report.stability_value)) }
                                    td { (if report.stable { "yes" } else { "no" }) }
                                    td { (report.user_alert.as_deref().unwrap_or("")) }
                                }
                            }
                        }
                    }
                }
                (PreEscaped(plot.to_inline_html(Some("fold-metric"))))
            }
        }
    };
    markup.into_string()
}
