use std::fmt::Write;

use crate::bank::{AgePrediction, BedsSeries, Outcome, RequestPoint, SatisfactionTrend, StayAgeModel};
use crate::dashboard::DashboardContext;
use crate::query::{join_services, SatisfactionView};
use crate::stats::{round_to, AnovaTable, TukeyRow};

fn unavailable<T>(output: &mut String, outcome: &Outcome<T>) -> bool {
    if let Some(err) = outcome.error() {
        let _ = writeln!(output, "Cannot compute: {err}");
        return true;
    }
    false
}

fn fmt_opt(value: Option<f64>, decimals: i32) -> String {
    match value {
        Some(v) if v.is_finite() => format!("{}", round_to(v, decimals)),
        Some(v) => format!("{v}"),
        None => String::new(),
    }
}

pub fn render_beds(series: &[BedsSeries]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "| service | n | min | q1 | median | q3 | max | mean |");
    let _ = writeln!(output, "|---|---|---|---|---|---|---|---|");
    for s in series {
        let b = &s.summary;
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} | {} | {} | {} | {:.2} |",
            s.service, b.count, b.min, b.q1, b.median, b.q3, b.max, b.mean
        );
    }
    output
}

pub fn render_anova(outcome: &Outcome<AnovaTable>) -> String {
    let mut output = String::new();
    if unavailable(&mut output, outcome) {
        return output;
    }
    if let Some(table) = outcome.ready() {
        let _ = writeln!(output, "`{}` (type II)", table.formula);
        let _ = writeln!(output);
        let _ = writeln!(output, "| term | sum_sq | df | F | PR(>F) |");
        let _ = writeln!(output, "|---|---|---|---|---|");
        for row in &table.rows {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} |",
                row.term,
                round_to(row.sum_sq, 4),
                row.df,
                fmt_opt(row.f_value, 4),
                fmt_opt(row.p_value, 4)
            );
        }
    }
    output
}

pub fn render_tukey(outcome: &Outcome<Vec<TukeyRow>>) -> String {
    let mut output = String::new();
    if unavailable(&mut output, outcome) {
        return output;
    }
    if let Some(rows) = outcome.ready() {
        let _ = writeln!(output, "| group1 | group2 | meandiff | p-adj | lower | upper | reject |");
        let _ = writeln!(output, "|---|---|---|---|---|---|---|");
        for row in rows {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {} | {} | {} |",
                row.group1,
                row.group2,
                round_to(row.meandiff, 3),
                round_to(row.p_adj, 3),
                round_to(row.lower, 3),
                round_to(row.upper, 3),
                row.reject
            );
        }
    }
    output
}

pub fn render_satisfaction(outcome: &Outcome<SatisfactionView>) -> String {
    let mut output = String::new();
    if unavailable(&mut output, outcome) {
        return output;
    }
    match outcome.ready() {
        Some(SatisfactionView::NoSelection) | None => {
            let _ = writeln!(output, "No services selected.");
        }
        Some(SatisfactionView::Fitted(model)) => {
            let selected = model.services.iter().copied().collect();
            let _ = writeln!(
                output,
                "`{}` on {} patients ({})",
                model.fit.spec.formula(),
                model.scatter.len(),
                join_services(&selected)
            );
            let _ = writeln!(output);
            let _ = writeln!(output, "| term | Coef. | Std.Err. | t | P>\\|t\\| |");
            let _ = writeln!(output, "|---|---|---|---|---|");
            for c in model.rounded_coefficients() {
                let _ = writeln!(
                    output,
                    "| {} | {} | {} | {} | {} |",
                    c.term, c.coef, c.std_err, c.t_value, c.p_value
                );
            }
            let _ = writeln!(output);
            for line in &model.trend_lines {
                if let (Some(first), Some(last)) = (line.points.first(), line.points.last()) {
                    let _ = writeln!(
                        output,
                        "- {} trend: {:.2} at {} days to {:.2} at {} days",
                        line.service, first.y, first.x, last.y, last.x
                    );
                }
            }
        }
    }
    output
}

pub fn render_satisfaction_trend(outcome: &Outcome<SatisfactionTrend>) -> String {
    let mut output = String::new();
    if unavailable(&mut output, outcome) {
        return output;
    }
    if let Some(trend) = outcome.ready() {
        if let Some(slope) = trend.fit.coefficient("stay_days") {
            let _ = writeln!(
                output,
                "Overall slope {:.3} per day (p = {:.3}), R-squared {:.3}",
                slope.coef, slope.p_value, trend.fit.r_squared
            );
        }
        let _ = writeln!(output, "LOWESS trend at {} distinct stay lengths", trend.smoothed.len());
    }
    output
}

pub fn render_predictions(rows: &[AgePrediction]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "| age | predicted_days | ci_lower | ci_upper |");
    let _ = writeln!(output, "|---|---|---|---|");
    for row in rows {
        let _ = writeln!(
            output,
            "| {} | {:.2} | {:.2} | {:.2} |",
            row.age, row.predicted_days, row.ci_lower, row.ci_upper
        );
    }
    output
}

pub fn render_stay_age(outcome: &Outcome<StayAgeModel>) -> String {
    let mut output = String::new();
    if unavailable(&mut output, outcome) {
        return output;
    }
    if let Some(model) = outcome.ready() {
        let _ = writeln!(output, "```");
        let _ = write!(output, "{}", model.summary);
        let _ = writeln!(output, "```");
        let _ = writeln!(output);
        output.push_str(&render_predictions(&model.fixed_predictions));
    }
    output
}

pub fn render_age_prediction(outcome: &Outcome<AgePrediction>) -> String {
    let mut output = String::new();
    if unavailable(&mut output, outcome) {
        return output;
    }
    if let Some(row) = outcome.ready() {
        output.push_str(&render_predictions(std::slice::from_ref(row)));
    }
    output
}

pub fn render_requests(points: &[RequestPoint]) -> String {
    let mut output = String::new();
    let _ = writeln!(output, "| week | service | patients_request |");
    let _ = writeln!(output, "|---|---|---|");
    for point in points {
        let _ = writeln!(
            output,
            "| {} | {} | {} |",
            point.week, point.service, point.patients_request
        );
    }
    output
}

pub fn build_report(
    context: &DashboardContext,
    satisfaction: &Outcome<SatisfactionView>,
    age_prediction: &Outcome<AgePrediction>,
) -> String {
    let bank = &context.bank;
    let mut output = String::new();

    let _ = writeln!(output, "# Hospital Bed Utilisation Report");
    let _ = writeln!(
        output,
        "{} patients, {} weekly service rows, {} staff",
        context.data.patients.len(),
        context.data.services_weekly.len(),
        context.data.staff.len()
    );
    let _ = writeln!(output);

    let sections: [(&str, String); 8] = [
        ("Beds used per week by service", render_beds(&bank.beds_by_service)),
        ("ANOVA", render_anova(&bank.anova)),
        ("Tukey HSD (95%)", render_tukey(&bank.tukey)),
        ("Satisfaction vs stay", render_satisfaction_trend(&bank.satisfaction_trend)),
        ("Satisfaction vs stay by service", render_satisfaction(satisfaction)),
        ("Stay vs age", render_stay_age(&bank.stay_age)),
        ("Prediction at selected age", render_age_prediction(age_prediction)),
        ("Patient requests by week", render_requests(&bank.weekly_requests)),
    ];

    for (title, body) in sections {
        let _ = writeln!(output, "## {title}");
        let _ = writeln!(output);
        output.push_str(&body);
        let _ = writeln!(output);
    }
    output
}
