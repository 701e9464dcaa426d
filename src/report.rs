//! Report rendering
//!
//! Serializes a [`ComparisonReport`] for humans (text, HTML) and machines
//! (JSON in the documented report schema). Rendering is a pure function
//! of the report; exit-code policy lives with the CLI.

#![forbid(unsafe_code)]

use std::fmt::Write as _;

use crate::runner::ComparisonReport;

/// Plain-text summary, one line per feature.
pub fn render_text(report: &ComparisonReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "SkewSentry check");
    let _ = writeln!(out, "OK: {}", report.ok);
    let _ = writeln!(out, "Keys: {}", report.keys.join(", "));
    let _ = writeln!(
        out,
        "Alignment: {} missing in online, {} missing in offline",
        report.alignment.missing_in_online_count, report.alignment.missing_in_offline_count
    );
    let _ = writeln!(out, "Per-feature results:");
    for r in &report.per_feature {
        if r.missing {
            let _ = writeln!(out, "  {}: MISSING from producer output", r.feature_name);
            continue;
        }
        let _ = write!(
            out,
            "  {}: mismatch_rate={:.4} rows={}",
            r.feature_name, r.mismatch_rate, r.num_rows_compared
        );
        if let Some(mad) = r.mean_absolute_difference {
            let _ = write!(out, " mean_abs_diff={mad:.6}");
        }
        if let Some(unknowns) = &r.unknown_categories {
            if !unknowns.offline_unknown.is_empty() || !unknowns.online_unknown.is_empty() {
                let _ = write!(
                    out,
                    " unknown_offline=[{}] unknown_online=[{}]",
                    join(&unknowns.offline_unknown),
                    join(&unknowns.online_unknown)
                );
            }
        }
        let _ = writeln!(out);
    }
    out
}

/// Pretty-printed JSON in the report schema.
pub fn render_json(report: &ComparisonReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Standalone HTML page. `json_href`, when given, links the machine
/// artifact from the page header.
pub fn render_html(report: &ComparisonReport, json_href: Option<&str>) -> String {
    let verdict = if report.ok { "PASS" } else { "FAIL" };
    let verdict_color = if report.ok { "#2e7d32" } else { "#c62828" };

    let mut rows = String::new();
    for r in &report.per_feature {
        let status = if r.missing {
            "missing".to_string()
        } else {
            format!("{:.4}", r.mismatch_rate)
        };
        let mad = r
            .mean_absolute_difference
            .map_or(String::new(), |m| format!("{m:.6}"));
        let unknowns = r.unknown_categories.as_ref().map_or(String::new(), |u| {
            format!(
                "offline: [{}] online: [{}]",
                join(&u.offline_unknown),
                join(&u.online_unknown)
            )
        });
        let _ = writeln!(
            rows,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&r.feature_name),
            r.num_rows_compared,
            status,
            mad,
            escape(&unknowns)
        );
    }

    let json_link = json_href.map_or(String::new(), |href| {
        format!("<p><a href=\"{}\">JSON report</a></p>", escape(href))
    });

    format!(
        r#"<!doctype html>
<html>
<head><meta charset="utf-8"><title>SkewSentry Report</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
table {{ border-collapse: collapse; }}
td, th {{ border: 1px solid #ccc; padding: 0.3rem 0.6rem; text-align: left; }}
.verdict {{ color: {verdict_color}; font-weight: bold; }}
</style></head>
<body>
<h1>SkewSentry Report</h1>
<p>Verdict: <span class="verdict">{verdict}</span></p>
{json_link}
<h2>Alignment</h2>
<p>Missing in online: {mo} &middot; Missing in offline: {mf}</p>
<h2>Per-feature</h2>
<table>
<tr><th>Feature</th><th>Rows</th><th>Mismatch rate</th><th>Mean abs diff</th><th>Unknown categories</th></tr>
{rows}</table>
</body>
</html>
"#,
        mo = report.alignment.missing_in_online_count,
        mf = report.alignment.missing_in_offline_count,
    )
}

fn join(set: &std::collections::BTreeSet<String>) -> String {
    set.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

// ============================================================================
// Tests
// ============================================================================
