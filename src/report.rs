//! Reporting: console summary, CSV exports and the Plotly chart sink.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::analysis::{CohortComparison, Outcome};
use crate::sim_core::timestamp;
use crate::simulation::{DailyAggregate, SimulationOutcome};
use crate::Result;

pub const REPORT_FILE: &str = "treatment_report.html";
pub const AGGREGATES_FILE: &str = "aggregates.csv";
pub const PATIENTS_FILE: &str = "patients.csv";
pub const EVENTS_FILE: &str = "events.csv";

/// Consumer of the daily series. Rendering format is the sink's business.
pub trait ChartSink {
    fn render(&mut self, aggregates: &[DailyAggregate], summary: &str) -> Result<()>;
}

/// Writes a standalone Plotly HTML page
pub struct HtmlReport {
    path: PathBuf,
}

impl HtmlReport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HtmlReport { path: path.into() }
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl ChartSink for HtmlReport {
    fn render(&mut self, aggregates: &[DailyAggregate], summary: &str) -> Result<()> {
        let html = build_report(summary, aggregates);
        File::create(&self.path)?.write_all(html.as_bytes())?;
        tracing::info!(path = %self.path.display(), "wrote chart");
        Ok(())
    }
}

// === CSV ===

pub fn write_csv<T: Serialize, W: Write>(writer: W, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write aggregates, final patient records and the firing log under `dir`
pub fn write_tables(dir: &Path, outcome: &SimulationOutcome) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let targets = [
        dir.join(AGGREGATES_FILE),
        dir.join(PATIENTS_FILE),
        dir.join(EVENTS_FILE),
    ];
    write_csv(File::create(&targets[0])?, &outcome.aggregates)?;
    write_csv(File::create(&targets[1])?, &outcome.final_records)?;
    write_csv(File::create(&targets[2])?, &outcome.events)?;
    Ok(targets.to_vec())
}

// === CONSOLE ===

pub fn summary_text(outcome: &SimulationOutcome, comparisons: &[(Outcome, Result<CohortComparison>)]) -> String {
    let mut out = String::with_capacity(2048);
    out.push_str(&format!("{}\n", timestamp()));
    out.push_str("==========================================\n");
    out.push_str("   PARAMETERS\n");
    out.push_str("==========================================\n");
    out.push_str(&format!("Patients:    {}\n", outcome.final_records.len()));
    out.push_str(&format!("Horizon:     {} days\n", outcome.horizon_days));
    out.push_str(&format!("Policy:      {}\n", outcome.policy));
    out.push_str(&format!("Seed:        {}\n", outcome.seed));

    out.push_str("\n==========================================\n");
    out.push_str("   RESULTS\n");
    out.push_str("==========================================\n");
    out.push_str(&format!("Sessions delivered: {}\n", outcome.events.len()));
    if let (Some(first), Some(last)) = (outcome.aggregates.first(), outcome.aggregates.last()) {
        out.push_str(&format!("Mean pain:          {:.2} (day {}) -> {:.2} (day {})\n",
            first.mean_pain, first.day, last.mean_pain, last.day));
        out.push_str(&format!("Mean mobility:      {:.2} (day {}) -> {:.2} (day {})\n",
            first.mean_mobility, first.day, last.mean_mobility, last.day));
        out.push_str(&format!("Fallbacks:          {}/{}\n", last.fallback_count, outcome.final_records.len()));
    }

    for (outcome_kind, result) in comparisons {
        out.push_str(&format!("\n--- Cohorts: final {} ---\n", outcome_kind));
        match result {
            Ok(cmp) => {
                for c in [&cmp.physiotherapy, &cmp.anti_inflammatory] {
                    out.push_str(&format!("{:<18} n={:<4} mean={:.3} sd={:.3}\n",
                        c.treatment.label(), c.n, c.mean, c.sd));
                }
                out.push_str(&format!("t-test ({}): t={:.4} df={:.1} p={:.4}\n",
                    cmp.test.variance, cmp.test.statistic, cmp.test.degrees_of_freedom, cmp.test.p_value));
            }
            Err(e) => out.push_str(&format!("No statistic: {}\n", e)),
        }
    }
    out
}

// === HTML ===

pub fn build_report(console: &str, aggregates: &[DailyAggregate]) -> String {
    let days: Vec<u32> = aggregates.iter().map(|a| a.day).collect();
    let pain: Vec<f64> = aggregates.iter().map(|a| a.mean_pain).collect();
    let mobility: Vec<f64> = aggregates.iter().map(|a| a.mean_mobility).collect();
    let fallbacks: Vec<usize> = aggregates.iter().map(|a| a.fallback_count).collect();
    let x_js = format!("{:?}", days);

    format!(r#"<!DOCTYPE html>
<html><head><meta charset="utf-8"><title>Treatment Effects Report</title>
<script src="https://cdn.plot.ly/plotly-2.35.0.min.js"></script>
<style>
body{{font-family:system-ui,-apple-system,sans-serif;max-width:900px;margin:0 auto;padding:20px;background:#fafafa}}
h1{{color:#1a1a2e}}h2,h3{{color:#16213e}}
pre{{background:#fff;padding:15px;border-radius:8px;border:1px solid #ddd;overflow-x:auto;font-size:13px}}
.plot{{background:#fff;border-radius:8px;padding:15px;margin:20px 0;box-shadow:0 1px 3px rgba(0,0,0,0.1)}}
</style></head><body>
<h1>Treatment Effects Over Time</h1>
<h2>Console Output</h2>
<pre>{}</pre>
<h2>Visualizations</h2>
<div class="plot"><div id="p1" style="height:400px"></div></div>
<div class="plot"><div id="p2" style="height:300px"></div></div>
<script>
Plotly.newPlot('p1',[
  {{type:'scatter',mode:'lines',x:{},y:{:?},line:{{color:'#d62728',width:2}},name:'Average Pain Level'}},
  {{type:'scatter',mode:'lines',x:{},y:{:?},line:{{color:'#1f77b4',width:2}},name:'Average Mobility Score'}}
],{{xaxis:{{title:'Days'}},yaxis:{{title:'Score'}},title:'Treatment Effects Over Time'}});
Plotly.newPlot('p2',[{{type:'scatter',mode:'lines',x:{},y:{:?},line:{{color:'steelblue',width:2,shape:'hv'}},name:'Fallbacks'}}],{{xaxis:{{title:'Days'}},yaxis:{{title:'Patients'}},title:'Cumulative Fallbacks'}});
</script></body></html>"#,
        console,
        x_js, pain, x_js, mobility,
        x_js, fallbacks
    )
}
