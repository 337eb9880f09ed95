//! Aggregation of analysis results across methods.
//!
//! Each analysis method produces a [`MethodRun`]: per-server and per-flow
//! delay bounds plus its execution time. The aggregator combines runs into a
//! single report with, per flow, the bound of every method and the best
//! (minimum) across methods, all rendered in a common unit chosen so the
//! numbers stay in the 1-999 range when possible. A failed method records
//! infinite bounds and never prevents the others from being reported.

use std::collections::BTreeMap;

use serde::Serialize;
use web_time::Instant;

use saihu_core::{decide_min_multiplier, multiplier_factor};

/// Identification of one analysis run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MethodId {
    /// The producing tool ("xtfa", "lp").
    pub tool: String,
    /// The method within the tool ("TFA", "TFA++", "SFA", "PLP", "ELP").
    pub method: String,
}

impl std::fmt::Display for MethodId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.tool, self.method)
    }
}

/// The raw results of one method over one network (values in seconds).
#[derive(Debug, Clone, Serialize)]
pub struct MethodRun {
    pub id: MethodId,
    /// Per-server delay bound, by server name.
    pub server_delays: BTreeMap<String, f64>,
    /// Per-flow end-to-end delay bound, by flow name.
    pub flow_delays: BTreeMap<String, f64>,
    /// Wall-clock execution time in seconds.
    pub exec_time: f64,
}

impl MethodRun {
    pub fn new(tool: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            id: MethodId {
                tool: tool.into(),
                method: method.into(),
            },
            server_delays: BTreeMap::new(),
            flow_delays: BTreeMap::new(),
            exec_time: 0.0,
        }
    }

    /// A run where every bound is infinite (method failed or skipped).
    pub fn failed(tool: impl Into<String>, method: impl Into<String>) -> Self {
        Self::new(tool, method)
    }
}

/// Wall-clock stopwatch for one method execution.
pub struct MethodTimer {
    start: Instant,
}

impl Default for MethodTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// The aggregated report over several method runs.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub network: String,
    /// The methods included, in insertion order.
    pub methods: Vec<MethodId>,
    /// Per flow, per method, the end-to-end bound in the common unit.
    pub flow_delays: BTreeMap<String, BTreeMap<String, f64>>,
    /// Per flow, the minimum across methods (common unit).
    pub flow_best: BTreeMap<String, f64>,
    /// Per server, per method, the delay bound (common unit).
    pub server_delays: BTreeMap<String, BTreeMap<String, f64>>,
    /// Per method, the execution time (common time unit).
    pub exec_times: BTreeMap<String, f64>,
    /// SI prefix applied to the flow and server delays (base seconds).
    pub delay_unit: String,
    /// SI prefix applied to the execution times (base seconds).
    pub exec_time_unit: String,
}

impl AnalysisReport {
    /// Aggregate a vector of runs (possibly from different tools on
    /// equivalent encodings of the same network).
    pub fn aggregate(network: impl Into<String>, runs: Vec<MethodRun>) -> Self {
        let delay_prefix = decide_min_multiplier(
            runs.iter().flat_map(|run| {
                run.server_delays
                    .values()
                    .chain(run.flow_delays.values())
                    .copied()
            }),
        );
        let exec_prefix =
            decide_min_multiplier(runs.iter().map(|run| run.exec_time));
        let delay_factor = multiplier_factor(delay_prefix).unwrap_or(1.0);
        let exec_factor = multiplier_factor(exec_prefix).unwrap_or(1.0);

        let mut methods = Vec::new();
        let mut flow_delays: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut flow_best: BTreeMap<String, f64> = BTreeMap::new();
        let mut server_delays: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut exec_times = BTreeMap::new();

        for run in &runs {
            methods.push(run.id.clone());
            let label = run.id.to_string();
            for (flow, value) in &run.flow_delays {
                let scaled = value / delay_factor;
                flow_delays
                    .entry(flow.clone())
                    .or_default()
                    .insert(label.clone(), scaled);
                flow_best
                    .entry(flow.clone())
                    .and_modify(|best| *best = best.min(scaled))
                    .or_insert(scaled);
            }
            for (server, value) in &run.server_delays {
                server_delays
                    .entry(server.clone())
                    .or_default()
                    .insert(label.clone(), value / delay_factor);
            }
            exec_times.insert(label, run.exec_time / exec_factor);
        }

        Self {
            network: network.into(),
            methods,
            flow_delays,
            flow_best,
            server_delays,
            exec_times,
            delay_unit: format!("{delay_prefix}s"),
            exec_time_unit: format!("{exec_prefix}s"),
        }
    }

    /// Render the report as JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Render the report as a plain-text table.
    pub fn to_table(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "network: {} (delays in {})\n",
            self.network, self.delay_unit
        ));
        out.push_str("flow");
        for method in &self.methods {
            out.push_str(&format!("\t{method}"));
        }
        out.push_str("\tbest\n");
        for (flow, per_method) in &self.flow_delays {
            out.push_str(flow);
            for method in &self.methods {
                match per_method.get(&method.to_string()) {
                    Some(value) if value.is_finite() => out.push_str(&format!("\t{value:.4}")),
                    _ => out.push_str("\tinf"),
                }
            }
            match self.flow_best.get(flow) {
                Some(best) if best.is_finite() => out.push_str(&format!("\t{best:.4}\n")),
                _ => out.push_str("\tinf\n"),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(tool: &str, method: &str, f0: f64, time: f64) -> MethodRun {
        let mut run = MethodRun::new(tool, method);
        run.flow_delays.insert("f0".into(), f0);
        run.server_delays.insert("s0".into(), f0 / 2.0);
        run.exec_time = time;
        run
    }

    #[test]
    fn test_best_is_minimum_across_methods() {
        let report = AnalysisReport::aggregate(
            "net",
            vec![run("xtfa", "TFA", 4e-3, 0.1), run("lp", "PLP", 3e-3, 1.0)],
        );
        // common prefix milli: both values stay >= 1
        assert_eq!(report.delay_unit, "ms");
        assert!((report.flow_best["f0"] - 3.0).abs() < 1e-9);
        assert_eq!(report.methods.len(), 2);
    }

    #[test]
    fn test_failed_method_does_not_pollute_best() {
        let mut failed = MethodRun::failed("lp", "ELP");
        failed.flow_delays.insert("f0".into(), f64::INFINITY);
        let report = AnalysisReport::aggregate("net", vec![run("xtfa", "TFA", 2e-3, 0.1), failed]);
        assert!((report.flow_best["f0"] - 2.0).abs() < 1e-9);
        let table = report.to_table();
        assert!(table.contains("inf"));
    }

    #[test]
    fn test_json_rendering() {
        let report = AnalysisReport::aggregate("net", vec![run("xtfa", "TFA", 1e-3, 0.1)]);
        let json = report.to_json().unwrap();
        assert!(json.contains("\"delay_unit\""));
    }
}
