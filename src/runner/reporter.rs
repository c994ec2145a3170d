use colored::{ColoredString, Colorize};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use std::fmt::Write as _;

use crate::Result;
use crate::contract::{ContractReport, FindingKind};
use crate::perf::PerformanceReport;
use crate::runner::types::{ExecutionResult, RunResult, RunSummary};
use crate::utils::{ResponseFormat, ResponseFormatter};

/// 运行报告：终端文本与 JSON
pub struct TestReporter {
    verbose: bool,
    color: bool,
    formatter: ResponseFormatter,
}

impl TestReporter {
    pub fn new(verbose: bool) -> Self {
        let format = if verbose {
            ResponseFormat::Verbose
        } else {
            ResponseFormat::Compact
        };

        Self {
            verbose,
            color: true,
            formatter: ResponseFormatter::new(format),
        }
    }

    /// 关闭颜色，用于写入文件
    pub fn plain(mut self) -> Self {
        self.color = false;
        self.formatter = self.formatter.with_color(false);
        self
    }

    fn paint(&self, text: &str, style: impl Fn(&str) -> ColoredString) -> String {
        if self.color {
            style(text).to_string()
        } else {
            text.to_string()
        }
    }

    /// 打印单个执行结果
    pub fn print_result(&self, result: &ExecutionResult) {
        print!("{}", self.render_result(result));
    }

    pub fn render_result(&self, result: &ExecutionResult) -> String {
        let mut out = String::new();
        let tag = result
            .chaos_case
            .map(|c| format!(" [chaos:{}]", c))
            .unwrap_or_default();

        if result.skipped {
            let _ = writeln!(
                out,
                " {} [{}] {} {} {}{} {}",
                self.paint("⊘", |s| s.dimmed()),
                result.iteration + 1,
                result.request_name,
                self.paint(&result.method, |s| s.cyan()),
                result.url,
                tag,
                self.paint(
                    &format!("(skipped: {})", result.skip_reason.as_deref().unwrap_or("")),
                    |s| s.dimmed()
                )
            );
            return out;
        }

        let passed = result.is_successful();
        let symbol = if passed {
            self.paint("✓", |s| s.green())
        } else {
            self.paint("✗", |s| s.red())
        };
        let _ = writeln!(
            out,
            " {} [{}] {} {} {}{} ({}ms)",
            symbol,
            result.iteration + 1,
            result.request_name,
            self.paint(&result.method, |s| s.cyan()),
            result.url,
            tag,
            result.duration_ms
        );

        if self.verbose || !passed {
            for line in self.formatter.format(&result.response).lines() {
                let _ = writeln!(out, "   {}", line);
            }
            out.push('\n');
        }

        if !result.assertions.is_empty() {
            let _ = writeln!(out, "   Assertions:");
            for assertion in &result.assertions {
                if assertion.passed {
                    let _ = writeln!(out, "     {} {}", self.paint("✓", |s| s.green()), assertion.name);
                } else {
                    let _ = writeln!(out, "     {} {}", self.paint("✗", |s| s.red()), assertion.name);
                    let _ = writeln!(out, "       {}", self.paint(&assertion.message, |s| s.red()));
                }
            }
            out.push('\n');
        }

        if self.verbose {
            for entry in &result.logs {
                let _ = writeln!(
                    out,
                    "   {} [{} {:?}] {}",
                    self.paint("log", |s| s.dimmed()),
                    entry.script,
                    entry.level,
                    entry.message
                );
            }
        }
        out
    }

    /// 打印运行开始
    pub fn print_header(&self, collection_name: &str, total: usize) {
        println!("\nRunning {} dispatches from {}...\n", total, collection_name.bold());
    }

    /// 打印摘要、门禁结果与退出码
    pub fn print_summary(&self, run: &RunResult) {
        print!("{}", self.render_summary(run));
    }

    pub fn render_summary(&self, run: &RunResult) -> String {
        let mut out = String::new();
        let rule = "━".repeat(50);
        let _ = writeln!(out, "\n{}", rule);
        let _ = writeln!(out, "{}", self.paint("Summary", |s| s.bold()));
        let _ = writeln!(out, "{}", rule);
        self.write_counts(&mut out, &run.summary);

        if run.cancelled {
            let _ = writeln!(out, "  {}", self.paint("Run was cancelled", |s| s.yellow()));
        }
        if let Some(contract) = &run.contract {
            self.write_contract(&mut out, contract);
        }
        if let Some(perf) = &run.performance {
            self.write_performance(&mut out, perf);
        }

        let code = run.exit_code();
        let code_text = format!("Exit code: {}", code);
        let _ = writeln!(
            out,
            "\n  {}\n",
            if code == 0 {
                self.paint(&code_text, |s| s.green().bold())
            } else {
                self.paint(&code_text, |s| s.red().bold())
            }
        );
        out
    }

    /// 完整文本报告
    pub fn render(&self, run: &RunResult) -> String {
        let mut out = format!("Collection: {} ({})\n\n", run.collection_name, run.collection_id);
        for result in &run.results {
            out.push_str(&self.render_result(result));
        }
        out.push_str(&self.render_summary(run));
        out
    }

    fn write_counts(&self, out: &mut String, summary: &RunSummary) {
        let _ = writeln!(
            out,
            "  {}: {} passed, {} failed, {} skipped, {} total",
            self.paint("Requests", |s| s.bold()),
            self.paint(&summary.passed_requests.to_string(), |s| s.green()),
            self.paint(&summary.failed_requests.to_string(), |s| s.red()),
            self.paint(&summary.skipped_requests.to_string(), |s| s.dimmed()),
            summary.total_requests
        );
        if summary.total_assertions > 0 {
            let _ = writeln!(
                out,
                "  {}: {} passed, {} failed, {} total",
                self.paint("Assertions", |s| s.bold()),
                self.paint(&summary.passed_assertions.to_string(), |s| s.green()),
                self.paint(&summary.failed_assertions.to_string(), |s| s.red()),
                summary.total_assertions
            );
        }
        let _ = writeln!(
            out,
            "  {}: {:.3}s",
            self.paint("Duration", |s| s.bold()),
            summary.total_duration_ms as f64 / 1000.0
        );
    }

    fn write_contract(&self, out: &mut String, report: &ContractReport) {
        let status = if report.gate_failed {
            self.paint("FAILED", |s| s.red().bold())
        } else {
            self.paint("passed", |s| s.green())
        };
        let _ = writeln!(
            out,
            "\n  {}: {} checked, {} findings, gate {}",
            self.paint("Contract", |s| s.bold()),
            report.checked,
            report.findings.len(),
            status
        );

        let breaking: Vec<_> = report.breaking().collect();
        if !breaking.is_empty() {
            let _ = writeln!(out, "  Breaking changes:");
            for finding in breaking {
                let _ = writeln!(
                    out,
                    "    {} {}: {}",
                    self.paint("✗", |s| s.red()),
                    finding.request_name,
                    finding.reasons.join("; ")
                );
            }
        }

        let drift: Vec<_> = report.non_breaking().collect();
        if !drift.is_empty() {
            let _ = writeln!(out, "  Non-breaking drift:");
            for finding in drift {
                let label = match finding.kind {
                    FindingKind::New => "new",
                    FindingKind::Changed => "changed",
                };
                let _ = writeln!(out, "    • {} ({}): {}", finding.request_name, label, finding.current);
            }
        }
        if report.baseline_updated {
            let _ = writeln!(out, "  Contract baseline updated");
        }
    }

    fn write_performance(&self, out: &mut String, report: &PerformanceReport) {
        let m = &report.metrics;
        let mut table = Table::new();
        table.load_preset(UTF8_FULL).set_header(vec![
            "Request", "Samples", "Avg (ms)", "P95 (ms)",
        ]);
        for request in &m.per_request {
            table.add_row(vec![
                Cell::new(&request.request_name),
                Cell::new(request.samples),
                Cell::new(format!("{:.2}", request.average)),
                Cell::new(request.p95),
            ]);
        }
        table.add_row(vec![
            Cell::new("All"),
            Cell::new(m.samples),
            Cell::new(format!("{:.2}", m.average)),
            Cell::new(m.p95),
        ]);

        let _ = writeln!(out, "\n  {}:", self.paint("Performance", |s| s.bold()));
        let _ = writeln!(
            out,
            "  min {}ms  p50 {}ms  p95 {}ms  p99 {}ms  max {}ms",
            m.min, m.p50, m.p95, m.p99, m.max
        );
        let _ = writeln!(out, "{}", table);

        match (&report.baseline, report.regression_pct) {
            (Some(baseline), Some(pct)) => {
                let line = format!(
                    "  p95 vs baseline {}ms: {:+.2}% (threshold {}%)",
                    baseline.p95, pct, report.threshold_pct
                );
                let _ = writeln!(
                    out,
                    "{}",
                    if report.gate_failed {
                        self.paint(&line, |s| s.red())
                    } else {
                        self.paint(&line, |s| s.green())
                    }
                );
            }
            (Some(_), None) => {
                let _ = writeln!(out, "  Baseline p95 is 0; regression not computed");
            }
            (None, _) => {
                let _ = writeln!(out, "  No performance baseline recorded");
            }
        }
        if report.baseline_updated {
            let _ = writeln!(out, "  Performance baseline updated");
        }
    }

    /// 机器可读报告
    pub fn to_json(run: &RunResult) -> Result<String> {
        Ok(serde_json::to_string_pretty(run)?)
    }
}

impl Default for TestReporter {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Response;
    use crate::perf::{PerformanceLab, PerformanceMetrics};
    use crate::runner::RunMode;
    use crate::variable::DataRow;
    use chrono::Utc;

    fn run(results: Vec<ExecutionResult>) -> RunResult {
        RunResult {
            collection_id: "c1".to_string(),
            collection_name: "demo".to_string(),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            mode: RunMode::Serial,
            iterations: 1,
            cancelled: false,
            summary: RunSummary::from_results(&results),
            results,
            contract: None,
            performance: None,
        }
    }

    fn result(status: u16) -> ExecutionResult {
        ExecutionResult {
            request_id: "r1".to_string(),
            request_name: "List".to_string(),
            method: "GET".to_string(),
            url: "http://x/list".to_string(),
            response: Response::new(status, "[]"),
            assertions: Vec::new(),
            iteration: 0,
            data_row: DataRow::new(),
            duration_ms: 12,
            skipped: false,
            skip_reason: None,
            chaos_case: None,
            logs: Vec::new(),
        }
    }

    #[test]
    fn test_text_report_has_exit_code() {
        let reporter = TestReporter::new(false).plain();
        assert!(reporter.render(&run(vec![result(200)])).contains("Exit code: 0"));

        let text = reporter.render(&run(vec![result(500)]));
        assert!(text.contains("✗ [1] List GET http://x/list"));
        assert!(text.contains("Exit code: 1"));
    }

    #[test]
    fn test_perf_gate_in_report() {
        let mut report = run(vec![result(200)]);
        let metrics = PerformanceMetrics {
            p95: 12,
            ..PerformanceMetrics::default()
        };
        report.performance = Some(PerformanceLab::default().compare(metrics, None));

        let text = TestReporter::new(false).plain().render_summary(&report);
        assert!(text.contains("No performance baseline recorded"));
        assert!(text.contains("Exit code: 0"));
    }

    #[test]
    fn test_json_report() {
        let json = TestReporter::to_json(&run(vec![result(200)])).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["summary"]["passedRequests"], 1);
        assert_eq!(value["results"][0]["response"]["status"], 200);
    }
}
