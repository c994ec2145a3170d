use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::collection::Collection;
use crate::contract::signature::{ContractSignature, required_params};
use crate::runner::ExecutionResult;

/// 单个请求的契约快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractSnapshot {
    pub signature: String,
    /// 本次运行中观察到的所有状态码
    pub status_codes: BTreeSet<u16>,
    pub required_params: BTreeSet<String>,
}

/// 请求 id → 快照
pub type ContractBaseline = BTreeMap<String, ContractSnapshot>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FindingKind {
    New,
    Changed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractFinding {
    pub request_id: String,
    pub request_name: String,
    pub kind: FindingKind,
    pub breaking: bool,
    pub previous: Option<String>,
    pub current: String,
    /// 破坏性变化的原因
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractReport {
    pub checked: usize,
    pub findings: Vec<ContractFinding>,
    pub gate_failed: bool,
    pub baseline_updated: bool,
}

impl ContractReport {
    pub fn breaking(&self) -> impl Iterator<Item = &ContractFinding> {
        self.findings.iter().filter(|f| f.breaking)
    }

    pub fn non_breaking(&self) -> impl Iterator<Item = &ContractFinding> {
        self.findings.iter().filter(|f| !f.breaking)
    }
}

/// 契约守卫
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractGuard {
    /// 严格模式：任何变化都视为门禁失败
    pub strict: bool,
}

impl ContractGuard {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    /// 由本次结果构建快照；每个请求取最后一个可统计结果的签名
    pub fn snapshot(collection: &Collection, results: &[ExecutionResult]) -> ContractBaseline {
        let mut snapshots = ContractBaseline::new();
        for planned in collection.plan() {
            let request = planned.request;
            let measured: Vec<&ExecutionResult> = results
                .iter()
                .filter(|r| r.is_measurable() && r.request_id == request.id)
                .collect();
            let Some(last) = measured.last() else {
                continue;
            };

            snapshots.insert(
                request.id.clone(),
                ContractSnapshot {
                    signature: ContractSignature::from_response(&last.response).to_string(),
                    status_codes: measured.iter().map(|r| r.response.status).collect(),
                    required_params: required_params(request),
                },
            );
        }
        snapshots
    }

    pub fn evaluate(
        &self,
        collection: &Collection,
        baseline: &ContractBaseline,
        current: &ContractBaseline,
    ) -> ContractReport {
        let mut findings = Vec::new();

        for (id, snapshot) in current {
            let request_name = collection
                .find_request(id)
                .map(|r| r.display_name().to_string())
                .unwrap_or_else(|| id.clone());

            let Some(previous) = baseline.get(id) else {
                findings.push(ContractFinding {
                    request_id: id.clone(),
                    request_name,
                    kind: FindingKind::New,
                    breaking: false,
                    previous: None,
                    current: snapshot.signature.clone(),
                    reasons: Vec::new(),
                });
                continue;
            };

            if previous.signature == snapshot.signature {
                continue;
            }

            let reasons = breaking_reasons(previous, snapshot);
            findings.push(ContractFinding {
                request_id: id.clone(),
                request_name,
                kind: FindingKind::Changed,
                breaking: !reasons.is_empty(),
                previous: Some(previous.signature.clone()),
                current: snapshot.signature.clone(),
                reasons,
            });
        }

        let gate_failed = findings
            .iter()
            .any(|f| f.breaking || (self.strict && f.kind == FindingKind::Changed));

        ContractReport {
            checked: current.len(),
            findings,
            gate_failed,
            baseline_updated: false,
        }
    }
}

fn breaking_reasons(previous: &ContractSnapshot, current: &ContractSnapshot) -> Vec<String> {
    let mut reasons = Vec::new();

    let lost: Vec<String> = previous
        .status_codes
        .difference(&current.status_codes)
        .map(u16::to_string)
        .collect();
    if !lost.is_empty() {
        reasons.push(format!("status codes no longer returned: {}", lost.join(", ")));
    }

    let dropped: Vec<&str> = previous
        .required_params
        .difference(&current.required_params)
        .map(String::as_str)
        .collect();
    if !dropped.is_empty() {
        reasons.push(format!("required parameters removed: {}", dropped.join(", ")));
    }

    reasons
}

/// 合并基线：本次结果覆盖同名请求，其他请求保留
pub fn merge_baseline(mut baseline: ContractBaseline, current: &ContractBaseline) -> ContractBaseline {
    for (id, snapshot) in current {
        baseline.insert(id.clone(), snapshot.clone());
    }
    baseline
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collection::RequestDefinition;
    use crate::http::{Method, Response};
    use crate::variable::DataRow;

    fn collection() -> Collection {
        let mut c = Collection::new("c1", "demo");
        c.requests.push(RequestDefinition::new("users", Method::Get, "http://x/users?page=1"));
        c.requests.push(RequestDefinition::new("health", Method::Get, "http://x/health"));
        c
    }

    fn snapshot(signature: &str, codes: &[u16], params: &[&str]) -> ContractSnapshot {
        ContractSnapshot {
            signature: signature.to_string(),
            status_codes: codes.iter().copied().collect(),
            required_params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    fn result(id: &str, status: u16, body: &str) -> ExecutionResult {
        ExecutionResult {
            request_id: id.to_string(),
            request_name: id.to_string(),
            method: "GET".to_string(),
            url: "http://x".to_string(),
            response: Response::new(status, body).with_header("Content-Type", "application/json"),
            assertions: Vec::new(),
            iteration: 0,
            data_row: DataRow::new(),
            duration_ms: 5,
            skipped: false,
            skip_reason: None,
            chaos_case: None,
            logs: Vec::new(),
        }
    }

    #[test]
    fn test_snapshot_ignores_chaos_and_skips() {
        let mut chaos = result("users", 400, r#"{"error": "x"}"#);
        chaos.chaos_case = Some(crate::chaos::ChaosCase::StripBody);
        let results = vec![result("users", 200, r#"{"items": []}"#), chaos];

        let snapshots = ContractGuard::snapshot(&collection(), &results);
        assert_eq!(snapshots.len(), 1);
        let users = &snapshots["users"];
        assert_eq!(users.signature, "200|application/json|{items:array<unknown>}");
        assert_eq!(users.status_codes, BTreeSet::from([200]));
        assert!(users.required_params.contains("query:page"));
    }

    #[test]
    fn test_new_and_unchanged() {
        let baseline = ContractBaseline::from([("users".to_string(), snapshot("a", &[200], &[]))]);
        let current = ContractBaseline::from([
            ("users".to_string(), snapshot("a", &[200], &[])),
            ("health".to_string(), snapshot("h", &[200], &[])),
        ]);

        let report = ContractGuard::default().evaluate(&collection(), &baseline, &current);
        assert_eq!(report.checked, 2);
        assert_eq!(report.findings.len(), 1);
        assert_eq!(report.findings[0].kind, FindingKind::New);
        assert!(!report.gate_failed);
    }

    #[test]
    fn test_breaking_vs_drift() {
        let baseline = ContractBaseline::from([
            ("users".to_string(), snapshot("a", &[200, 404], &["query:page"])),
            ("health".to_string(), snapshot("h1", &[200], &[])),
        ]);
        let current = ContractBaseline::from([
            ("users".to_string(), snapshot("b", &[200], &[])),
            ("health".to_string(), snapshot("h2", &[200, 503], &[])),
        ]);

        let report = ContractGuard::default().evaluate(&collection(), &baseline, &current);
        let breaking: Vec<_> = report.breaking().collect();
        assert_eq!(breaking.len(), 1);
        assert_eq!(breaking[0].request_id, "users");
        assert_eq!(breaking[0].reasons.len(), 2);
        assert_eq!(report.non_breaking().count(), 1);
        assert!(report.gate_failed);
    }

    #[test]
    fn test_strict_fails_on_drift() {
        let baseline = ContractBaseline::from([("health".to_string(), snapshot("h1", &[200], &[]))]);
        let current = ContractBaseline::from([("health".to_string(), snapshot("h2", &[200], &[]))]);

        assert!(!ContractGuard::new(false).evaluate(&collection(), &baseline, &current).gate_failed);
        assert!(ContractGuard::new(true).evaluate(&collection(), &baseline, &current).gate_failed);
    }

    #[test]
    fn test_merge_baseline() {
        let baseline = ContractBaseline::from([("old".to_string(), snapshot("o", &[200], &[]))]);
        let current = ContractBaseline::from([("health".to_string(), snapshot("h", &[200], &[]))]);
        let merged = merge_baseline(baseline, &current);
        assert_eq!(merged.len(), 2);
    }
}
