//! `expect(value)` fluent assertions for scripts.
//!
//! Every matcher raises a runtime error on failure so that the enclosing
//! `pm.test` block is recorded as failed.

use regex::Regex;
use rhai::{Dynamic, Engine, EvalAltResult};

type MatchResult = Result<(), Box<EvalAltResult>>;

/// 断言链，`not` 取反
#[derive(Debug, Clone)]
pub struct Expectation {
    value: Dynamic,
    negate: bool,
}

impl Expectation {
    pub fn new(value: Dynamic) -> Self {
        Self {
            value,
            negate: false,
        }
    }

    fn check(&self, passed: bool, describe: impl FnOnce(&str) -> String) -> MatchResult {
        if passed != self.negate {
            Ok(())
        } else {
            let not = if self.negate { "not " } else { "" };
            Err(describe(not).into())
        }
    }

    fn to_equal(&mut self, expected: Dynamic) -> MatchResult {
        let passed = strict_equal(&self.value, &expected);
        self.check(passed, |not| {
            format!("expected {} to {}equal {}", show(&self.value), not, show(&expected))
        })
    }

    fn to_eql(&mut self, expected: Dynamic) -> MatchResult {
        let passed = deep_equal(&self.value, &expected);
        self.check(passed, |not| {
            format!("expected {} to {}deeply equal {}", show(&self.value), not, show(&expected))
        })
    }

    fn to_include(&mut self, needle: Dynamic) -> MatchResult {
        let passed = includes(&self.value, &needle);
        self.check(passed, |not| {
            format!("expected {} to {}include {}", show(&self.value), not, show(&needle))
        })
    }

    fn to_match(&mut self, pattern: &str) -> MatchResult {
        let re = Regex::new(pattern).map_err(|e| format!("invalid pattern `{}`: {}", pattern, e))?;
        let text = plain_string(&self.value);
        let passed = re.is_match(&text);
        self.check(passed, |not| {
            format!("expected {} to {}match /{}/", show(&self.value), not, pattern)
        })
    }

    fn to_be_truthy(&mut self) -> MatchResult {
        let passed = truthy(&self.value);
        self.check(passed, |not| format!("expected {} to {}be truthy", show(&self.value), not))
    }

    fn to_be_falsy(&mut self) -> MatchResult {
        let passed = !truthy(&self.value);
        self.check(passed, |not| format!("expected {} to {}be falsy", show(&self.value), not))
    }
}

/// 注册 `expect` 全局函数与 `Expectation` 类型
pub fn register(engine: &mut Engine) {
    engine
        .register_type_with_name::<Expectation>("Expectation")
        .register_fn("expect", Expectation::new)
        .register_get("not", |e: &mut Expectation| Expectation {
            value: e.value.clone(),
            negate: !e.negate,
        })
        .register_fn("to_equal", Expectation::to_equal)
        .register_fn("to_eql", Expectation::to_eql)
        .register_fn("to_include", Expectation::to_include)
        .register_fn("to_match", Expectation::to_match)
        .register_fn("to_be_truthy", Expectation::to_be_truthy)
        .register_fn("to_be_falsy", Expectation::to_be_falsy);
}

pub fn to_json(value: &Dynamic) -> serde_json::Value {
    rhai::serde::from_dynamic::<serde_json::Value>(value).unwrap_or(serde_json::Value::Null)
}

fn show(value: &Dynamic) -> String {
    if value.is_unit() {
        return "undefined".to_string();
    }
    to_json(value).to_string()
}

fn plain_string(value: &Dynamic) -> String {
    match to_json(value) {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    }
}

/// JS 风格真值：()、false、0、NaN、"" 为假
fn truthy(value: &Dynamic) -> bool {
    match to_json(value) {
        serde_json::Value::Null => false,
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

/// 数字按数值比较，其他按结构比较
pub fn json_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    use serde_json::Value;
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| json_equal(x, y))
        }
        (Value::Object(xm), Value::Object(ym)) => {
            xm.len() == ym.len()
                && xm
                    .iter()
                    .all(|(k, x)| ym.get(k).is_some_and(|y| json_equal(x, y)))
        }
        _ => a == b,
    }
}

fn strict_equal(a: &Dynamic, b: &Dynamic) -> bool {
    if a.is_unit() || b.is_unit() {
        return a.is_unit() && b.is_unit();
    }
    let (ja, jb) = (to_json(a), to_json(b));
    let scalar = |v: &serde_json::Value| !v.is_array() && !v.is_object();
    scalar(&ja) && scalar(&jb) && json_equal(&ja, &jb)
}

fn deep_equal(a: &Dynamic, b: &Dynamic) -> bool {
    if a.is_unit() || b.is_unit() {
        return a.is_unit() && b.is_unit();
    }
    json_equal(&to_json(a), &to_json(b))
}

fn includes(haystack: &Dynamic, needle: &Dynamic) -> bool {
    use serde_json::Value;
    match (to_json(haystack), to_json(needle)) {
        (Value::String(h), Value::String(n)) => h.contains(&n),
        (Value::String(h), n) => h.contains(&n.to_string()),
        (Value::Array(items), n) => items.iter().any(|item| json_equal(item, &n)),
        (Value::Object(map), Value::String(key)) => map.contains_key(&key),
        (Value::Object(map), Value::Object(subset)) => subset
            .iter()
            .all(|(k, v)| map.get(k).is_some_and(|x| json_equal(x, v))),
        _ => false,
    }
}
