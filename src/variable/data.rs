use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::Result;

/// 一次迭代的参数集
pub type DataRow = BTreeMap<String, String>;

/// 数据源格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    Csv,
    Json,
}

/// 迭代数据源：原始文本加格式标记
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSource {
    pub format: DataFormat,
    pub content: String,
}

impl DataSource {
    pub fn new(format: DataFormat, content: impl Into<String>) -> Self {
        Self {
            format,
            content: content.into(),
        }
    }

    /// 读取文件，按扩展名判断格式（.json 为 JSON，其余按 CSV）
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => DataFormat::Json,
            _ => DataFormat::Csv,
        };
        Ok(Self::new(format, content))
    }

    /// 解析为数据行；解析失败或没有数据时返回单个空行
    pub fn parse_rows(&self) -> Vec<DataRow> {
        let parsed = match self.format {
            DataFormat::Csv => parse_csv(&self.content),
            DataFormat::Json => parse_json(&self.content),
        };

        match parsed {
            Ok(rows) if !rows.is_empty() => rows,
            Ok(_) => vec![DataRow::new()],
            Err(e) => {
                warn!("Failed to parse {:?} data source: {}", self.format, e);
                vec![DataRow::new()]
            }
        }
    }
}

fn parse_csv(content: &str) -> std::result::Result<Vec<DataRow>, String> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader.headers().map_err(|e| e.to_string())?.clone();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| e.to_string())?;
        let row: DataRow = headers
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty())
            .map(|(i, name)| (name.to_string(), record.get(i).unwrap_or_default().to_string()))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

fn parse_json(content: &str) -> std::result::Result<Vec<DataRow>, String> {
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }

    let value: serde_json::Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => return Err("expected an array of objects".to_string()),
    };

    items
        .into_iter()
        .map(|item| match item {
            serde_json::Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| (key, scalar_to_string(value)))
                .collect::<DataRow>()),
            _ => Err("expected an array of objects".to_string()),
        })
        .collect()
}

fn scalar_to_string(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
