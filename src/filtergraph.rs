//! Typed builder for ffmpeg filter graphs
//!
//! Filters are assembled as ordered stages with typed arguments and are
//! validated before serialization. Text arguments go through both levels of
//! filtergraph escaping (option level, then graph level), so callers never
//! hand-escape quotes, colons or commas.

use anyhow::{anyhow, Result};
use std::fmt::Write as _;

/// A single filter argument value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    /// Free text or an expression; escaped on render
    Text(String),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl Value {
    fn validate(&self) -> Result<()> {
        match self {
            Value::Int(_) => Ok(()),
            Value::Float(f) if f.is_finite() => Ok(()),
            Value::Float(f) => Err(anyhow!("non-finite filter argument {}", f)),
            Value::Text(s) if s.chars().any(char::is_control) => {
                Err(anyhow!("control character in filter argument {:?}", s))
            }
            Value::Text(_) => Ok(()),
        }
    }

    fn render(&self) -> String {
        match self {
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Text(s) => escape(s),
        }
    }
}

/// Six decimals, trailing zeros trimmed
fn format_float(f: f64) -> String {
    let s = format!("{:.6}", f);
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" || s == "-0" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

/// Escape a value for use inside a filter option, then for the graph
pub fn escape(raw: &str) -> String {
    let mut option_level = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '\'' | ':') {
            option_level.push('\\');
        }
        option_level.push(c);
    }

    let mut graph_level = String::with_capacity(option_level.len());
    for c in option_level.chars() {
        if matches!(c, '\\' | '\'' | '[' | ']' | ',' | ';') {
            graph_level.push('\\');
        }
        graph_level.push(c);
    }
    graph_level
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}

fn is_label(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

/// One filter stage, e.g. `scale=1920:1080:flags=lanczos`
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    name: String,
    args: Vec<(Option<String>, Value)>,
}

impl Filter {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            args: Vec::new(),
        }
    }

    /// Named argument `key=value`
    pub fn arg(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.args.push((Some(key.to_string()), value.into()));
        self
    }

    /// Positional argument
    pub fn pos(mut self, value: impl Into<Value>) -> Self {
        self.args.push((None, value.into()));
        self
    }

    fn validate(&self) -> Result<()> {
        if !is_identifier(&self.name) {
            return Err(anyhow!("invalid filter name {:?}", self.name));
        }
        for (key, value) in &self.args {
            if let Some(key) = key {
                if !is_identifier(key) {
                    return Err(anyhow!("invalid option {:?} on {}", key, self.name));
                }
            }
            value
                .validate()
                .map_err(|e| anyhow!("{}: {}", self.name, e))?;
        }
        Ok(())
    }

    fn render(&self) -> String {
        if self.args.is_empty() {
            return self.name.clone();
        }
        let args: Vec<String> = self
            .args
            .iter()
            .map(|(key, value)| match key {
                Some(k) => format!("{}={}", k, value.render()),
                None => value.render(),
            })
            .collect();
        format!("{}={}", self.name, args.join(":"))
    }
}

/// Linear chain of filters between labeled pads
#[derive(Debug, Clone, Default)]
pub struct Chain {
    inputs: Vec<String>,
    filters: Vec<Filter>,
    outputs: Vec<String>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, label: &str) -> Self {
        self.inputs.push(label.to_string());
        self
    }

    pub fn then(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn output(mut self, label: &str) -> Self {
        self.outputs.push(label.to_string());
        self
    }

    fn validate(&self) -> Result<()> {
        if self.filters.is_empty() {
            return Err(anyhow!("filter chain has no filters"));
        }
        for label in self.inputs.iter().chain(&self.outputs) {
            if !is_label(label) {
                return Err(anyhow!("invalid pad label {:?}", label));
            }
        }
        self.filters.iter().try_for_each(Filter::validate)
    }

    fn render(&self) -> String {
        let mut out = String::new();
        for label in &self.inputs {
            let _ = write!(out, "[{}]", label);
        }
        let filters: Vec<String> = self.filters.iter().map(Filter::render).collect();
        out.push_str(&filters.join(","));
        for label in &self.outputs {
            let _ = write!(out, "[{}]", label);
        }
        out
    }
}

/// Ordered set of chains, serialized with `;`
#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    chains: Vec<Chain>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chain: Chain) -> &mut Self {
        self.chains.push(chain);
        self
    }

    /// Validate every stage, then serialize
    pub fn build(&self) -> Result<String> {
        if self.chains.is_empty() {
            return Err(anyhow!("empty filter graph"));
        }
        let mut produced: Vec<&str> = Vec::new();
        for chain in &self.chains {
            chain.validate()?;
            for label in &chain.outputs {
                if produced.contains(&label.as_str()) {
                    return Err(anyhow!("pad label [{}] produced twice", label));
                }
                produced.push(label);
            }
        }
        let rendered: Vec<String> = self.chains.iter().map(Chain::render).collect();
        Ok(rendered.join(";"))
    }
}

/// Serialize an unlabeled filter list for `-vf`/`-af`
pub fn simple(filters: Vec<Filter>) -> Result<String> {
    let mut chain = Chain::new();
    for filter in filters {
        chain = chain.then(filter);
    }
    chain.validate()?;
    Ok(chain.render())
}
