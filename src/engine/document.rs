use kuchiki::parse_html;
use kuchiki::traits::*;

use crate::error::{BridgeError, Result};

/// How a script should be scheduled relative to HTML parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptExecution {
    /// Classic blocking scripts that run immediately and block HTML parsing.
    #[default]
    Blocking,
    /// Scripts marked as `async`; the headless engine runs them in document order.
    Async,
    /// Scripts marked as `defer`, which run after the document is parsed.
    Defer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptKind {
    #[default]
    Classic,
    /// `<script type="module">`.
    Module,
    /// Data blocks and unknown types, never executed.
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSource {
    Inline { code: String },
    External { src: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptDescriptor {
    pub index: usize,
    pub kind: ScriptKind,
    pub execution: ScriptExecution,
    pub source: ScriptSource,
}

impl ScriptDescriptor {
    pub fn filename(&self) -> String {
        match &self.source {
            ScriptSource::Inline { .. } => format!("inline-script-{}.js", self.index),
            ScriptSource::External { src } => src.clone(),
        }
    }
}

pub fn collect_scripts(html: &str) -> Result<Vec<ScriptDescriptor>> {
    let parsed = parse_html().one(html);
    let mut collected = Vec::new();
    let selector = parsed
        .select("script")
        .map_err(|_| BridgeError::Script("failed to compile script selector".into()))?;

    for (index, script) in selector.enumerate() {
        let attributes = script.attributes.borrow();
        let kind = classify_kind(attributes.get("type"));
        let execution = determine_execution(&attributes, kind);

        if let Some(src) = attributes
            .get("src")
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
        {
            collected.push(ScriptDescriptor {
                index,
                kind,
                execution,
                source: ScriptSource::External {
                    src: src.to_string(),
                },
            });
            continue;
        }

        drop(attributes);
        let code = script.text_contents();
        if code.trim().is_empty() {
            continue;
        }
        collected.push(ScriptDescriptor {
            index,
            kind,
            execution,
            source: ScriptSource::Inline { code },
        });
    }

    Ok(collected)
}

/// Classic scripts in the order the headless engine runs them: parser-time
/// scripts in document order, then deferred ones.
pub fn execution_order(scripts: &[ScriptDescriptor]) -> Vec<&ScriptDescriptor> {
    let classic = scripts
        .iter()
        .filter(|descriptor| descriptor.kind == ScriptKind::Classic);
    let (deferred, immediate): (Vec<_>, Vec<_>) =
        classic.partition(|descriptor| descriptor.execution == ScriptExecution::Defer);
    immediate.into_iter().chain(deferred).collect()
}

fn classify_kind(script_type: Option<&str>) -> ScriptKind {
    match script_type {
        Some(value) => {
            let lowered = value.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "" | "text/javascript" | "application/javascript" => ScriptKind::Classic,
                "text/ecmascript" | "application/ecmascript" => ScriptKind::Classic,
                "module" | "text/javascript+module" => ScriptKind::Module,
                _ => ScriptKind::Unknown,
            }
        }
        None => ScriptKind::Classic,
    }
}

fn determine_execution(attributes: &kuchiki::Attributes, kind: ScriptKind) -> ScriptExecution {
    if attributes.get("async").is_some() {
        return ScriptExecution::Async;
    }
    if attributes.get("defer").is_some() {
        return ScriptExecution::Defer;
    }
    match kind {
        ScriptKind::Module => ScriptExecution::Defer,
        _ => ScriptExecution::Blocking,
    }
}
