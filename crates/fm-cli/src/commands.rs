//! Subcommand implementations
//!
//! Each command returns its stdout text so it can be tested without a process.

use anyhow::{bail, Context};
use fm_fork::{
    detect_conflict, ForkConfig, SchemaSignature, WarmupCostConfig, WarmupEstimate, WarmupKind,
};
use fm_merge::{merge, MergeResult, StrategyRegistry, StrategySpec};
use fm_value::{TaggedValue, TraceId};
use serde::Deserialize;
use serde_json::Value;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

/// Where the merge strategy comes from
#[derive(Debug, Clone)]
pub(crate) enum StrategySource {
    /// A registry name such as `weighted-vote`
    Named(String),

    /// A TOML or JSON [`StrategySpec`] file
    SpecFile(PathBuf),
}

impl StrategySource {
    fn load(&self) -> anyhow::Result<StrategySpec> {
        match self {
            Self::Named(name) => Ok(StrategySpec::named(name.clone())),
            Self::SpecFile(path) => {
                let text = read(path)?;
                let spec = if has_extension(path, "json") {
                    serde_json::from_str(&text)
                        .with_context(|| format!("invalid strategy spec {}", path.display()))?
                } else {
                    toml::from_str(&text)
                        .with_context(|| format!("invalid strategy spec {}", path.display()))?
                };
                Ok(spec)
            }
        }
    }
}

/// One branch result in an input file
///
/// `origin` and `trace_id` may be omitted; they default to `input-<index>` so
/// repeated runs over the same file are reproducible.
#[derive(Debug, Deserialize)]
struct InputRecord {
    value: Value,
    confidence: f64,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    trace_id: Option<String>,
}

impl InputRecord {
    fn into_tagged(self, index: usize) -> TaggedValue<Value> {
        let fallback = format!("input-{index}");
        let trace_id = TraceId::from_string(self.trace_id.unwrap_or_else(|| fallback.clone()));
        // Confidence is checked by the merge engine, which names the branch.
        TaggedValue::new_unchecked(
            self.value,
            self.confidence,
            self.origin.unwrap_or(fallback),
            trace_id,
        )
    }
}

/// Merge the branch results in `input` and print the result as JSON
pub(crate) fn merge_file(input: &Path, source: &StrategySource) -> anyhow::Result<String> {
    let records: Vec<InputRecord> = serde_json::from_str(&read(input)?)
        .with_context(|| format!("{} is not a JSON array of branch results", input.display()))?;
    let results: Vec<TaggedValue<Value>> = records
        .into_iter()
        .enumerate()
        .map(|(i, record)| record.into_tagged(i))
        .collect();

    let spec = source.load()?;
    let strategy = StrategyRegistry::with_defaults().build(&spec)?;
    tracing::debug!(?spec, branches = results.len(), "merging input file");

    let merged: MergeResult<Value> = merge(&results, &strategy)?;
    Ok(serde_json::to_string_pretty(&merged)?)
}

/// Fingerprint schema (or sample) files and report conflicts between them
pub(crate) fn signatures(paths: &[PathBuf], sample: bool) -> anyhow::Result<String> {
    if paths.is_empty() {
        bail!("no files given");
    }

    let mut out = String::new();
    let mut fingerprints = Vec::with_capacity(paths.len());
    for path in paths {
        let document: Value = serde_json::from_str(&read(path)?)
            .with_context(|| format!("{} is not valid JSON", path.display()))?;
        let signature = if sample {
            SchemaSignature::of_sample(&document)
        } else {
            SchemaSignature::from_schema(&document)
        };
        writeln!(out, "{}  {}", signature.to_hex(), path.display())?;
        fingerprints.push(signature);
    }

    if fingerprints.len() > 1 {
        let report = detect_conflict(&fingerprints);
        if report.has_conflict {
            write!(
                out,
                "conflict: {} distinct shapes, file groups {:?}",
                report.distinct_shapes(),
                report.branch_groups
            )?;
        } else {
            write!(out, "no conflict")?;
        }
    }

    Ok(out.trim_end().to_string())
}

/// Warmup estimate inputs from an optional config file plus overrides
pub(crate) fn estimate_config(
    config: Option<&Path>,
    prefix_tokens: Option<u64>,
    branches: Option<usize>,
) -> anyhow::Result<WarmupCostConfig> {
    let mut cost = match config {
        Some(path) => ForkConfig::from_file(path)?.warmup_cost,
        None => WarmupCostConfig::default(),
    };
    if let Some(tokens) = prefix_tokens {
        cost.prefix_tokens = tokens;
    }
    if let Some(n) = branches {
        cost.branch_count = n;
    }
    Ok(cost)
}

/// Render the warmup estimate for `mode` and its advice
pub(crate) fn estimate(config: &WarmupCostConfig, mode: WarmupKind) -> String {
    let estimate = WarmupEstimate::for_mode(config, mode);
    let advice = if estimate.should_warmup() {
        "warmup recommended"
    } else if !estimate.cacheable {
        "warmup not recommended: prefix below cacheable minimum"
    } else {
        "warmup not recommended: costs more than it saves"
    };

    format!(
        "warmup mode:         {}\n\
         prefix tokens:       {}\n\
         branches:            {}\n\
         warmup call:         {:.6}\n\
         without warmup:      {:.6}\n\
         with warmup:         {:.6}\n\
         savings:             {:.6}\n\
         {advice}",
        estimate.mode,
        config.prefix_tokens,
        config.branch_count,
        estimate.warmup_cost,
        estimate.cost_without_warmup,
        estimate.cost_with_warmup,
        estimate.savings,
    )
}

fn read(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension().is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(suffix: &str, text: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(text.as_bytes()).unwrap();
        file
    }

    const VOTES: &str = r#"[
        {"value": "urgent", "confidence": 0.9},
        {"value": "normal", "confidence": 0.4},
        {"value": "urgent", "confidence": 0.3}
    ]"#;

    #[test]
    fn merge_named_strategy() {
        let input = file_with(".json", VOTES);
        let out = merge_file(input.path(), &StrategySource::Named("weighted-vote".into())).unwrap();
        let merged: Value = serde_json::from_str(&out).unwrap();

        assert_eq!(merged["value"]["value"], "urgent");
        assert_eq!(merged["value"]["origin"], "merged");
        assert_eq!(merged["provenance"]["contributing_branches"], serde_json::json!([0, 2]));
    }

    #[test]
    fn merge_is_reproducible() {
        let input = file_with(".json", VOTES);
        let source = StrategySource::Named("weighted-vote".into());
        assert_eq!(
            merge_file(input.path(), &source).unwrap(),
            merge_file(input.path(), &source).unwrap()
        );
    }

    #[test]
    fn merge_with_toml_spec() {
        let input = file_with(".json", r#"[{"value": "A", "confidence": 0.5}, {"value": "B", "confidence": 0.5}, {"value": "C", "confidence": 0.5}]"#);
        let spec = file_with(
            ".toml",
            "kind = \"require-consensus\"\nmin_agreeing = 2\nfallback = \"unknown\"\n\n[inner]\nkind = \"weighted-vote\"\n",
        );
        let out = merge_file(input.path(), &StrategySource::SpecFile(spec.path().into())).unwrap();
        let merged: Value = serde_json::from_str(&out).unwrap();
        assert_eq!(merged["value"]["value"], "unknown");
        assert_eq!(merged["value"]["confidence"], 0.0);
    }

    #[test]
    fn unknown_strategy_fails() {
        let input = file_with(".json", VOTES);
        let err = merge_file(input.path(), &StrategySource::Named("median".into())).unwrap_err();
        assert!(err.to_string().contains("median"));
    }

    #[test]
    fn out_of_range_confidence_names_branch() {
        let input = file_with(".json", r#"[{"value": 1, "confidence": 0.5}, {"value": 2, "confidence": 1.7}]"#);
        let err = merge_file(input.path(), &StrategySource::Named("weighted-vote".into())).unwrap_err();
        assert!(err.to_string().contains("branch 1"));
    }

    #[test]
    fn signature_conflict_report() {
        let a = file_with(".json", r#"{"priority": "high", "estimate": 3}"#);
        let b = file_with(".json", r#"{"estimate": 5, "priority": "low"}"#);
        let c = file_with(".json", r#"{"priority": "high"}"#);

        let same = signatures(&[a.path().into(), b.path().into()], true).unwrap();
        assert!(same.ends_with("no conflict"));

        let mixed = signatures(&[a.path().into(), c.path().into(), b.path().into()], true).unwrap();
        assert!(mixed.ends_with("conflict: 2 distinct shapes, file groups [[0, 2], [1]]"));
    }

    #[test]
    fn estimate_advice() {
        let wide = estimate(&WarmupCostConfig::new(4096, 8), WarmupKind::Explicit);
        assert!(wide.starts_with("warmup mode:         explicit"));
        assert!(wide.ends_with("warmup recommended"));

        let short = estimate(&WarmupCostConfig::new(100, 8), WarmupKind::Explicit);
        assert!(short.contains("below cacheable minimum"));
    }

    #[test]
    fn first_branch_estimate_skips_one_read() {
        let out = estimate(&WarmupCostConfig::new(2000, 4), WarmupKind::FirstBranch);
        assert!(out.starts_with("warmup mode:         first-branch"));
        assert!(out.contains("with warmup:         0.009300"));
    }

    #[test]
    fn estimate_overrides_config_file() {
        let config = file_with(".toml", "[warmup_cost]\nprefix_tokens = 2048\nbranch_count = 3\n");
        let cost = estimate_config(Some(config.path()), None, Some(6)).unwrap();
        assert_eq!(cost.prefix_tokens, 2048);
        assert_eq!(cost.branch_count, 6);
    }
}
