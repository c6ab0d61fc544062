//! Loads an observer from a markdown file with a YAML frontmatter header,
//! resolving any `@mention`ed context files into its instruction body.
//! Peripheral per the original scope (a host may run observers it already
//! knows about by name instead), but implemented in full so the crate is
//! usable standalone.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use serde::Deserialize;

use crate::models::{default_observer_model, ContextFile, LoadedObserver};

#[derive(Deserialize, Default)]
struct Frontmatter {
    name: Option<String>,
    description: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    timeout: Option<u64>,
    #[serde(default)]
    tools: Vec<String>,
}

/// Splits `---\n<yaml>\n---\n<body>` into its parsed frontmatter and the
/// remaining instruction body. If there's no leading frontmatter block,
/// the whole text is the body and the frontmatter is empty.
fn parse_frontmatter(text: &str) -> Result<(Frontmatter, String)> {
    let re = Regex::new(r"(?s)^---\s*\n(.*?)\n---\s*\n?").unwrap();
    match re.captures(text) {
        Some(caps) => {
            let yaml = caps.get(1).unwrap().as_str();
            let body = text[caps.get(0).unwrap().end()..].to_string();
            let frontmatter: Frontmatter =
                serde_yml::from_str(yaml).context("parsing observer frontmatter")?;
            Ok((frontmatter, body))
        }
        None => Ok((Frontmatter::default(), text.to_string())),
    }
}

fn strip_code_spans(text: &str) -> String {
    let fenced = Regex::new(r"(?s)```.*?```").unwrap();
    let inline = Regex::new(r"`[^`]*`").unwrap();
    let without_fences = fenced.replace_all(text, "");
    inline.replace_all(&without_fences, "").to_string()
}

/// Finds every `@mention` in an instruction body, ignoring anything inside
/// fenced or inline code spans.
pub fn parse_mentions(text: &str) -> Vec<String> {
    let stripped = strip_code_spans(text);
    let re = Regex::new(r"@[\w:/.@-]+").unwrap();
    re.find_iter(&stripped).map(|m| m.as_str().to_string()).collect()
}

/// Resolves a mention or observer reference to a file path: `bundle:path`
/// looks up `bundle` in `bundles` and joins `path` onto it; a bare path is
/// relative to `base_path`. Both forms try the literal path first, then
/// `{path}.md`.
fn resolve_path(
    reference: &str,
    bundles: &HashMap<String, PathBuf>,
    base_path: &Path,
) -> Result<PathBuf> {
    let (base, rel) = match reference.strip_prefix('@').unwrap_or(reference).split_once(':') {
        Some((bundle, rel)) => {
            let bundle_base = bundles
                .get(bundle)
                .with_context(|| format!("unknown bundle '{bundle}' in reference '{reference}'"))?;
            (bundle_base.clone(), rel.to_string())
        }
        None => (
            base_path.to_path_buf(),
            reference.strip_prefix('@').unwrap_or(reference).to_string(),
        ),
    };

    let candidate = base.join(&rel);
    if candidate.exists() {
        return Ok(candidate);
    }
    let with_md = base.join(format!("{rel}.md"));
    if with_md.exists() {
        return Ok(with_md);
    }
    bail!(
        "could not resolve '{reference}' — tried {} and {}",
        candidate.display(),
        with_md.display()
    )
}

fn resolve_mentions(
    mentions: &[String],
    bundles: &HashMap<String, PathBuf>,
    base_path: &Path,
) -> Vec<ContextFile> {
    mentions
        .iter()
        .filter_map(|mention| {
            let path = resolve_path(mention, bundles, base_path).ok()?;
            let content = std::fs::read_to_string(&path).ok()?;
            Some(ContextFile {
                path: path.to_string_lossy().to_string(),
                content,
            })
        })
        .collect()
}

/// Loads and fully resolves one observer reference into a `LoadedObserver`.
pub fn load_observer(
    reference: &str,
    bundles: &HashMap<String, PathBuf>,
    base_path: &Path,
) -> Result<LoadedObserver> {
    let path = resolve_path(reference, bundles, base_path)?;
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("reading observer file {}", path.display()))?;
    let (frontmatter, body) = parse_frontmatter(&text)?;

    let name = frontmatter
        .name
        .unwrap_or_else(|| path.file_stem().unwrap_or_default().to_string_lossy().to_string());

    let mentions = parse_mentions(&body);
    let context_files = resolve_mentions(&mentions, bundles, base_path);

    Ok(LoadedObserver {
        name,
        description: frontmatter.description,
        model: frontmatter.model.unwrap_or_else(default_observer_model),
        timeout: frontmatter.timeout.unwrap_or(30),
        tools: frontmatter.tools,
        instruction: body.trim().to_string(),
        context_files,
    })
}
