//! Dockerfile inspection
//!
//! Only the `FROM` lines matter here: they name the images a build depends on.

use crate::error::{Result, StevedoreError};
use std::path::Path;
use tracing::error;

/// Default Dockerfile name inside a build context
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Base image of one build stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImage {
    /// Image reference as written, e.g. `golang:1.22`
    pub image: String,
    /// Stage alias from `FROM <image> AS <alias>`
    pub alias: Option<String>,
}

/// Read `<context_dir>/Dockerfile` and list the base image of every stage
pub fn base_images(context_dir: &Path) -> Result<Vec<BaseImage>> {
    let path = context_dir.join(DOCKERFILE_NAME);
    let content = std::fs::read_to_string(&path).map_err(|e| {
        error!("Open dockerfile {} failed: {}", path.display(), e);
        e
    })?;
    parse_base_images(&content)
}

/// List the base images named by the `FROM` instructions in `content`
pub fn parse_base_images(content: &str) -> Result<Vec<BaseImage>> {
    let mut bases = Vec::new();
    let mut continued_line = String::new();

    for (line_num, line) in content.lines().enumerate() {
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(line_without_backslash) = line.strip_suffix('\\') {
            continued_line.push_str(line_without_backslash);
            continued_line.push(' ');
            continue;
        }

        let full_line = if !continued_line.is_empty() {
            let result = format!("{}{}", continued_line, line);
            continued_line.clear();
            result
        } else {
            line.to_string()
        };

        let mut parts = full_line.split_whitespace();
        let instruction = parts.next().unwrap_or_default();
        if !instruction.eq_ignore_ascii_case("FROM") {
            continue;
        }

        let args: Vec<&str> = parts.filter(|p| !p.starts_with("--")).collect();
        let image = args.first().ok_or_else(|| StevedoreError::DockerfileParse {
            line: line_num + 1,
            message: "FROM requires an image".to_string(),
        })?;

        let alias = if args.len() >= 3 && args[1].eq_ignore_ascii_case("AS") {
            Some(args[2].to_string())
        } else {
            None
        };

        bases.push(BaseImage {
            image: image.to_string(),
            alias,
        });
    }

    if bases.is_empty() {
        return Err(StevedoreError::DockerfileParse {
            line: 0,
            message: "there is no FROM".to_string(),
        });
    }

    Ok(bases)
}
