use std::path::Path;
use std::sync::Arc;

use loadgen_common::{LoadError, Result};

/// One prompt per line; lines are trimmed and blank lines dropped.
pub fn load_prompts(path: &Path) -> Result<Arc<[String]>> {
    let text = std::fs::read_to_string(path)?;
    let prompts: Vec<String> = text.lines().map(str::trim).filter(|l| !l.is_empty()).map(String::from).collect();
    if prompts.is_empty() {
        return Err(LoadError::InvalidArgument(format!("no prompts found in {}", path.display())));
    }
    Ok(prompts.into())
}
