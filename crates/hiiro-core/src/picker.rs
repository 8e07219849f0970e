use std::io::Write;
use std::process::{Command, Stdio};

use anyhow::{anyhow, Context, Result};
use tracing::debug;

/// An interactive chooser. `Ok(None)` means the user cancelled.
pub trait Picker {
    fn select(&self, items: &[String]) -> Result<Option<String>>;
}

/// Runs an external fuzzy finder (`sk`, `fzf`, ...) over stdin/stdout.
pub struct CommandPicker {
    argv: Vec<String>,
}

impl CommandPicker {
    pub fn new(argv: Vec<String>) -> Self {
        Self { argv }
    }
}

impl Picker for CommandPicker {
    fn select(&self, items: &[String]) -> Result<Option<String>> {
        let (program, args) = self
            .argv
            .split_first()
            .ok_or_else(|| anyhow!("picker command is empty"))?;
        let binary = which::which(program)
            .with_context(|| format!("picker '{program}' not found on PATH"))?;
        debug!(picker = %binary.display(), count = items.len(), "running picker");

        let mut child = Command::new(binary)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .with_context(|| format!("spawn picker '{program}'"))?;
        {
            let mut stdin = child
                .stdin
                .take()
                .ok_or_else(|| anyhow!("picker stdin unavailable"))?;
            // A picker may exit before reading everything.
            if let Err(err) = stdin.write_all(items.join("\n").as_bytes()) {
                if err.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(err).context("write picker input");
                }
            }
        }
        let output = child.wait_with_output().context("wait for picker")?;
        if !output.status.success() {
            return Ok(None);
        }
        let choice = String::from_utf8_lossy(&output.stdout).trim().to_string();
        Ok((!choice.is_empty()).then_some(choice))
    }
}

/// Shows `labels` and returns the value paired with the chosen label.
pub fn select_from_pairs(picker: &dyn Picker, pairs: &[(String, String)]) -> Result<Option<String>> {
    if pairs.is_empty() {
        return Ok(None);
    }
    let labels: Vec<String> = pairs.iter().map(|(label, _)| label.clone()).collect();
    let Some(choice) = picker.select(&labels)? else {
        return Ok(None);
    };
    Ok(pairs
        .iter()
        .find(|(label, _)| label.trim_end() == choice.trim_end())
        .map(|(_, value)| value.clone()))
}
