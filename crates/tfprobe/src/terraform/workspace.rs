//! Per-run staging of the Terraform module source
//!
//! Each run works against its own copy of the module directory so parallel
//! runs never share local state, and so the module source is never polluted
//! with the run's provider configuration or state files.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

/// File name of the injected provider configuration
pub const PROVIDER_FILE: &str = "provider.tf";

/// Entries never copied into the staged working directory
const SKIPPED_ENTRIES: &[&str] = &[".terraform", ".git"];

/// Copy the module directory to a per-run working copy under the system
/// temp directory.
///
/// If the working copy already exists (a resumed run), it is reused as-is:
/// it holds the Terraform state that later stages and teardown depend on.
pub fn stage_module(module_dir: &Path, run_id: &str) -> Result<PathBuf> {
    let workdir = std::env::temp_dir().join(format!("tfprobe-{run_id}"));

    if workdir.exists() {
        info!(workdir = %workdir.display(), "Reusing existing working copy");
        return Ok(workdir);
    }

    copy_dir_recursive(module_dir, &workdir).with_context(|| {
        format!(
            "Failed to stage module from {} to {}",
            module_dir.display(),
            workdir.display()
        )
    })?;

    info!(
        module = %module_dir.display(),
        workdir = %workdir.display(),
        "Staged module working copy"
    );
    Ok(workdir)
}

/// Render the provider configuration pinned to a region.
pub fn render_provider_config(region: &str) -> String {
    format!(
        r#"provider "aws" {{
  region = "{region}"
}}
"#
    )
}

/// Write the provider configuration into the working directory.
pub fn install_provider_config(workdir: &Path, region: &str) -> Result<PathBuf> {
    let path = workdir.join(PROVIDER_FILE);
    fs::write(&path, render_provider_config(region))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    debug!(path = %path.display(), region = %region, "Installed provider configuration");
    Ok(path)
}

/// Remove the injected provider configuration. Missing files are fine.
pub fn remove_provider_config(workdir: &Path) -> Result<()> {
    let path = workdir.join(PROVIDER_FILE);
    match fs::remove_file(&path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

/// Delete the staged working copy. Best-effort: failures are logged, not
/// propagated, since the copy lives under the system temp directory anyway.
pub fn remove_staged_module(workdir: &Path) {
    if let Err(e) = fs::remove_dir_all(workdir) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(workdir = %workdir.display(), error = %e, "Failed to remove working copy");
        }
    }
}

fn should_skip(name: &str) -> bool {
    SKIPPED_ENTRIES.contains(&name) || name.starts_with("terraform.tfstate")
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst).with_context(|| format!("Failed to create {}", dst.display()))?;

    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))? {
        let entry = entry?;
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if should_skip(&name_str) {
            continue;
        }

        let from = entry.path();
        let to = dst.join(&name);
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&from, &to)?;
        } else {
            fs::copy(&from, &to)
                .with_context(|| format!("Failed to copy {}", from.display()))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn make_module(dir: &Path) {
        fs::write(dir.join("main.tf"), "resource \"aws_iam_user\" \"u\" {}").unwrap();
        fs::write(dir.join("variables.tf"), "variable \"user_name\" {}").unwrap();
        fs::write(dir.join("terraform.tfstate"), "{}").unwrap();
        fs::write(dir.join("terraform.tfstate.backup"), "{}").unwrap();
        fs::create_dir(dir.join(".terraform")).unwrap();
        fs::write(dir.join(".terraform").join("plugin"), "bin").unwrap();
        fs::create_dir(dir.join("policies")).unwrap();
        fs::write(dir.join("policies").join("sqs.tf"), "# nested").unwrap();
    }

    #[test]
    fn copy_includes_tf_files_and_skips_state() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let target = dst.path().join("work");
        make_module(src.path());

        copy_dir_recursive(src.path(), &target).unwrap();

        assert!(target.join("main.tf").exists());
        assert!(target.join("variables.tf").exists());
        assert!(target.join("policies").join("sqs.tf").exists());
        assert!(!target.join(".terraform").exists());
        assert!(!target.join("terraform.tfstate").exists());
        assert!(!target.join("terraform.tfstate.backup").exists());
    }

    #[test]
    fn provider_config_roundtrip() {
        let dir = TempDir::new().unwrap();

        let path = install_provider_config(dir.path(), "us-east-1").unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.contains(r#"region = "us-east-1""#));

        remove_provider_config(dir.path()).unwrap();
        assert!(!path.exists());

        // Removing again is fine
        remove_provider_config(dir.path()).unwrap();
    }

    #[test]
    fn rendered_provider_is_valid_hcl_shape() {
        let rendered = render_provider_config("eu-west-1");
        assert!(rendered.starts_with(r#"provider "aws" {"#));
        assert!(rendered.trim_end().ends_with('}'));
    }
}
