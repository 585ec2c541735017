use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

use crate::github::DEFAULT_API_BASE;

pub struct Config;

impl Config {
    /// Get the data directory path
    fn data_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "github-status", "github-status")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .context("Could not determine data directory")
    }

    /// Get the database file path
    pub fn db_path() -> Result<PathBuf> {
        Ok(Self::data_dir()?.join("github_status.db"))
    }

    /// GitHub API base URL, overridable for GitHub Enterprise or testing
    pub fn api_base() -> String {
        non_empty_var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    /// Get GitHub token from environment or gh CLI config
    pub fn github_token() -> Option<String> {
        if let Some(token) = non_empty_var("GITHUB_TOKEN") {
            return Some(token);
        }

        // Used by gh CLI
        if let Some(token) = non_empty_var("GH_TOKEN") {
            return Some(token);
        }

        // Try to get from gh CLI config
        if let Ok(output) = std::process::Command::new("gh")
            .args(["auth", "token"])
            .output()
        {
            if output.status.success() {
                let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if !token.is_empty() {
                    return Some(token);
                }
            }
        }

        None
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}
