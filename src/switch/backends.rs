//! Concrete `ServiceSwitcher` backends. Each drives one external CLI via a
//! `sh -c` subprocess, matching the Environment Switcher's existing
//! `run_hook` so the whole switching path shares one invocation style.

use async_trait::async_trait;

use crate::error::GzhError;

use super::{ServiceConfig, ServiceSwitcher};

async fn run(command: String) -> Result<String, GzhError> {
    let output = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .output()
        .await
        .map_err(|e| GzhError::Network(e.to_string()))?;

    if !output.status.success() {
        return Err(GzhError::Network(format!(
            "`{command}` exited {}: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Switches an AWS-style CLI profile via `AWS_PROFILE`-aware tooling;
/// "current state" is read back from the configured CLI's own profile
/// query rather than tracked locally, so a switch made outside this tool
/// is still seen correctly on the next run.
pub struct CloudProfileSwitcher {
    name: String,
    query_command: String,
}

impl CloudProfileSwitcher {
    pub fn new(name: impl Into<String>, query_command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query_command: query_command.into(),
        }
    }
}

#[async_trait]
impl ServiceSwitcher for CloudProfileSwitcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn switch(&self, config: &ServiceConfig) -> Result<(), GzhError> {
        let ServiceConfig::CloudProfile { profile, region } = config else {
            return Err(GzhError::ConfigInvalid(format!("{} expects a cloud profile config", self.name)));
        };
        let region_flag = region.as_deref().map(|r| format!(" --region {r}")).unwrap_or_default();
        run(format!("aws configure set region {region_flag} --profile {profile}")).await?;
        Ok(())
    }

    async fn get_current_state(&self) -> Result<ServiceConfig, GzhError> {
        let profile = run(self.query_command.clone()).await?;
        Ok(ServiceConfig::CloudProfile { profile, region: None })
    }

    async fn rollback(&self, previous: &ServiceConfig) -> Result<(), GzhError> {
        self.switch(previous).await
    }
}

/// `docker context use <name>`.
pub struct ContainerContextSwitcher {
    name: String,
}

impl ContainerContextSwitcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ServiceSwitcher for ContainerContextSwitcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn switch(&self, config: &ServiceConfig) -> Result<(), GzhError> {
        let ServiceConfig::ContainerContext { context } = config else {
            return Err(GzhError::ConfigInvalid(format!("{} expects a container context config", self.name)));
        };
        run(format!("docker context use {context}")).await?;
        Ok(())
    }

    async fn get_current_state(&self) -> Result<ServiceConfig, GzhError> {
        let context = run("docker context show".to_string()).await?;
        Ok(ServiceConfig::ContainerContext { context })
    }

    async fn rollback(&self, previous: &ServiceConfig) -> Result<(), GzhError> {
        self.switch(previous).await
    }
}

/// `kubectl config use-context <name>`, optionally pinning a namespace.
pub struct ClusterContextSwitcher {
    name: String,
}

impl ClusterContextSwitcher {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl ServiceSwitcher for ClusterContextSwitcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn switch(&self, config: &ServiceConfig) -> Result<(), GzhError> {
        let ServiceConfig::ClusterContext { context, namespace } = config else {
            return Err(GzhError::ConfigInvalid(format!("{} expects a cluster context config", self.name)));
        };
        run(format!("kubectl config use-context {context}")).await?;
        if let Some(namespace) = namespace {
            run(format!("kubectl config set-context --current --namespace={namespace}")).await?;
        }
        Ok(())
    }

    async fn get_current_state(&self) -> Result<ServiceConfig, GzhError> {
        let context = run("kubectl config current-context".to_string()).await?;
        Ok(ServiceConfig::ClusterContext { context, namespace: None })
    }

    async fn rollback(&self, previous: &ServiceConfig) -> Result<(), GzhError> {
        self.switch(previous).await
    }
}

/// Points a `~/.ssh/config` `Host gitfleet-<name>` block at the configured
/// target by rewriting a marker-delimited block, rather than shelling out to
/// a vendor CLI the way the other three backends do.
pub struct SshConfigSwitcher {
    name: String,
    config_path: std::path::PathBuf,
}

impl SshConfigSwitcher {
    pub fn new(name: impl Into<String>, config_path: std::path::PathBuf) -> Self {
        Self {
            name: name.into(),
            config_path,
        }
    }

    fn marker(&self) -> (String, String) {
        (
            format!("# gitfleet:{} begin", self.name),
            format!("# gitfleet:{} end", self.name),
        )
    }
}

#[async_trait]
impl ServiceSwitcher for SshConfigSwitcher {
    fn name(&self) -> &str {
        &self.name
    }

    async fn switch(&self, config: &ServiceConfig) -> Result<(), GzhError> {
        let ServiceConfig::SshConfig { host, user, identity_file } = config else {
            return Err(GzhError::ConfigInvalid(format!("{} expects an ssh config", self.name)));
        };

        let existing = tokio::fs::read_to_string(&self.config_path).await.unwrap_or_default();
        let (begin, end) = self.marker();
        let mut block = format!("{begin}\nHost gitfleet-{}\n    HostName {host}\n    User {user}\n", self.name);
        if let Some(identity_file) = identity_file {
            block.push_str(&format!("    IdentityFile {identity_file}\n"));
        }
        block.push_str(&end);

        let rewritten = replace_block(&existing, &begin, &end, &block);
        tokio::fs::write(&self.config_path, rewritten)
            .await
            .map_err(|e| GzhError::Network(e.to_string()))?;
        Ok(())
    }

    async fn get_current_state(&self) -> Result<ServiceConfig, GzhError> {
        let existing = tokio::fs::read_to_string(&self.config_path).await.unwrap_or_default();
        let (begin, end) = self.marker();
        let Some(block) = extract_block(&existing, &begin, &end) else {
            return Err(GzhError::ConfigInvalid(format!("no existing ssh block for {}", self.name)));
        };
        let host = block
            .lines()
            .find_map(|l| l.trim().strip_prefix("HostName "))
            .unwrap_or_default()
            .to_string();
        let user = block
            .lines()
            .find_map(|l| l.trim().strip_prefix("User "))
            .unwrap_or_default()
            .to_string();
        let identity_file = block
            .lines()
            .find_map(|l| l.trim().strip_prefix("IdentityFile "))
            .map(str::to_string);
        Ok(ServiceConfig::SshConfig { host, user, identity_file })
    }

    async fn rollback(&self, previous: &ServiceConfig) -> Result<(), GzhError> {
        self.switch(previous).await
    }
}

fn extract_block(content: &str, begin: &str, end: &str) -> Option<String> {
    let start = content.find(begin)?;
    let finish = content[start..].find(end)? + start + end.len();
    Some(content[start..finish].to_string())
}

fn replace_block(content: &str, begin: &str, end: &str, block: &str) -> String {
    match extract_block(content, begin, end) {
        Some(existing) => content.replacen(&existing, block, 1),
        None => {
            let mut out = content.to_string();
            if !out.is_empty() && !out.ends_with('\n') {
                out.push('\n');
            }
            out.push_str(block);
            out.push('\n');
            out
        }
    }
}
