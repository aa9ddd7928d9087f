use std::path::Path;

use anyhow::{Context as _, bail};

use crate::sandbox::request::DnsConfig;

/// Render the resolver file for `dns`, or `None` when there is nothing to write.
pub fn resolv_conf_content(dns: &DnsConfig) -> Option<String> {
    let mut lines: Vec<String> = dns
        .servers
        .iter()
        .map(|srv| format!("nameserver {srv}"))
        .collect();
    if !dns.searches.is_empty() {
        lines.push(format!("search {}", dns.searches.join(" ")));
    }
    if !dns.options.is_empty() {
        lines.push(format!("options {}", dns.options.join(" ")));
    }
    if lines.is_empty() {
        return None;
    }
    let mut content = lines.join("\n");
    content.push('\n');
    Some(content)
}

/// Overwrite the engine generated resolver file with the pod's DNS settings.
/// The file is shared by every container of the pod, so this runs once,
/// right after the sandbox starts.
pub async fn rewrite_resolv_file(path: &Path, dns: &DnsConfig) -> anyhow::Result<()> {
    if path.as_os_str().is_empty() {
        log::error!("resolv.conf path of the sandbox is empty, not rewriting it");
        return Ok(());
    }
    let exists = tokio::fs::try_exists(path)
        .await
        .with_context(|| format!("failed to check resolv.conf path {}", path.display()))?;
    if !exists {
        bail!("resolv.conf path {} does not exist", path.display());
    }
    let Some(content) = resolv_conf_content(dns) else {
        return Ok(());
    };

    log::info!(
        "rewriting resolv.conf file {} with: {:?}",
        path.display(),
        content
    );
    tokio::fs::write(path, content)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}
