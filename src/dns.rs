//! DNS configuration and the manual DNS prompt
//!
//! With a `manual` DNS provider the operator has to create the API server
//! records at their DNS host themselves. After the infrastructure is applied,
//! the provisioner's `dns_entries` output is printed and the operator is asked
//! to confirm the records resolve before the pipeline continues.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::infra::{output_as, Provisioner};
use crate::prompt::Prompt;
use crate::{Error, Result};

/// Provisioner output holding the DNS entries
pub const DNS_ENTRIES_OUTPUT: &str = "dns_entries";

/// Who manages the cluster's DNS records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DnsProvider {
    /// The operator creates the records by hand
    Manual,
    /// Records are managed in Route 53
    Route53,
    /// Records are managed in Cloudflare
    Cloudflare,
}

/// DNS configuration for the cluster
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DnsConfig {
    /// DNS provider
    pub provider: DnsProvider,
    /// Zone the cluster records live in
    pub zone: String,
}

impl DnsConfig {
    /// Validate the DNS configuration
    pub fn validate(&self) -> Result<()> {
        if self.zone.trim().is_empty() {
            return Err(Error::config("cluster.dns.zone must not be empty"));
        }
        Ok(())
    }

    /// Zone requiring manual confirmation, if the provider is manual
    pub fn manual_zone(&self) -> Option<&str> {
        (self.provider == DnsProvider::Manual).then_some(self.zone.as_str())
    }
}

/// A DNS record set the operator must create
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct DnsEntry {
    /// Fully qualified record name
    pub name: String,
    /// Time to live in seconds
    pub ttl: u32,
    /// Record type (A, AAAA, CNAME)
    #[serde(rename = "type")]
    pub entry_type: String,
    /// Record values
    pub records: Vec<String>,
}

/// Read the DNS entries from the provisioner outputs
pub async fn read_dns_entries(provisioner: &dyn Provisioner) -> Result<Vec<DnsEntry>> {
    output_as(provisioner, DNS_ENTRIES_OUTPUT).await
}

/// Render entries the way they are shown to the operator
pub fn format_entries(entries: &[DnsEntry]) -> String {
    let rule = "-".repeat(72);
    let mut out = format!("{}\n", rule);
    for entry in entries {
        out.push_str(&format!("Name: {}\n", entry.name));
        out.push_str(&format!("Type: {}\n", entry.entry_type));
        out.push_str(&format!("TTL: {}\n", entry.ttl));
        out.push_str("Records:\n");
        for record in &entry.records {
            out.push_str(&format!("- {}\n", record));
        }
        out.push_str(&format!("{}\n", rule));
    }
    out
}

/// Compare resolved addresses with the expected records, ignoring order
pub fn records_match(resolved: &[String], expected: &[String]) -> bool {
    let resolved: BTreeSet<&str> = resolved.iter().map(String::as_str).collect();
    let expected: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
    resolved == expected
}

/// Resolve every entry and check it points at exactly the expected records
pub async fn check_entries(entries: &[DnsEntry]) -> bool {
    for entry in entries {
        let resolved = match tokio::net::lookup_host((entry.name.as_str(), 0)).await {
            Ok(addrs) => addrs.map(|a| a.ip().to_string()).collect::<Vec<_>>(),
            Err(e) => {
                debug!(name = %entry.name, error = %e, "DNS lookup failed");
                return false;
            }
        };

        if !records_match(&resolved, &entry.records) {
            debug!(name = %entry.name, ?resolved, expected = ?entry.records, "DNS records differ");
            return false;
        }
    }
    true
}

/// Ask the operator to create the DNS entries and wait until they resolve.
///
/// Pressing Enter checks the records; typing `skip` continues without checking.
pub async fn manual_config_prompt(
    zone: &str,
    provisioner: &dyn Provisioner,
    prompt: &dyn Prompt,
) -> Result<()> {
    let entries = read_dns_entries(provisioner).await?;

    println!(
        "Please configure the following DNS entries at the DNS provider which hosts {:?}:",
        zone
    );
    print!("{}", format_entries(&entries));

    loop {
        let input = prompt
            .read_line("Press Enter to check the entries or type \"skip\" to continue the installation: ")
            .await?;

        match input.trim() {
            "skip" => {
                info!("Skipping DNS entry verification");
                return Ok(());
            }
            "" => {}
            _ => continue,
        }

        if check_entries(&entries).await {
            info!("DNS entries are configured");
            return Ok(());
        }

        println!("Entries are not correctly configured, please verify.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::MockProvisioner;
    use crate::prompt::MockPrompt;
    use mockall::predicate::*;

    fn entry() -> DnsEntry {
        DnsEntry {
            name: "prod.example.com".to_string(),
            ttl: 300,
            entry_type: "A".to_string(),
            records: vec!["10.0.0.2".to_string(), "10.0.0.1".to_string()],
        }
    }

    #[test]
    fn entries_parse_from_provisioner_json() {
        let json = r#"[{"name":"api.example.com","ttl":60,"type":"A","records":["1.2.3.4"]}]"#;
        let entries: Vec<DnsEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(entries[0].entry_type, "A");
        assert_eq!(entries[0].records, ["1.2.3.4"]);
    }

    #[test]
    fn formatting_lists_every_record() {
        let text = format_entries(&[entry()]);
        assert!(text.contains("Name: prod.example.com"));
        assert!(text.contains("TTL: 300"));
        assert!(text.contains("- 10.0.0.1"));
        assert!(text.contains("- 10.0.0.2"));
    }

    #[test]
    fn record_comparison_ignores_order() {
        let expected = entry().records;
        let resolved = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        assert!(records_match(&resolved, &expected));
        assert!(!records_match(&resolved[..1], &expected));
    }

    #[test]
    fn only_manual_provider_needs_confirmation() {
        let manual = DnsConfig {
            provider: DnsProvider::Manual,
            zone: "example.com".into(),
        };
        let route53 = DnsConfig {
            provider: DnsProvider::Route53,
            zone: "example.com".into(),
        };
        assert_eq!(manual.manual_zone(), Some("example.com"));
        assert_eq!(route53.manual_zone(), None);
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let err = serde_yaml::from_str::<DnsConfig>("provider: bind\nzone: x").unwrap_err();
        assert!(err.to_string().contains("unknown variant"));
    }

    #[tokio::test]
    async fn operator_can_skip_the_check() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_output()
            .with(eq(DNS_ENTRIES_OUTPUT))
            .times(1)
            .returning(|_| Ok(serde_json::to_value(vec![entry()]).unwrap()));

        let mut prompt = MockPrompt::new();
        let mut answers = vec!["skip\n".to_string(), "garbage\n".to_string()];
        prompt
            .expect_read_line()
            .times(2)
            .returning(move |_| Ok(answers.pop().unwrap()));

        manual_config_prompt("example.com", &provisioner, &prompt)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn missing_output_is_an_error() {
        let mut provisioner = MockProvisioner::new();
        provisioner
            .expect_output()
            .returning(|_| Err(Error::command_failed("terraform output", "no such output")));
        let prompt = MockPrompt::new();

        assert!(manual_config_prompt("example.com", &provisioner, &prompt)
            .await
            .is_err());
    }
}
