use std::net::IpAddr;

use serde::Serialize;

use ja4scope_core::FingerprintResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(s: &str) -> anyhow::Result<Self> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Invalid output format '{}'. Expected 'text' or 'json'.", s),
        }
    }
}

/// One labelled probe result, e.g. "JA4S (IPv6: 2001:db8::1)".
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub label: String,
    pub address: Option<IpAddr>,
    pub result: FingerprintResult,
    /// Unhashed fingerprint, present only for successful attempts
    pub raw: Option<String>,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    timestamp: String,
    target: &'a str,
    probe: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    address: Option<String>,
    #[serde(flatten)]
    result: &'a FingerprintResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    raw: Option<&'a str>,
}

pub fn print_header(target: &str, resolved: &[IpAddr], alpn: &[Vec<u8>], format: OutputFormat) {
    if format == OutputFormat::Json {
        return;
    }
    println!("Target: {}", target);
    if !resolved.is_empty() {
        let ips: Vec<String> = resolved.iter().map(|ip| ip.to_string()).collect();
        println!("    Resolved {} IP(s): {}", ips.len(), ips.join(", "));
    }
    if !alpn.is_empty() {
        let names: Vec<String> = alpn
            .iter()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .collect();
        println!("    [INFO] Using explicit ALPN: {}", names.join(", "));
    }
    println!("--------------------------------------------------");
}

pub fn print_report(
    target: &str,
    report: &ProbeReport,
    format: OutputFormat,
    verbose: bool,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => {
            print!("{}", format_text(report, verbose));
            Ok(())
        }
        OutputFormat::Json => {
            println!("{}", format_json(target, report, verbose)?);
            Ok(())
        }
    }
}

fn format_text(report: &ProbeReport, verbose: bool) -> String {
    let result = &report.result;
    let status = if result.success() { "[PASS]" } else { "[FAIL]" };
    let mut out = format!("{} {}: {}\n", status, report.label, result.message());
    if result.success() {
        out.push_str(&format!("    Fingerprint: {}\n", result.fingerprint()));
        if !result.detail().is_empty() {
            out.push_str(&format!("    Details: {}\n", result.detail()));
        }
        if verbose {
            if let Some(raw) = &report.raw {
                out.push_str(&format!("    Raw: {}\n", raw));
            }
        }
    }
    out
}

fn format_json(target: &str, report: &ProbeReport, verbose: bool) -> anyhow::Result<String> {
    let record = JsonRecord {
        timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        target,
        probe: &report.label,
        address: report.address.map(|ip| ip.to_string()),
        result: &report.result,
        raw: if verbose { report.raw.as_deref() } else { None },
    };
    Ok(serde_json::to_string(&record)?)
}
