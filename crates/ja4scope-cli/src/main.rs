use std::net::IpAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use ja4scope_core::probe::parse_alpn_list;
use ja4scope_core::{FingerprintResult, Ja4Prober, ProbeConfig, ProbeError, Target};

mod output;

use output::{OutputFormat, ProbeReport};

#[derive(Parser)]
#[command(name = "ja4scope")]
#[command(about = "Active server fingerprinter: JA4S over TLS and JA4 over QUIC")]
struct Cli {
    /// Host name or IP address to probe
    target: String,

    /// Port for both the TLS and the QUIC probes
    #[arg(short, long, default_value_t = 443)]
    port: u16,

    /// Comma-separated ALPN protocols to offer over TLS (e.g. "h2,http/1.1")
    #[arg(short, long)]
    alpn: Option<String>,

    /// Skip the TCP/TLS (JA4S) probes
    #[arg(long, default_value_t = false, conflicts_with = "no_quic")]
    no_tls: bool,

    /// Skip the QUIC (JA4) probe
    #[arg(long, default_value_t = false)]
    no_quic: bool,

    /// Skip the per-address IPv4/IPv6 JA4S probes
    #[arg(long, default_value_t = false)]
    no_dual_stack: bool,

    /// Print the raw (unhashed) fingerprint too, and debug logs
    #[arg(short, long, default_value_t = false)]
    verbose: bool,

    /// Output format: "text" (human-readable) or "json" (NDJSON, one object per line)
    #[arg(short, long, default_value = "text")]
    output: String,

    /// TCP connect timeout when connecting by host name, in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// TCP connect timeout when connecting to a resolved address, in milliseconds
    #[arg(long)]
    ip_connect_timeout_ms: Option<u64>,

    /// TLS handshake timeout, in milliseconds
    #[arg(long)]
    handshake_timeout_ms: Option<u64>,

    /// QUIC connect timeout, in milliseconds
    #[arg(long)]
    quic_timeout_ms: Option<u64>,
}

impl Cli {
    fn probe_config(&self) -> ProbeConfig {
        let defaults = ProbeConfig::default();
        let ms = |v: Option<u64>, d: Duration| v.map(Duration::from_millis).unwrap_or(d);
        ProbeConfig {
            hostname_connect_timeout: ms(self.connect_timeout_ms, defaults.hostname_connect_timeout),
            ip_connect_timeout: ms(self.ip_connect_timeout_ms, defaults.ip_connect_timeout),
            handshake_timeout: ms(self.handshake_timeout_ms, defaults.handshake_timeout),
            quic_connect_timeout: ms(self.quic_timeout_ms, defaults.quic_connect_timeout),
        }
    }
}

/// First IPv4 and first IPv6 address, in resolver order.
fn split_families(ips: &[IpAddr]) -> (Option<IpAddr>, Option<IpAddr>) {
    let v4 = ips.iter().find(|ip| ip.is_ipv4()).copied();
    let v6 = ips.iter().find(|ip| ip.is_ipv6()).copied();
    (v4, v6)
}

fn report(
    label: String,
    address: Option<IpAddr>,
    outcome: Result<(FingerprintResult, String), ProbeError>,
) -> ProbeReport {
    let (result, raw) = match outcome {
        Ok((result, raw)) => (result, Some(raw)),
        Err(e) => {
            warn!("{} failed: {}", label, e);
            (e.into(), None)
        }
    };
    ProbeReport {
        label,
        address,
        result,
        raw,
    }
}

async fn ja4s_report(
    prober: &Ja4Prober,
    label: String,
    ip: Option<IpAddr>,
    alpn: &[Vec<u8>],
) -> ProbeReport {
    let outcome = prober.try_ja4s(ip, alpn).await.map(|o| o.into_result());
    report(label, ip, outcome)
}

async fn quic_report(prober: &Ja4Prober, ip: Option<IpAddr>) -> ProbeReport {
    let outcome = prober.try_ja4_quic(ip).await.map(|o| o.into_result());
    report("JA4 (QUIC)".to_string(), ip, outcome)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "debug"
    } else {
        "ja4scope=info,ja4scope_core=error"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_level(true)
        .init();

    let format = OutputFormat::parse(&cli.output)?;
    let alpn = cli
        .alpn
        .as_deref()
        .map(parse_alpn_list)
        .unwrap_or_default();

    let target = Target::new(cli.target.clone(), cli.port);
    let prober = Ja4Prober::new(target.clone(), cli.probe_config());
    let target_label = target.to_string();

    let resolved = if cli.no_dual_stack && cli.no_quic {
        Vec::new()
    } else {
        match prober.resolve().await {
            Ok(ips) => ips,
            Err(e) => {
                warn!("Could not resolve {}: {}", target.host, e);
                Vec::new()
            }
        }
    };
    let (v4, v6) = split_families(&resolved);

    output::print_header(&target_label, &resolved, &alpn, format);
    info!("Probing {}", target_label);

    let run_tls = !cli.no_tls;
    let run_dual = run_tls && !cli.no_dual_stack;

    let default_probe = async {
        if run_tls {
            Some(ja4s_report(&prober, "JA4S (Server - Default)".to_string(), None, &alpn).await)
        } else {
            None
        }
    };
    let v4_probe = async {
        match v4 {
            Some(ip) if run_dual => {
                Some(ja4s_report(&prober, format!("JA4S (IPv4: {})", ip), Some(ip), &alpn).await)
            }
            _ => None,
        }
    };
    let v6_probe = async {
        match v6 {
            Some(ip) if run_dual => {
                Some(ja4s_report(&prober, format!("JA4S (IPv6: {})", ip), Some(ip), &alpn).await)
            }
            _ => None,
        }
    };
    let quic_probe = async {
        if cli.no_quic {
            None
        } else {
            Some(quic_report(&prober, v4.or(v6)).await)
        }
    };

    let (default_done, v4_done, v6_done, quic_done) =
        tokio::join!(default_probe, v4_probe, v6_probe, quic_probe);

    for done in [default_done, v4_done, v6_done, quic_done].iter().flatten() {
        output::print_report(&target_label, done, format, cli.verbose)?;
    }

    Ok(())
}
