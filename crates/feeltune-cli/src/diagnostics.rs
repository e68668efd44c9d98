//! Connectivity and installation checks.

use crate::config::Config;
use std::io::{self, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Hosts probed by `check-network`: the catalog API and a general site.
pub const PROBE_HOSTS: [(&str, u16); 2] = [("api.spotify.com", 443), ("www.google.com", 443)];

/// Whether a TCP connection to `host:port` opens within `timeout`.
/// Every resolved address is tried in turn.
pub fn check_connection(host: &str, port: u16, timeout: Duration) -> bool {
    let addrs = match (host, port).to_socket_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            tracing::debug!(host, error = %e, "name resolution failed");
            return false;
        }
    };
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(_) => return true,
            Err(e) => tracing::debug!(%addr, error = %e, "connect failed"),
        }
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    pub host: String,
    pub port: u16,
    pub reachable: bool,
}

/// Probe each host and print a line per result plus troubleshooting hints.
/// Returns whether every host was reachable.
pub fn report_network(
    out: &mut dyn Write,
    hosts: &[(&str, u16)],
    probe: impl Fn(&str, u16) -> bool,
) -> io::Result<bool> {
    let probes: Vec<Probe> = hosts
        .iter()
        .map(|&(host, port)| Probe {
            host: host.to_string(),
            port,
            reachable: probe(host, port),
        })
        .collect();

    for p in &probes {
        let status = if p.reachable { "OK" } else { "FAILED" };
        writeln!(out, "{}:{} ... {status}", p.host, p.port)?;
    }

    let all_ok = probes.iter().all(|p| p.reachable);
    if !all_ok {
        writeln!(out)?;
        writeln!(out, "Some hosts are unreachable. Possible causes:")?;
        writeln!(out, "  - no internet connection")?;
        writeln!(out, "  - a firewall blocking outbound HTTPS")?;
        writeln!(out, "  - a proxy that must be set via HTTPS_PROXY")?;
        writeln!(out, "Recommendations will use the offline song table until this is fixed.")?;
    }
    Ok(all_ok)
}

fn file_status(path: &Path) -> &'static str {
    if path.exists() {
        "present"
    } else {
        "MISSING"
    }
}

/// Print the effective configuration and whether model files exist.
pub fn report_status(out: &mut dyn Write, config: &Config) -> io::Result<()> {
    let detector = PathBuf::from(config.detector_model_path());
    let classifier = config.classifier_files();
    let params = config.detection_params();
    let retry = config.retry_policy();

    writeln!(out, "feeltune {}", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "models:")?;
    writeln!(out, "  detector            {} ({})", detector.display(), file_status(&detector))?;
    writeln!(
        out,
        "  classifier          {} ({})",
        classifier.topology.display(),
        file_status(&classifier.topology)
    )?;
    writeln!(
        out,
        "  classifier weights  {} ({})",
        classifier.weights.display(),
        file_status(&classifier.weights)
    )?;
    writeln!(out, "detection:")?;
    writeln!(out, "  scale factor        {}", params.scale_factor)?;
    writeln!(out, "  min neighbors       {}", params.min_neighbors)?;
    writeln!(out, "catalog:")?;
    match config.credentials() {
        Some(creds) => writeln!(out, "  credentials         configured ({})", creds.client_id())?,
        None => writeln!(out, "  credentials         not configured (offline recommendations only)")?,
    }
    writeln!(
        out,
        "  retries             {} attempts, {}s initial delay",
        retry.max_attempts,
        retry.initial_delay.as_secs()
    )?;
    writeln!(out, "  http timeout        {}s", config.http_timeout().as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_connection_to_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(check_connection("127.0.0.1", port, Duration::from_secs(1)));
    }

    #[test]
    fn test_connection_refused() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        assert!(!check_connection("127.0.0.1", port, Duration::from_secs(1)));
    }

    #[test]
    fn test_unresolvable_host() {
        assert!(!check_connection("nonexistent.invalid", 443, Duration::from_secs(1)));
    }

    #[test]
    fn test_report_all_ok() {
        let mut out = Vec::new();
        let ok = report_network(&mut out, &PROBE_HOSTS, |_, _| true).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(ok);
        assert!(text.contains("api.spotify.com:443 ... OK"));
        assert!(!text.contains("firewall"));
    }

    #[test]
    fn test_report_failure_hints() {
        let mut out = Vec::new();
        let ok = report_network(&mut out, &PROBE_HOSTS, |host, _| host != "api.spotify.com")
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(!ok);
        assert!(text.contains("api.spotify.com:443 ... FAILED"));
        assert!(text.contains("www.google.com:443 ... OK"));
        assert!(text.contains("HTTPS_PROXY"));
    }

    #[test]
    fn test_status_lists_missing_models() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("det_10g.onnx"), b"x").unwrap();
        let mut config = Config::default();
        config.models.dir = dir.path().to_path_buf();

        let mut out = Vec::new();
        report_status(&mut out, &config).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("det_10g.onnx (present)"));
        assert!(text.contains("fer.onnx (MISSING)"));
        assert!(text.contains("not configured"));
    }
}
