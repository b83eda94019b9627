//! Free-port probing over a fixed range.

use thiserror::Error;

/// No bindable port remained in the configured range.
#[derive(Debug, Error)]
#[error("no free port in range {start}-{end}")]
pub struct PortSelectError {
    pub start: u16,
    pub end: u16,
}

/// Capability for checking whether a local TCP port can be bound.
/// The exposure policy takes this as an injected seam so tests can
/// script port availability.
pub trait PortProbe: Send + Sync {
    fn is_free(&self, port: u16) -> bool;
}

/// Probe that actually binds the port.
pub struct SystemPortProbe;

impl PortProbe for SystemPortProbe {
    fn is_free(&self, port: u16) -> bool {
        port_is_free(port)
    }
}

/// Try to bind the port and release it immediately.
pub fn port_is_free(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// First free port in the inclusive range, scanning low to high.
pub fn find_free_port_with(
    probe: &dyn PortProbe,
    start: u16,
    end: u16,
) -> Result<u16, PortSelectError> {
    (start..=end)
        .find(|port| probe.is_free(*port))
        .ok_or(PortSelectError { start, end })
}

/// First bindable port in the inclusive range.
pub fn find_free_port(start: u16, end: u16) -> Result<u16, PortSelectError> {
    find_free_port_with(&SystemPortProbe, start, end)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedProbe {
        busy: Vec<u16>,
    }

    impl PortProbe for ScriptedProbe {
        fn is_free(&self, port: u16) -> bool {
            !self.busy.contains(&port)
        }
    }

    #[test]
    fn test_scan_skips_busy_ports() {
        let probe = ScriptedProbe {
            busy: vec![7000, 7001],
        };
        assert_eq!(find_free_port_with(&probe, 7000, 7010).unwrap(), 7002);
    }

    #[test]
    fn test_exhausted_range_errors() {
        let probe = ScriptedProbe {
            busy: (7000..=7002).collect(),
        };
        let err = find_free_port_with(&probe, 7000, 7002).unwrap_err();
        assert_eq!(err.start, 7000);
        assert_eq!(err.end, 7002);
    }

    #[test]
    fn test_bound_port_is_reported_busy() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert!(!port_is_free(port));
        drop(listener);
    }
}
