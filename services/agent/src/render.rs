//! Deterministic proxy-configuration rendering.
//!
//! Pure text assembly from an admitted route list. Every derived collection
//! (entry points, routers, load-balancer targets) is emitted in first-seen
//! order, so identical input always yields byte-identical output. The
//! emitted grammar is the dynamic-file format the supervised proxy consumes.

use std::collections::{HashMap, HashSet};

use polaredge_proto::RouteDescriptor;

/// A later descriptor tried to give an already-rendered router a different
/// host rule. The first rule wins; the conflict is surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleConflict {
    pub service_name: String,
    pub kept_rule: String,
    pub rejected_rule: String,
}

/// Rendered configuration text plus any router-rule conflicts encountered.
#[derive(Debug, Clone)]
pub struct Rendered {
    pub text: String,
    pub conflicts: Vec<RuleConflict>,
}

/// Entry-point name for a port. Fixed names for the well-known ports,
/// `port<N>` otherwise. Same port, same name, always.
pub fn entry_point_name(port: u16) -> String {
    match port {
        80 => "web".to_string(),
        443 => "websecure".to_string(),
        22 => "ssh".to_string(),
        2222 => "sshalt".to_string(),
        other => format!("port{other}"),
    }
}

/// Render the full proxy configuration for an admitted route list.
pub fn render_config(routes: &[RouteDescriptor]) -> Rendered {
    let mut out = String::new();
    let mut conflicts = Vec::new();

    // 1. One entry-point block per distinct port, first-seen order.
    out.push_str("[entryPoints]\n");
    let mut seen_ports: HashSet<u16> = HashSet::new();
    for route in routes {
        if seen_ports.insert(route.service_port) {
            let name = entry_point_name(route.service_port);
            out.push_str(&format!("  [entryPoints.{name}]\n"));
            out.push_str(&format!("    address = \":{}\"\n", route.service_port));
        }
    }

    // 2. One router block per distinct service name; the first host rule
    // seen for a name wins, later conflicting rules are rejected.
    out.push_str("\n[http]\n  [http.routers]\n");
    let mut router_rules: HashMap<String, String> = HashMap::new();
    for route in routes {
        let rule = format!("Host(`{}`)", route.host);

        match router_rules.get(&route.service_name) {
            Some(existing) if *existing == rule => continue,
            Some(existing) => {
                conflicts.push(RuleConflict {
                    service_name: route.service_name.clone(),
                    kept_rule: existing.clone(),
                    rejected_rule: rule,
                });
                continue;
            }
            None => {}
        }
        router_rules.insert(route.service_name.clone(), rule.clone());

        let entry_point = entry_point_name(route.service_port);
        out.push_str(&format!("    [http.routers.{}]\n", route.service_name));
        out.push_str(&format!("      rule = \"{rule}\"\n"));
        out.push_str(&format!("      entryPoints = [\"{entry_point}\"]\n"));
        out.push_str(&format!("      service = \"{}\"\n", route.service_name));
    }

    // 3. One load-balancer block per service name, each distinct target
    // URL exactly once, first-seen order.
    out.push_str("  [http.services]\n");
    let mut service_order: Vec<String> = Vec::new();
    let mut servers: HashMap<String, Vec<String>> = HashMap::new();
    for route in routes {
        let url = format!("http://{}:{}", route.service_name, route.service_port);
        let urls = servers.entry(route.service_name.clone()).or_insert_with(|| {
            service_order.push(route.service_name.clone());
            Vec::new()
        });
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    for name in &service_order {
        out.push_str(&format!("    [http.services.{name}.loadBalancer]\n"));
        for url in &servers[name] {
            out.push_str(&format!("      [[http.services.{name}.loadBalancer.servers]]\n"));
            out.push_str(&format!("        url = \"{url}\"\n"));
        }
    }

    Rendered {
        text: out,
        conflicts,
    }
}

/// Minimal startup configuration: a single entry point on the bootstrap
/// port, written before the first manifest arrives so the proxy never
/// launches against a missing file.
pub fn render_bootstrap_config(port: u16) -> String {
    format!("[entryPoints]\n  [entryPoints.edge]\n    address = \":{port}\"\n")
}
