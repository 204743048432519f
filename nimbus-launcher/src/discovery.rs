use nimbus_core::{Catalog, Service, ServiceClass};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static IPV4: LazyLock<Regex> = LazyLock::new(|| {
    let octet = "(25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])";
    Regex::new(&format!(r"{o}\.{o}\.{o}\.{o}", o = octet)).expect("IPv4 pattern is valid")
});

/// Node group whose address the discovery playbook reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeRole {
    Master,
    Storage,
    Monitoring,
}

impl NodeRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Master => "master",
            NodeRole::Storage => "storage",
            NodeRole::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// First IPv4 address in the discovery run's output.
pub fn find_ipv4(output: &str) -> Option<&str> {
    IPV4.find(output).map(|m| m.as_str())
}

fn endpoint(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) if port > 0 => format!("{}:{}", host, port),
        _ => host.to_string(),
    }
}

/// Set each service's URL from the discovered host of its class.
///
/// Services whose host was not discovered keep their current URL.
pub fn assign_service_urls(catalog: &Catalog, services: &mut [Service], master_ip: &str, storage_ip: &str) {
    for service in services.iter_mut() {
        let Some(st) = catalog.service_type(&service.service_type) else {
            continue;
        };
        let host = match st.class {
            ServiceClass::StandAlone | ServiceClass::MasterSlave => master_ip,
            ServiceClass::Storage => storage_ip,
        };
        if !host.is_empty() {
            service.url = endpoint(host, st.access_port);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::ServiceType;

    fn service_type(name: &str, class: ServiceClass, access_port: Option<u16>) -> ServiceType {
        ServiceType {
            id: String::new(),
            service_type: name.into(),
            description: String::new(),
            default_version: String::new(),
            class,
            access_port,
            ports: vec![],
            versions: vec![],
            health_check: None,
        }
    }

    #[test]
    fn test_find_ipv4() {
        let output = "PLAY [get ip]\nok: [localhost] => {\n  \"msg\": \"10.0.12.7\"\n}\n";
        assert_eq!(find_ipv4(output), Some("10.0.12.7"));
        assert_eq!(find_ipv4("no address here"), None);
        assert_eq!(find_ipv4("a 192.168.1.255 b 10.0.0.1"), Some("192.168.1.255"));
    }

    #[test]
    fn test_assign_urls_by_class() {
        let catalog = Catalog::new(vec![
            service_type("spark", ServiceClass::MasterSlave, Some(8080)),
            service_type("jupyter", ServiceClass::StandAlone, None),
            service_type("nfs", ServiceClass::Storage, Some(2049)),
        ]);
        let mut services = vec![
            Service::new("spark", "spark", "2.4"),
            Service::new("jupyter", "jupyter", "1.0"),
            Service::new("nfs", "nfs", "4"),
        ];

        assign_service_urls(&catalog, &mut services, "10.0.0.5", "");
        assert_eq!(services[0].url, "10.0.0.5:8080");
        assert_eq!(services[1].url, "10.0.0.5");
        assert_eq!(services[2].url, "");

        assign_service_urls(&catalog, &mut services, "10.0.0.5", "10.0.0.9");
        assert_eq!(services[2].url, "10.0.0.9:2049");
    }
}
