use std::fmt;

/// Resource types the hosted model is known to produce.
///
/// The wire tag is an open string, so anything unrecognised lands in
/// [`ResourceKind::Other`] with its tag preserved.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Domain,
    DeviceManager,
    Device,
    Component,
    Port,
    Property,
    Application,
    Service,
    Other(String),
}

impl ResourceKind {
    pub const KNOWN: [ResourceKind; 8] = [
        ResourceKind::Domain,
        ResourceKind::DeviceManager,
        ResourceKind::Device,
        ResourceKind::Component,
        ResourceKind::Port,
        ResourceKind::Property,
        ResourceKind::Application,
        ResourceKind::Service,
    ];

    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "domain" => ResourceKind::Domain,
            "device_manager" => ResourceKind::DeviceManager,
            "device" => ResourceKind::Device,
            "component" => ResourceKind::Component,
            "port" => ResourceKind::Port,
            "property" => ResourceKind::Property,
            "application" => ResourceKind::Application,
            "service" => ResourceKind::Service,
            other => ResourceKind::Other(other.to_string()),
        }
    }

    pub fn as_tag(&self) -> &str {
        match self {
            ResourceKind::Domain => "domain",
            ResourceKind::DeviceManager => "device_manager",
            ResourceKind::Device => "device",
            ResourceKind::Component => "component",
            ResourceKind::Port => "port",
            ResourceKind::Property => "property",
            ResourceKind::Application => "application",
            ResourceKind::Service => "service",
            ResourceKind::Other(tag) => tag,
        }
    }

    /// Class carried by a container representing a resource of this kind.
    pub fn container_class(&self) -> String {
        format!("{}_container", self.as_tag())
    }

    /// Class of the sub-container a parent uses to collect children of this kind.
    pub fn group_class(&self) -> String {
        format!("{}_group", self.as_tag())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}
