//! Capability flags advertised during `initialize`.
//!
//! Both sides send a capability object; the server stores the intersection
//! (section present on both sides, inner flags ANDed) as the negotiated
//! set for the connection. Empty sections are omitted from the wire form.

use serde::{Deserialize, Serialize};

use super::JsonObject;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourcesCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscribe: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromptsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RootsCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_changed: Option<bool>,
}

/// Capability object used by both client and server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<ToolsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourcesCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompts: Option<PromptsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<JsonObject>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roots: Option<RootsCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling: Option<JsonObject>,
}

fn and_flag(a: Option<bool>, b: Option<bool>) -> Option<bool> {
    Some(a.unwrap_or(false) && b.unwrap_or(false))
}

impl Capabilities {
    /// The capability set this server advertises: tools, without
    /// list-change notifications.
    pub fn server_default() -> Self {
        Capabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(false),
            }),
            ..Default::default()
        }
    }

    /// The intersection of two capability sets: a section survives only if
    /// both sides declared it, and its flags are the Boolean AND of both
    /// sides' flags.
    pub fn negotiate(&self, other: &Capabilities) -> Capabilities {
        Capabilities {
            tools: match (self.tools, other.tools) {
                (Some(a), Some(b)) => Some(ToolsCapability {
                    list_changed: and_flag(a.list_changed, b.list_changed),
                }),
                _ => None,
            },
            resources: match (self.resources, other.resources) {
                (Some(a), Some(b)) => Some(ResourcesCapability {
                    subscribe: and_flag(a.subscribe, b.subscribe),
                    list_changed: and_flag(a.list_changed, b.list_changed),
                }),
                _ => None,
            },
            prompts: match (self.prompts, other.prompts) {
                (Some(a), Some(b)) => Some(PromptsCapability {
                    list_changed: and_flag(a.list_changed, b.list_changed),
                }),
                _ => None,
            },
            logging: match (&self.logging, &other.logging) {
                (Some(_), Some(_)) => Some(JsonObject::new()),
                _ => None,
            },
            roots: match (self.roots, other.roots) {
                (Some(a), Some(b)) => Some(RootsCapability {
                    list_changed: and_flag(a.list_changed, b.list_changed),
                }),
                _ => None,
            },
            sampling: match (&self.sampling, &other.sampling) {
                (Some(_), Some(_)) => Some(JsonObject::new()),
                _ => None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_capabilities_serialize_to_empty_object() {
        let json = serde_json::to_value(Capabilities::default()).unwrap();
        assert_eq!(json, json!({}));
    }

    #[test]
    fn server_default_advertises_tools() {
        let json = serde_json::to_value(Capabilities::server_default()).unwrap();
        assert_eq!(json, json!({"tools": {"listChanged": false}}));
    }

    #[test]
    fn negotiate_is_section_intersection() {
        let server = Capabilities::server_default();
        let client = Capabilities::default();
        assert_eq!(server.negotiate(&client), Capabilities::default());

        let client = Capabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            ..Default::default()
        };
        let negotiated = server.negotiate(&client);
        assert_eq!(
            negotiated.tools,
            Some(ToolsCapability {
                list_changed: Some(false)
            })
        );
        assert!(negotiated.resources.is_none());
    }

    #[test]
    fn negotiate_ands_inner_flags() {
        let a = Capabilities {
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: Some(true),
            }),
            ..Default::default()
        };
        let b = Capabilities {
            resources: Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: None,
            }),
            ..Default::default()
        };
        let negotiated = a.negotiate(&b);
        assert_eq!(
            negotiated.resources,
            Some(ResourcesCapability {
                subscribe: Some(true),
                list_changed: Some(false),
            })
        );
    }

    #[test]
    fn negotiate_is_commutative() {
        let a = Capabilities::server_default();
        let b = Capabilities {
            tools: Some(ToolsCapability {
                list_changed: Some(true),
            }),
            logging: Some(JsonObject::new()),
            ..Default::default()
        };
        assert_eq!(a.negotiate(&b), b.negotiate(&a));
    }
}
