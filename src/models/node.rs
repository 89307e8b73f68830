use serde::{Deserialize, Deserializer, Serialize};

/// `GET /nodes` response body of the node monitor.
///
/// Entries stay raw until [`NodePage::into_listings`] so that one malformed
/// node cannot fail the whole page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodePage {
    #[serde(default)]
    pub nodes: Vec<serde_json::Value>,
}

impl NodePage {
    /// Decode every entry on its own. Entries that are not a node listing at
    /// all come back as errors next to the listings that did decode.
    pub fn into_listings(self) -> (Vec<NodeListing>, Vec<serde_json::Error>) {
        let mut listings = Vec::with_capacity(self.nodes.len());
        let mut rejected = Vec::new();
        for node in self.nodes {
            match serde_json::from_value::<NodeListing>(node) {
                Ok(listing) => listings.push(listing),
                Err(e) => rejected.push(e),
            }
        }
        (listings, rejected)
    }
}

/// One node as reported by the monitor. These are the externally-owned
/// fields of a registry row; the monitor may leave any of them out or null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeListing {
    pub operator: String,
    #[serde(default)]
    pub status: Option<bool>,
    #[serde(default = "zero_rewards", deserialize_with = "string_or_number")]
    pub rewards: String,
    #[serde(default)]
    pub fee: Option<f64>,
    #[serde(default)]
    pub uptime: Option<f64>,
}

fn zero_rewards() -> String {
    "0".to_string()
}

/// The monitor has reported `rewards` both as a decimal string and as a bare
/// JSON number; keep whatever arrives as text.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(zero_rewards()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for rewards, got {}",
            other
        ))),
    }
}
