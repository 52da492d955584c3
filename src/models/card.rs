/// A card as the offers dropdown names it: `"<card name> - <last four>"`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLabel {
    pub name: String,
    pub last_four: String,
}

impl CardLabel {
    /// Split on the last dash. En and em dashes count as dashes, and the
    /// site's `Products & Offers` prefix is dropped from the name. A label
    /// without a dash is all name.
    pub fn parse(label: &str) -> Self {
        let normalized = label.replace(['\u{2013}', '\u{2014}'], "-");
        let (name, last_four) = match normalized.rsplit_once('-') {
            Some((name, tail)) => (name, tail.trim()),
            None => (normalized.as_str(), ""),
        };
        let name = name.replace("Products & Offers", "");
        Self {
            name: name.trim().to_string(),
            last_four: last_four.to_string(),
        }
    }
}
