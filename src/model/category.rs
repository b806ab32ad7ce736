use serde::{Deserialize, Serialize};

/// The fixed set of work streams a facility opening is split into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Communication,
    PromotionalMaterials,
    Network,
    Marketing,
    Recruitment,
    Training,
    Other,
}

impl Category {
    /// All categories in display order.
    pub const ALL: [Category; 7] = [
        Category::Communication,
        Category::PromotionalMaterials,
        Category::Network,
        Category::Marketing,
        Category::Recruitment,
        Category::Training,
        Category::Other,
    ];

    /// The label used in the template sheet and in the store.
    pub fn label(self) -> &'static str {
        match self {
            Category::Communication => "連絡系",
            Category::PromotionalMaterials => "販促物備品系",
            Category::Network => "通信系",
            Category::Marketing => "プロモーション系",
            Category::Recruitment => "求人系",
            Category::Training => "研修系",
            Category::Other => "その他",
        }
    }

    /// Parse an exact category label. The sheet historically spelled the
    /// promotional-materials category with a middle dot, so that is accepted too.
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "販促物・備品系" => Some(Category::PromotionalMaterials),
            other => Self::ALL.into_iter().find(|c| c.label() == other),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_parse_back() {
        for category in Category::ALL {
            assert_eq!(Category::parse(category.label()), Some(category));
        }
    }

    #[test]
    fn dotted_alias_and_unknown_labels() {
        assert_eq!(
            Category::parse("販促物・備品系"),
            Some(Category::PromotionalMaterials)
        );
        assert_eq!(Category::parse("連絡"), None);
        assert_eq!(Category::parse(" 連絡系"), None);
        assert_eq!(Category::parse(""), None);
    }
}
