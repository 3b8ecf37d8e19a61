use std::collections::BTreeMap;
use std::fmt;

/// Query filters; ordered so equal filter sets compare and hash equal
/// whatever order they were inserted in.
pub type Filters = BTreeMap<String, String>;

/// Identity of one cached query result.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryKey {
    pub collection: String,
    pub filters: Filters,
}

impl QueryKey {
    pub fn new(collection: impl Into<String>, filters: Filters) -> Self {
        Self {
            collection: collection.into(),
            filters,
        }
    }

    pub fn unfiltered(collection: impl Into<String>) -> Self {
        Self::new(collection, Filters::new())
    }

    pub fn belongs_to(&self, collection: &str) -> bool {
        self.collection == collection
    }

    /// Filters as query-string pairs.
    pub fn query_pairs(&self) -> Vec<(String, String)> {
        self.filters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.collection)?;
        for (i, (name, value)) in self.filters.iter().enumerate() {
            let sep = if i == 0 { '?' } else { '&' };
            write!(f, "{}{}={}", sep, name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_filter_order_does_not_matter() {
        let mut a = Filters::new();
        a.insert("search".into(), "pen".into());
        a.insert("category".into(), "books".into());
        let mut b = Filters::new();
        b.insert("category".into(), "books".into());
        b.insert("search".into(), "pen".into());

        let keys: HashSet<_> = [QueryKey::new("product", a), QueryKey::new("product", b)]
            .into_iter()
            .collect();
        assert_eq!(keys.len(), 1);
    }

    #[test]
    fn test_display() {
        let mut filters = Filters::new();
        filters.insert("search".into(), "pen".into());
        filters.insert("category".into(), "books".into());
        assert_eq!(
            QueryKey::new("product", filters).to_string(),
            "product?category=books&search=pen"
        );
        assert_eq!(QueryKey::unfiltered("product").to_string(), "product");
    }
}
