// Keyword filter shared by every fetch stage
use crate::models::RawItem;

/// Case-insensitive substring matcher over a fixed keyword set.
#[derive(Debug, Clone, Default)]
pub struct KeywordFilter {
    keywords: Vec<String>,
    lowered: Vec<String>,
}

impl KeywordFilter {
    pub fn new<I, S>(keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keywords: Vec<String> = keywords
            .into_iter()
            .map(|k| k.as_ref().trim().to_string())
            .filter(|k| !k.is_empty())
            .collect();
        let lowered = keywords.iter().map(|k| k.to_lowercase()).collect();
        Self { keywords, lowered }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }

    /// Keywords (as configured) found anywhere in `text`.
    pub fn matched(&self, text: &str) -> Vec<String> {
        self.matched_in(&[text])
    }

    /// Keywords found inside any one of `fields`. A keyword never spans two fields.
    pub fn matched_in(&self, fields: &[&str]) -> Vec<String> {
        let haystacks: Vec<String> = fields.iter().map(|f| f.to_lowercase()).collect();
        self.lowered
            .iter()
            .zip(&self.keywords)
            .filter(|(needle, _)| haystacks.iter().any(|h| h.contains(needle.as_str())))
            .map(|(_, keyword)| keyword.clone())
            .collect()
    }

    /// Keep items whose title or body mentions a keyword, in input order.
    pub fn retain(&self, items: Vec<RawItem>) -> Vec<RawItem> {
        items
            .into_iter()
            .filter_map(|mut item| {
                let matched = self.matched_in(&[item.title.as_str(), item.body.as_str()]);
                if matched.is_empty() {
                    None
                } else {
                    item.keywords_matched = matched;
                    Some(item)
                }
            })
            .collect()
    }
}
